//! Responder selection for each rotation policy.
//!
//! Everything here is pure: the caller passes the ordered membership, the
//! schedule's current index, and a random source, and gets back who to
//! assign plus the index to persist. Locking and storage live in the engine.

use rand::Rng;
use rand::seq::SliceRandom;

use crate::types::ResponderId;

use super::model::{Member, RotationPolicy};

/// A member as seen by the selection logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub responder: ResponderId,
    pub active: bool,
}

impl From<&Member> for Candidate {
    fn from(m: &Member) -> Self {
        Candidate {
            responder: m.responder.id,
            active: m.responder.active,
        }
    }
}

/// The outcome of a successful selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub position: usize,
    pub responder: ResponderId,
    /// The schedule's rotation index after this selection.
    pub next_index: usize,
}

fn walk_limit(max_skip: Option<usize>, n: usize) -> usize {
    max_skip.map_or(n, |m| m.clamp(1, n))
}

/// Walks forward from `start` (wrapping) for at most `limit` positions and
/// returns the first position accepted by `eligible`.
fn walk(
    candidates: &[Candidate],
    start: usize,
    limit: usize,
    eligible: impl Fn(&Candidate) -> bool,
) -> Option<usize> {
    let n = candidates.len();
    (0..limit)
        .map(|step| (start + step) % n)
        .find(|&pos| eligible(&candidates[pos]))
}

fn random_pick<R: Rng + ?Sized>(
    candidates: &[Candidate],
    rng: &mut R,
    eligible: impl Fn(&Candidate) -> bool,
) -> Option<usize> {
    let positions: Vec<usize> = (0..candidates.len())
        .filter(|&pos| eligible(&candidates[pos]))
        .collect();
    positions.choose(rng).copied()
}

/// Picks the assignee for a new task.
///
/// Returns `None` when the membership is empty or no active member is found
/// within `max_skip` positions; the task then stays pending.
pub fn select_assignee<R: Rng + ?Sized>(
    policy: RotationPolicy,
    candidates: &[Candidate],
    current_index: usize,
    max_skip: Option<usize>,
    rng: &mut R,
) -> Option<Selection> {
    let n = candidates.len();
    if n == 0 {
        return None;
    }
    let start = current_index % n;
    let limit = walk_limit(max_skip, n);

    let (position, next_index) = match policy {
        RotationPolicy::RoundRobin => {
            let pos = walk(candidates, start, limit, |c| c.active)?;
            (pos, (pos + 1) % n)
        }
        RotationPolicy::Sequential => {
            let pos = walk(candidates, start, limit, |c| c.active)?;
            (pos, pos)
        }
        RotationPolicy::Random => {
            let pos = random_pick(candidates, rng, |c| c.active)?;
            (pos, start)
        }
    };

    Some(Selection {
        position,
        responder: candidates[position].responder,
        next_index,
    })
}

/// Picks a different responder for an unacknowledged task.
///
/// The walk starts just after the current assignee's position (or at the
/// schedule index if the assignee is no longer a member) and never returns
/// the current assignee. `None` means nobody else is eligible.
pub fn select_escalation<R: Rng + ?Sized>(
    policy: RotationPolicy,
    candidates: &[Candidate],
    current_index: usize,
    current_assignee: ResponderId,
    max_skip: Option<usize>,
    rng: &mut R,
) -> Option<Selection> {
    let n = candidates.len();
    if n == 0 {
        return None;
    }
    let eligible = |c: &Candidate| c.active && c.responder != current_assignee;
    let start = candidates
        .iter()
        .position(|c| c.responder == current_assignee)
        .map_or(current_index % n, |pos| (pos + 1) % n);
    let limit = walk_limit(max_skip, n);

    let (position, next_index) = match policy {
        RotationPolicy::RoundRobin => {
            let pos = walk(candidates, start, limit, eligible)?;
            (pos, (pos + 1) % n)
        }
        RotationPolicy::Sequential => {
            let pos = walk(candidates, start, limit, eligible)?;
            (pos, pos)
        }
        RotationPolicy::Random => {
            let pos = random_pick(candidates, rng, eligible)?;
            (pos, current_index % n)
        }
    };

    Some(Selection {
        position,
        responder: candidates[position].responder,
        next_index,
    })
}

/// For sequential schedules, the index after `responder` acknowledges or
/// completes a task. Only the on-duty responder moves the rotation along.
pub fn advance_after_ack(
    policy: RotationPolicy,
    candidates: &[Candidate],
    current_index: usize,
    responder: ResponderId,
) -> Option<usize> {
    let n = candidates.len();
    if policy != RotationPolicy::Sequential || n == 0 {
        return None;
    }
    let idx = current_index % n;
    (candidates[idx].responder == responder).then_some((idx + 1) % n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::arb_candidates;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn members(active: &[bool]) -> Vec<Candidate> {
        active
            .iter()
            .enumerate()
            .map(|(i, &active)| Candidate {
                responder: ResponderId(i as i64 + 1),
                active,
            })
            .collect()
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    /// Runs `count` round-robin selections, threading the index through.
    fn round_robin_sequence(candidates: &[Candidate], count: usize) -> Vec<i64> {
        let mut index = 0;
        let mut picks = Vec::new();
        for _ in 0..count {
            let s = select_assignee(
                RotationPolicy::RoundRobin,
                candidates,
                index,
                None,
                &mut rng(),
            )
            .unwrap();
            picks.push(s.responder.0);
            index = s.next_index;
        }
        picks
    }

    #[test]
    fn round_robin_cycles_in_order() {
        let c = members(&[true, true, true]);
        assert_eq!(round_robin_sequence(&c, 6), vec![1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn round_robin_skips_inactive() {
        // A, B(inactive), C: B is never picked.
        let c = members(&[true, false, true]);
        assert_eq!(round_robin_sequence(&c, 4), vec![1, 3, 1, 3]);
    }

    #[test]
    fn no_active_member_selects_nobody() {
        let c = members(&[false, false]);
        for policy in [
            RotationPolicy::RoundRobin,
            RotationPolicy::Sequential,
            RotationPolicy::Random,
        ] {
            assert_eq!(select_assignee(policy, &c, 0, None, &mut rng()), None);
        }
        assert_eq!(
            select_assignee(RotationPolicy::RoundRobin, &[], 0, None, &mut rng()),
            None
        );
    }

    #[test]
    fn max_skip_bounds_the_walk() {
        let c = members(&[false, false, true]);
        assert_eq!(
            select_assignee(RotationPolicy::RoundRobin, &c, 0, Some(2), &mut rng()),
            None
        );
        let s = select_assignee(RotationPolicy::RoundRobin, &c, 0, Some(3), &mut rng()).unwrap();
        assert_eq!(s.position, 2);
        // Zero is treated as one: only the cursor position is tried.
        assert_eq!(
            select_assignee(RotationPolicy::RoundRobin, &c, 0, Some(0), &mut rng()),
            None
        );
    }

    #[test]
    fn sequential_holds_until_ack() {
        let c = members(&[true, true, true]);
        let first =
            select_assignee(RotationPolicy::Sequential, &c, 0, None, &mut rng()).unwrap();
        let second = select_assignee(
            RotationPolicy::Sequential,
            &c,
            first.next_index,
            None,
            &mut rng(),
        )
        .unwrap();
        assert_eq!(first.responder, second.responder);

        // Someone other than the on-duty responder acking changes nothing.
        assert_eq!(
            advance_after_ack(RotationPolicy::Sequential, &c, 0, ResponderId(2)),
            None
        );
        let next = advance_after_ack(RotationPolicy::Sequential, &c, 0, first.responder).unwrap();
        let third =
            select_assignee(RotationPolicy::Sequential, &c, next, None, &mut rng()).unwrap();
        assert_eq!(third.responder, ResponderId(2));
    }

    #[test]
    fn sequential_skips_inactive_on_duty_member() {
        let c = members(&[false, true]);
        let s = select_assignee(RotationPolicy::Sequential, &c, 0, None, &mut rng()).unwrap();
        assert_eq!(s.responder, ResponderId(2));
        assert_eq!(s.next_index, 1);
    }

    #[test]
    fn advance_is_only_for_sequential() {
        let c = members(&[true, true]);
        assert_eq!(
            advance_after_ack(RotationPolicy::RoundRobin, &c, 0, ResponderId(1)),
            None
        );
        assert_eq!(
            advance_after_ack(RotationPolicy::Sequential, &c, 1, ResponderId(2)),
            Some(0)
        );
    }

    #[test]
    fn escalation_moves_to_next_after_assignee() {
        let c = members(&[true, true, true]);
        let s = select_escalation(
            RotationPolicy::RoundRobin,
            &c,
            0,
            ResponderId(2),
            None,
            &mut rng(),
        )
        .unwrap();
        assert_eq!(s.responder, ResponderId(3));
        assert_eq!(s.next_index, 0);
    }

    #[test]
    fn escalation_with_no_alternative_selects_nobody() {
        let c = members(&[true, false]);
        assert_eq!(
            select_escalation(
                RotationPolicy::RoundRobin,
                &c,
                0,
                ResponderId(1),
                None,
                &mut rng()
            ),
            None
        );
        assert_eq!(
            select_escalation(
                RotationPolicy::Random,
                &c,
                0,
                ResponderId(1),
                None,
                &mut rng()
            ),
            None
        );
    }

    #[test]
    fn escalation_for_departed_assignee_starts_at_index() {
        let c = members(&[true, true]);
        let s = select_escalation(
            RotationPolicy::Sequential,
            &c,
            1,
            ResponderId(99),
            None,
            &mut rng(),
        )
        .unwrap();
        assert_eq!(s.responder, ResponderId(2));
    }

    fn any_policy() -> impl Strategy<Value = RotationPolicy> {
        prop_oneof![
            Just(RotationPolicy::RoundRobin),
            Just(RotationPolicy::Sequential),
            Just(RotationPolicy::Random),
        ]
    }

    proptest! {
        #[test]
        fn never_selects_inactive(
            policy in any_policy(),
            candidates in arb_candidates(),
            index in 0usize..32,
            seed: u64,
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            if let Some(s) = select_assignee(policy, &candidates, index, None, &mut rng) {
                prop_assert!(candidates[s.position].active);
                prop_assert_eq!(candidates[s.position].responder, s.responder);
                prop_assert!(s.next_index < candidates.len());
            }
        }

        #[test]
        fn selects_someone_whenever_anyone_is_active(
            policy in any_policy(),
            candidates in arb_candidates(),
            index in 0usize..32,
            seed: u64,
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let any_active = candidates.iter().any(|c| c.active);
            prop_assert_eq!(
                select_assignee(policy, &candidates, index, None, &mut rng).is_some(),
                any_active
            );
        }

        #[test]
        fn escalation_never_returns_current_assignee(
            policy in any_policy(),
            candidates in arb_candidates(),
            index in 0usize..32,
            current in 1i64..10,
            seed: u64,
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let current = ResponderId(current);
            if let Some(s) = select_escalation(policy, &candidates, index, current, None, &mut rng) {
                prop_assert_ne!(s.responder, current);
                prop_assert!(candidates[s.position].active);
            }
        }

        #[test]
        fn round_robin_visits_every_active_member_once_per_cycle(
            candidates in arb_candidates(),
        ) {
            let active = candidates.iter().filter(|c| c.active).count();
            prop_assume!(active > 0);

            let mut index = 0;
            let mut seen = std::collections::HashSet::new();
            for _ in 0..active {
                let s = select_assignee(
                    RotationPolicy::RoundRobin, &candidates, index, None, &mut rng(),
                ).unwrap();
                prop_assert!(seen.insert(s.responder));
                index = s.next_index;
            }
        }
    }
}
