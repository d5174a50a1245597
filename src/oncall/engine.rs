//! The on-call rotation engine.
//!
//! Owns the read-modify-write cycle for schedules and tasks:
//!
//! 1. take the schedule's lock
//! 2. reload the task and schedule from storage
//! 3. compute the new state with the pure [`transitions`](super::transitions)
//!    and [`rotation`](super::rotation) functions
//! 4. persist task, rotation index, and history in one transaction
//! 5. release the lock, then notify the platform (best effort)
//!
//! Notification failures are logged and counted; persisted state stands.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::github::PlatformClient;
use crate::storage::{Storage, StorageError};
use crate::telemetry;
use crate::types::{IssueNumber, RepoId, ScheduleId, TaskId};

use super::config::{DEFAULT_ESCALATION_WINDOW_SECS, ScheduleConfig};
use super::locks::ScheduleLocks;
use super::model::{
    AssignmentEnd, HistoryChange, Member, NewTask, Responder, RotationPolicy, Schedule, Task,
    TaskStatus,
};
use super::rotation::{
    Candidate, Selection, advance_after_ack, select_assignee, select_escalation,
};
use super::transitions::{TaskAction, TransitionError, next_status};

const MODULE: &str = "oncall";

#[derive(Debug, Error)]
pub enum RotationError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("unknown schedule: {0}")]
    UnknownSchedule(String),

    #[error("unknown responder: {0}")]
    UnknownResponder(String),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task {task} is not assigned to {login}")]
    NotAssignee { task: TaskId, login: String },
}

pub type Result<T> = std::result::Result<T, RotationError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationSettings {
    pub escalation_window: chrono::Duration,
    pub max_skip: Option<usize>,
}

impl Default for RotationSettings {
    fn default() -> Self {
        RotationSettings {
            escalation_window: chrono::Duration::seconds(DEFAULT_ESCALATION_WINDOW_SECS as i64),
            max_skip: None,
        }
    }
}

/// Result of [`RotationEngine::create_task`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskCreation {
    Created(Task),
    /// An open task already existed for this schedule and issue.
    Existing(Task),
}

impl TaskCreation {
    pub fn task(&self) -> &Task {
        match self {
            TaskCreation::Created(t) | TaskCreation::Existing(t) => t,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, TaskCreation::Created(_))
    }
}

/// Counts from one escalation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub escalated: usize,
    pub assigned: usize,
}

/// A platform notification produced under the lock and sent after it.
#[derive(Debug)]
struct Notice {
    repo: RepoId,
    issue: IssueNumber,
    assign_to: Option<String>,
    comment: String,
}

pub struct RotationEngine {
    storage: Storage,
    platform: Arc<dyn PlatformClient>,
    locks: ScheduleLocks,
    settings: RotationSettings,
    rng: Mutex<StdRng>,
}

impl RotationEngine {
    pub fn new(
        storage: Storage,
        platform: Arc<dyn PlatformClient>,
        settings: RotationSettings,
    ) -> Self {
        RotationEngine {
            storage,
            platform,
            locks: ScheduleLocks::new(),
            settings,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Makes random selection reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn settings(&self) -> &RotationSettings {
        &self.settings
    }

    // ─── Schedules and responders ───

    /// Creates or updates a schedule from configuration, rewrites its
    /// membership, and assigns any tasks that were waiting for responders.
    #[instrument(skip_all, fields(schedule = %config.name))]
    pub async fn sync_schedule(
        &self,
        config: &ScheduleConfig,
        now: DateTime<Utc>,
    ) -> Result<Schedule> {
        let schedule = self
            .storage
            .upsert_schedule(&config.name, config.policy, config.enabled)
            .await?;

        let notices = {
            let _guard = self.locks.lock(schedule.id).await;

            let mut member_ids = Vec::with_capacity(config.members.len());
            for login in &config.members {
                self.storage.upsert_responder(login, login).await?;
                let active = !config.inactive.contains(login);
                let responder = self.storage.set_responder_active(login, active).await?;
                member_ids.push(responder.id);
            }
            self.storage.set_schedule_members(schedule.id, &member_ids).await?;

            info!(
                policy = %config.policy,
                enabled = config.enabled,
                members = member_ids.len(),
                "Synced schedule"
            );
            self.assign_pending_locked(schedule.id, now).await?
        };
        self.send_all(notices).await;

        self.storage
            .get_schedule(schedule.id)
            .await?
            .ok_or_else(|| RotationError::UnknownSchedule(config.name.clone()))
    }

    /// Marks a responder (in)eligible everywhere. Activating someone retries
    /// pending tasks on every schedule.
    pub async fn set_responder_active(
        &self,
        login: &str,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<Responder> {
        let responder = self
            .storage
            .set_responder_active(login, active)
            .await
            .map_err(|e| match e {
                StorageError::NotFound { .. } => RotationError::UnknownResponder(login.to_string()),
                other => other.into(),
            })?;
        info!(login, active, "Updated responder availability");

        if active {
            for schedule in self.storage.list_schedules().await? {
                self.retry_pending(schedule.id, now).await?;
            }
        }
        Ok(responder)
    }

    // ─── Task lifecycle ───

    /// Opens a task on the named schedule for an issue and tries to assign it.
    ///
    /// Idempotent per (schedule, repository, issue): while a task is open, a
    /// repeat call returns it unchanged.
    #[instrument(skip_all, fields(schedule = schedule_name, repo = %repo, issue = %issue))]
    pub async fn create_task(
        &self,
        schedule_name: &str,
        repo: &RepoId,
        issue: IssueNumber,
        title: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<TaskCreation> {
        let schedule_id = self
            .storage
            .get_schedule_by_name(schedule_name)
            .await?
            .ok_or_else(|| RotationError::UnknownSchedule(schedule_name.to_string()))?
            .id;

        let (creation, notice) = {
            let _guard = self.locks.lock(schedule_id).await;
            let mut schedule = self.load_schedule(schedule_id).await?;

            if let Some(existing) = self.storage.find_open_task(schedule.id, repo, issue).await? {
                debug!(task = %existing.id, "Open task already exists");
                return Ok(TaskCreation::Existing(existing));
            }

            let task = self
                .storage
                .insert_task(&NewTask {
                    schedule_id: schedule.id,
                    repo: repo.clone(),
                    issue,
                    title: title.to_string(),
                    description: description.to_string(),
                })
                .await?;
            info!(task = %task.id, "Created task");

            let members = self.storage.list_members(schedule.id).await?;
            let (task, notice) = self.assign_locked(&mut schedule, &members, task, now).await?;
            (TaskCreation::Created(task), notice)
        };

        if let Some(notice) = notice {
            self.send(notice).await;
        }
        Ok(creation)
    }

    /// Acknowledges a task on behalf of its assignee.
    #[instrument(skip(self, now))]
    pub async fn acknowledge(
        &self,
        task_id: TaskId,
        login: &str,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let responder = self
            .storage
            .get_responder_by_login(login)
            .await?
            .ok_or_else(|| RotationError::UnknownResponder(login.to_string()))?;
        let schedule_id = self.load_task(task_id).await?.schedule_id;

        let _guard = self.locks.lock(schedule_id).await;
        let mut task = self.load_task(task_id).await?;
        if task.assignee != Some(responder.id) {
            return Err(RotationError::NotAssignee {
                task: task_id,
                login: login.to_string(),
            });
        }

        task.status = next_status(task.status, TaskAction::Acknowledge)?;
        task.acked_at = Some(now);

        let schedule = self.load_schedule(schedule_id).await?;
        let members = self.storage.list_members(schedule_id).await?;
        let candidates: Vec<Candidate> = members.iter().map(Candidate::from).collect();
        let new_index =
            advance_after_ack(schedule.policy, &candidates, schedule.current_index, responder.id);

        self.storage
            .save_task_state(&task, new_index, &[HistoryChange::Ack { at: now }])
            .await?;
        if let Some(index) = new_index {
            debug!(next_index = index, "Sequential rotation advanced");
        }

        if let Some(assigned_at) = task.assigned_at {
            let latency = (now - assigned_at).num_milliseconds().max(0) as f64;
            telemetry::record_ack_latency(&schedule.name, latency);
        }
        info!(task = %task.id, "Task acknowledged");
        Ok(task)
    }

    /// Completes a task from any open status. Completing an already
    /// completed task returns it unchanged.
    #[instrument(skip(self, now))]
    pub async fn complete(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<Task> {
        let schedule_id = self.load_task(task_id).await?.schedule_id;

        let _guard = self.locks.lock(schedule_id).await;
        let mut task = self.load_task(task_id).await?;
        let previous = task.status;
        if previous == TaskStatus::Completed {
            debug!(task = %task.id, "Task already completed");
            return Ok(task);
        }

        task.status = next_status(task.status, TaskAction::Complete)?;
        task.completed_at = Some(now);

        let mut changes = Vec::new();
        if task.assignee.is_some() {
            changes.push(HistoryChange::Close {
                at: now,
                reason: AssignmentEnd::Completed,
            });
        }

        // Completing straight from assigned implies the ack.
        let mut new_index = None;
        if let (TaskStatus::Assigned, Some(assignee)) = (previous, task.assignee) {
            let schedule = self.load_schedule(schedule_id).await?;
            let members = self.storage.list_members(schedule_id).await?;
            let candidates: Vec<Candidate> = members.iter().map(Candidate::from).collect();
            new_index =
                advance_after_ack(schedule.policy, &candidates, schedule.current_index, assignee);
        }

        self.storage.save_task_state(&task, new_index, &changes).await?;
        info!(task = %task.id, from = %previous, "Task completed");
        Ok(task)
    }

    /// Moves an unacknowledged task to the next eligible responder. A pending
    /// task gets another assignment attempt instead.
    ///
    /// Returns the task unchanged when nobody else is eligible.
    #[instrument(skip(self, now))]
    pub async fn escalate(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<Task> {
        let schedule_id = self.load_task(task_id).await?.schedule_id;

        let (task, notice) = {
            let _guard = self.locks.lock(schedule_id).await;
            let task = self.load_task(task_id).await?;
            let mut schedule = self.load_schedule(schedule_id).await?;
            let members = self.storage.list_members(schedule_id).await?;

            if task.status == TaskStatus::Pending {
                self.assign_locked(&mut schedule, &members, task, now).await?
            } else {
                self.reassign_locked(&schedule, &members, task, now).await?
            }
        };

        if let Some(notice) = notice {
            self.send(notice).await;
        }
        Ok(task)
    }

    /// Escalates every task whose assignment is older than the escalation
    /// window, then retries pending tasks on every schedule.
    ///
    /// Per-task and per-schedule failures are logged and skipped; only a
    /// failure to list overdue tasks fails the sweep.
    #[instrument(skip(self))]
    pub async fn escalate_overdue(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let cutoff = now - self.settings.escalation_window;
        let mut report = SweepReport::default();

        for task in self.storage.list_assigned_before(cutoff).await? {
            let outcome = {
                let _guard = self.locks.lock(task.schedule_id).await;
                self.escalate_if_overdue_locked(task.id, cutoff, now).await
            };
            match outcome {
                Ok(Some((escalated, notice))) => {
                    if escalated {
                        report.escalated += 1;
                    }
                    if let Some(notice) = notice {
                        self.send(notice).await;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(task = %task.id, error = %e, "Failed to escalate overdue task");
                    telemetry::record_module_error(MODULE, "escalate");
                }
            }
        }

        match self.storage.list_schedules().await {
            Ok(schedules) => {
                for schedule in schedules {
                    match self.retry_pending(schedule.id, now).await {
                        Ok(n) => report.assigned += n,
                        Err(e) => {
                            warn!(schedule = %schedule.name, error = %e, "Failed to retry pending tasks");
                            telemetry::record_module_error(MODULE, "retry");
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to list schedules for pending retry");
                telemetry::record_module_error(MODULE, "retry");
            }
        }

        if report != SweepReport::default() {
            info!(
                escalated = report.escalated,
                assigned = report.assigned,
                "Escalation sweep finished"
            );
        }
        Ok(report)
    }

    /// Tries to assign every pending task on a schedule. Returns how many
    /// were assigned.
    pub async fn retry_pending(
        &self,
        schedule_id: ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let notices = {
            let _guard = self.locks.lock(schedule_id).await;
            self.assign_pending_locked(schedule_id, now).await?
        };
        let assigned = notices.len();
        self.send_all(notices).await;
        Ok(assigned)
    }

    #[cfg(test)]
    pub(super) fn locks(&self) -> &ScheduleLocks {
        &self.locks
    }

    // ─── Queries ───

    /// Open tasks for an issue across every schedule.
    pub async fn open_tasks_for_issue(
        &self,
        repo: &RepoId,
        issue: IssueNumber,
    ) -> Result<Vec<Task>> {
        Ok(self.storage.find_open_tasks_for_issue(repo, issue).await?)
    }

    pub async fn schedule_name(&self, id: ScheduleId) -> Result<String> {
        Ok(self.load_schedule(id).await?.name)
    }

    pub async fn responder_login(&self, task: &Task) -> Result<Option<String>> {
        match task.assignee {
            Some(id) => Ok(self.storage.get_responder(id).await?.map(|r| r.login)),
            None => Ok(None),
        }
    }

    // ─── Internals (caller holds the schedule lock) ───

    async fn assign_pending_locked(
        &self,
        schedule_id: ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notice>> {
        let mut schedule = self.load_schedule(schedule_id).await?;
        let members = self.storage.list_members(schedule_id).await?;
        let pending = self
            .storage
            .list_tasks_by_status(Some(schedule_id), TaskStatus::Pending)
            .await?;

        let mut notices = Vec::new();
        for task in pending {
            let (_, notice) = self.assign_locked(&mut schedule, &members, task, now).await?;
            match notice {
                Some(n) => notices.push(n),
                // Nobody available; later tasks won't fare better.
                None => break,
            }
        }
        Ok(notices)
    }

    /// Re-checks a task under its schedule's lock and reassigns it if it is
    /// still overdue. `None` means it was acked or moved meanwhile.
    async fn escalate_if_overdue_locked(
        &self,
        task_id: TaskId,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<(bool, Option<Notice>)>> {
        let current = self.load_task(task_id).await?;
        let overdue = current.status == TaskStatus::Assigned
            && current.assigned_at.is_some_and(|at| at < cutoff);
        if !overdue {
            return Ok(None);
        }

        let schedule = self.load_schedule(current.schedule_id).await?;
        let members = self.storage.list_members(schedule.id).await?;
        let previous = current.assignee;
        let (updated, notice) = self.reassign_locked(&schedule, &members, current, now).await?;
        Ok(Some((updated.assignee != previous, notice)))
    }

    async fn assign_locked(
        &self,
        schedule: &mut Schedule,
        members: &[Member],
        mut task: Task,
        now: DateTime<Utc>,
    ) -> Result<(Task, Option<Notice>)> {
        if !schedule.enabled {
            info!(task = %task.id, schedule = %schedule.name, "Schedule disabled; task stays pending");
            return Ok((task, None));
        }

        let candidates: Vec<Candidate> = members.iter().map(Candidate::from).collect();
        let Some(selection) = self.pick(|rng| {
            select_assignee(
                schedule.policy,
                &candidates,
                schedule.current_index,
                self.settings.max_skip,
                rng,
            )
        }) else {
            warn!(
                task = %task.id,
                schedule = %schedule.name,
                members = members.len(),
                "No active responder available; task stays pending"
            );
            return Ok((task, None));
        };

        task.status = next_status(task.status, TaskAction::Assign)?;
        task.assignee = Some(selection.responder);
        task.assigned_at = Some(now);
        self.storage
            .save_task_state(
                &task,
                Some(selection.next_index),
                &[HistoryChange::Open {
                    responder: selection.responder,
                    at: now,
                }],
            )
            .await?;
        schedule.current_index = selection.next_index;

        let login = &members[selection.position].responder.login;
        info!(task = %task.id, responder = %login, policy = %schedule.policy, "Task assigned");
        let notice = Notice {
            repo: task.repo.clone(),
            issue: task.issue,
            assign_to: Some(login.clone()),
            comment: format!(
                "@{login} you have been paged via on-call schedule `{}`. \
                 Reply `/oncall ack` to acknowledge.",
                schedule.name
            ),
        };
        Ok((task, Some(notice)))
    }

    async fn reassign_locked(
        &self,
        schedule: &Schedule,
        members: &[Member],
        mut task: Task,
        now: DateTime<Utc>,
    ) -> Result<(Task, Option<Notice>)> {
        // Validates the move before touching the rotation.
        let status = next_status(task.status, TaskAction::Reassign)?;
        let Some(current) = task.assignee else {
            return Err(RotationError::Transition(TransitionError {
                from: task.status,
                action: TaskAction::Reassign,
            }));
        };

        let candidates: Vec<Candidate> = members.iter().map(Candidate::from).collect();
        let selection: Option<Selection> = self.pick(|rng| {
            select_escalation(
                schedule.policy,
                &candidates,
                schedule.current_index,
                current,
                self.settings.max_skip,
                rng,
            )
        });
        let Some(selection) = selection else {
            warn!(
                task = %task.id,
                schedule = %schedule.name,
                "No other eligible responder; keeping current assignment"
            );
            return Ok((task, None));
        };

        task.status = status;
        task.assignee = Some(selection.responder);
        task.assigned_at = Some(now);
        let index = (schedule.policy != RotationPolicy::Random).then_some(selection.next_index);
        self.storage
            .save_task_state(
                &task,
                index,
                &[
                    HistoryChange::Close {
                        at: now,
                        reason: AssignmentEnd::Escalated,
                    },
                    HistoryChange::Open {
                        responder: selection.responder,
                        at: now,
                    },
                ],
            )
            .await?;

        let previous = members
            .iter()
            .find(|m| m.responder.id == current)
            .map_or_else(|| current.to_string(), |m| m.responder.login.clone());
        let login = &members[selection.position].responder.login;
        info!(task = %task.id, from = %previous, to = %login, "Task escalated");

        let notice = Notice {
            repo: task.repo.clone(),
            issue: task.issue,
            assign_to: Some(login.clone()),
            comment: format!(
                "Escalated from @{previous}: @{login} you have been paged via on-call \
                 schedule `{}`. Reply `/oncall ack` to acknowledge.",
                schedule.name
            ),
        };
        Ok((task, Some(notice)))
    }

    fn pick<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        // A poisoned lock only means another selection panicked; the RNG state is still usable.
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut rng)
    }

    async fn load_task(&self, id: TaskId) -> Result<Task> {
        self.storage
            .get_task(id)
            .await?
            .ok_or(RotationError::TaskNotFound(id))
    }

    async fn load_schedule(&self, id: ScheduleId) -> Result<Schedule> {
        self.storage
            .get_schedule(id)
            .await?
            .ok_or_else(|| RotationError::UnknownSchedule(id.to_string()))
    }

    // ─── Notifications ───

    async fn send_all(&self, notices: Vec<Notice>) {
        for notice in notices {
            self.send(notice).await;
        }
    }

    async fn send(&self, notice: Notice) {
        if let Some(login) = &notice.assign_to {
            if let Err(e) = self
                .platform
                .assign_issue(&notice.repo, notice.issue, login)
                .await
            {
                warn!(
                    repo = %notice.repo,
                    issue = %notice.issue,
                    transient = e.is_transient(),
                    error = %e,
                    "Failed to assign issue"
                );
                telemetry::record_module_error(MODULE, "notify");
            }
        }
        if let Err(e) = self
            .platform
            .post_comment(&notice.repo, notice.issue, &notice.comment)
            .await
        {
            warn!(
                repo = %notice.repo,
                issue = %notice.issue,
                transient = e.is_transient(),
                error = %e,
                "Failed to post notification comment"
            );
            telemetry::record_module_error(MODULE, "notify");
        }
    }

    /// Posts a free-form comment, logging failures like other notifications.
    pub async fn comment(&self, repo: &RepoId, issue: IssueNumber, body: impl Into<String>) {
        self.send(Notice {
            repo: repo.clone(),
            issue,
            assign_to: None,
            comment: body.into(),
        })
        .await;
    }
}
