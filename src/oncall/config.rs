//! The `modules.oncall` configuration block.
//!
//! ```yaml
//! modules:
//!   oncall:
//!     escalation_window_secs: 1800
//!     sweep_interval_secs: 60
//!     max_skip: 3
//!     labels:
//!       sev1: primary
//!     schedules:
//!       - name: primary
//!         policy: round-robin
//!         members: [alice, bob, carol]
//!         inactive: [bob]
//! ```

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Deserialize;

use super::model::RotationPolicy;

pub const DEFAULT_ESCALATION_WINDOW_SECS: u64 = 30 * 60;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OnCallConfig {
    /// How long an assignment may go unacknowledged before escalation.
    pub escalation_window_secs: u64,
    /// How often the escalation sweeper runs.
    pub sweep_interval_secs: u64,
    /// Upper bound on members inspected per selection. Defaults to the membership size.
    pub max_skip: Option<usize>,
    pub schedules: Vec<ScheduleConfig>,
    /// Issue label → schedule name. A matching label on an opened or labeled
    /// issue raises a task on that schedule.
    pub labels: HashMap<String, String>,
}

impl Default for OnCallConfig {
    fn default() -> Self {
        OnCallConfig {
            escalation_window_secs: DEFAULT_ESCALATION_WINDOW_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            max_skip: None,
            schedules: Vec::new(),
            labels: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScheduleConfig {
    pub name: String,
    #[serde(default)]
    pub policy: RotationPolicy,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Logins in rotation order.
    #[serde(default)]
    pub members: Vec<String>,
    /// Members that stay in the rotation but are skipped.
    #[serde(default)]
    pub inactive: Vec<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl OnCallConfig {
    pub fn escalation_window(&self) -> Duration {
        Duration::from_secs(self.escalation_window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Checks internal consistency. Returns a description of the first problem.
    pub fn validate(&self) -> Result<(), String> {
        if self.escalation_window_secs == 0 {
            return Err("escalation_window_secs must be positive".into());
        }
        if self.sweep_interval_secs == 0 {
            return Err("sweep_interval_secs must be positive".into());
        }

        let mut names = HashSet::new();
        for schedule in &self.schedules {
            if schedule.name.trim().is_empty() {
                return Err("schedule name must not be empty".into());
            }
            if !names.insert(schedule.name.as_str()) {
                return Err(format!("duplicate schedule: {}", schedule.name));
            }

            let mut members = HashSet::new();
            for login in &schedule.members {
                if !members.insert(login.as_str()) {
                    return Err(format!(
                        "schedule {}: {login} is listed more than once",
                        schedule.name
                    ));
                }
            }
            if let Some(stray) = schedule.inactive.iter().find(|l| !members.contains(l.as_str())) {
                return Err(format!(
                    "schedule {}: inactive responder {stray} is not a member",
                    schedule.name
                ));
            }
        }

        if let Some((label, target)) = self.labels.iter().find(|(_, s)| !names.contains(s.as_str())) {
            return Err(format!("label {label} maps to unknown schedule {target}"));
        }
        Ok(())
    }

    /// The schedule a set of issue labels routes to, if any. Labels are
    /// checked in the order given.
    pub fn schedule_for_labels<'a>(
        &'a self,
        labels: impl IntoIterator<Item = &'a str>,
    ) -> Option<&'a str> {
        labels
            .into_iter()
            .find_map(|label| self.labels.get(label).map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
escalation_window_secs: 600
max_skip: 2
labels:
  sev1: primary
schedules:
  - name: primary
    policy: sequential
    members: [alice, bob]
    inactive: [bob]
  - name: secondary
    members: [carol]
"#;

    #[test]
    fn parses_with_defaults() {
        let cfg: OnCallConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.escalation_window(), Duration::from_secs(600));
        assert_eq!(cfg.sweep_interval_secs, DEFAULT_SWEEP_INTERVAL_SECS);
        assert_eq!(cfg.max_skip, Some(2));
        assert_eq!(cfg.schedules[0].policy, RotationPolicy::Sequential);
        assert_eq!(cfg.schedules[1].policy, RotationPolicy::RoundRobin);
        assert!(cfg.schedules[1].enabled);
        cfg.validate().unwrap();
    }

    #[test]
    fn empty_block_is_default() {
        let cfg: OnCallConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg, OnCallConfig::default());
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_inconsistent_config() {
        let mut cfg: OnCallConfig = serde_yaml::from_str(SAMPLE).unwrap();
        cfg.labels.insert("sev2".into(), "missing".into());
        assert!(cfg.validate().unwrap_err().contains("unknown schedule"));

        let mut cfg: OnCallConfig = serde_yaml::from_str(SAMPLE).unwrap();
        cfg.schedules[0].inactive.push("mallory".into());
        assert!(cfg.validate().unwrap_err().contains("not a member"));

        let mut cfg: OnCallConfig = serde_yaml::from_str(SAMPLE).unwrap();
        cfg.schedules[1].name = "primary".into();
        assert!(cfg.validate().unwrap_err().contains("duplicate"));

        let mut cfg: OnCallConfig = serde_yaml::from_str(SAMPLE).unwrap();
        cfg.escalation_window_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn label_routing_uses_first_match() {
        let cfg: OnCallConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.schedule_for_labels(["bug", "sev1"]), Some("primary"));
        assert_eq!(cfg.schedule_for_labels(["bug"]), None);
    }
}
