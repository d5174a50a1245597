//! On-call domain types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{IssueNumber, RepoId, ResponderId, ScheduleId, TaskId};

/// A person who can be paged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Responder {
    pub id: ResponderId,
    /// External identity on the code-hosting platform.
    pub login: String,
    pub display_name: String,
    /// Only active responders are eligible for assignment.
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// How a schedule picks the next responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationPolicy {
    /// Each new task goes to the next active member after the previous pick.
    #[default]
    RoundRobin,
    /// One member stays on duty until they acknowledge a task.
    Sequential,
    /// Uniform pick among active members.
    Random,
}

impl RotationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationPolicy::RoundRobin => "round-robin",
            RotationPolicy::Sequential => "sequential",
            RotationPolicy::Random => "random",
        }
    }
}

impl fmt::Display for RotationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown rotation policy: {0}")]
pub struct UnknownPolicy(pub String);

impl FromStr for RotationPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" | "round_robin" => Ok(RotationPolicy::RoundRobin),
            "sequential" => Ok(RotationPolicy::Sequential),
            "random" => Ok(RotationPolicy::Random),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

/// A named rotation over an ordered list of responders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub name: String,
    pub policy: RotationPolicy,
    pub enabled: bool,
    /// Position into the membership list. Meaningless when the list is empty.
    pub current_index: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A responder's slot in a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub position: usize,
    pub responder: Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Acked,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Acked => "acked",
            TaskStatus::Completed => "completed",
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, TaskStatus::Completed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "assigned" => Ok(TaskStatus::Assigned),
            "acked" => Ok(TaskStatus::Acked),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(other.to_string()),
        }
    }
}

/// A unit of work raised from an issue and routed through a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub schedule_id: ScheduleId,
    pub repo: RepoId,
    pub issue: IssueNumber,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub assignee: Option<ResponderId>,
    pub created_at: DateTime<Utc>,
    /// When the current assignee was assigned.
    pub assigned_at: Option<DateTime<Utc>>,
    pub acked_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields needed to create a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub schedule_id: ScheduleId,
    pub repo: RepoId,
    pub issue: IssueNumber,
    pub title: String,
    pub description: String,
}

/// Why an assignment stopped being the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentEnd {
    Completed,
    Escalated,
}

impl AssignmentEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentEnd::Completed => "completed",
            AssignmentEnd::Escalated => "escalated",
        }
    }
}

impl FromStr for AssignmentEnd {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(AssignmentEnd::Completed),
            "escalated" => Ok(AssignmentEnd::Escalated),
            other => Err(other.to_string()),
        }
    }
}

/// One row of a task's assignment history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: TaskId,
    pub responder_id: ResponderId,
    pub assigned_at: DateTime<Utc>,
    pub acked_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<AssignmentEnd>,
}

/// A change to a task's assignment history, applied with the task update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryChange {
    /// Start a new assignment row.
    Open {
        responder: ResponderId,
        at: DateTime<Utc>,
    },
    /// Stamp the open row as acknowledged.
    Ack { at: DateTime<Utc> },
    /// Close the open row.
    Close {
        at: DateTime<Utc>,
        reason: AssignmentEnd,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_names_parse_and_display() {
        for policy in [
            RotationPolicy::RoundRobin,
            RotationPolicy::Sequential,
            RotationPolicy::Random,
        ] {
            assert_eq!(policy.to_string().parse::<RotationPolicy>(), Ok(policy));
        }
        assert_eq!("round_robin".parse(), Ok(RotationPolicy::RoundRobin));
        assert!("weighted".parse::<RotationPolicy>().is_err());
    }

    #[test]
    fn policy_deserializes_from_kebab_case() {
        let p: RotationPolicy = serde_yaml::from_str("round-robin").unwrap();
        assert_eq!(p, RotationPolicy::RoundRobin);
    }

    #[test]
    fn only_completed_is_closed() {
        assert!(TaskStatus::Pending.is_open());
        assert!(TaskStatus::Assigned.is_open());
        assert!(TaskStatus::Acked.is_open());
        assert!(!TaskStatus::Completed.is_open());
        assert_eq!("acked".parse::<TaskStatus>(), Ok(TaskStatus::Acked));
    }
}
