//! The task state machine.
//!
//! ```text
//!            assign            ack             complete
//! pending ──────────► assigned ─────► acked ──────────────► completed
//!    │                 │    ▲                                  ▲
//!    │                 └────┘ reassign                         │
//!    │                 │                                       │
//!    └─────────────────┴───────────── complete ────────────────┘
//! ```
//!
//! Pure: callers apply the returned status and persist it themselves.

use thiserror::Error;

use super::model::TaskStatus;

/// Something that can happen to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskAction {
    /// First assignment of a pending task.
    Assign,
    /// The assignee acknowledged.
    Acknowledge,
    /// The work is done (or the issue was closed).
    Complete,
    /// Escalation moved the task to another responder.
    Reassign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {action:?} a task that is {from}")]
pub struct TransitionError {
    pub from: TaskStatus,
    pub action: TaskAction,
}

/// Returns the status after applying `action`, or an error if the move is illegal.
pub fn next_status(from: TaskStatus, action: TaskAction) -> Result<TaskStatus, TransitionError> {
    use TaskAction::*;
    use TaskStatus::*;

    match (from, action) {
        (Pending, Assign) => Ok(Assigned),
        (Assigned, Reassign) => Ok(Assigned),
        (Assigned, Acknowledge) => Ok(Acked),
        (Pending | Assigned | Acked, Complete) => Ok(Completed),
        _ => Err(TransitionError { from, action }),
    }
}
