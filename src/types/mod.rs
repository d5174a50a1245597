//! Core identifier types shared across the bot.

pub mod ids;

pub use ids::{InvalidRepoId, IssueNumber, RepoId, ResponderId, ScheduleId, TaskId};
