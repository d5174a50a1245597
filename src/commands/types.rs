//! Command value types.

use serde::{Deserialize, Serialize};
use tracing::{Span, info, info_span};

use crate::types::{IssueNumber, RepoId};
use crate::webhooks::IssueCommentEvent;

use super::parser::parse_slash_commands;

/// A slash command: `/name arg1 arg2 ...`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashCommand {
    pub name: String,
    pub args: Vec<String>,
}

/// A slash command together with where it was issued and by whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandContext {
    pub command: String,
    pub args: Vec<String>,
    pub issuer: String,
    pub repo: RepoId,
    pub issue: IssueNumber,
    pub raw_body: String,
}

impl CommandContext {
    /// Builds one context per command found in the comment body.
    pub fn from_comment(event: &IssueCommentEvent) -> Vec<CommandContext> {
        parse_slash_commands(&event.body)
            .into_iter()
            .map(|cmd| CommandContext {
                command: cmd.name,
                args: cmd.args,
                issuer: event.author_login.clone(),
                repo: event.repo.clone(),
                issue: event.issue_number,
                raw_body: event.body.clone(),
            })
            .collect()
    }

    /// Records the command under an `otto.slash_command` span and returns the span.
    pub fn log(&self) -> Span {
        let span = info_span!(
            "otto.slash_command",
            command = %self.command,
            args = ?self.args,
            issuer = %self.issuer,
            repo = %self.repo,
            issue = self.issue.0,
        );
        span.in_scope(|| info!("slash command received"));
        span
    }
}
