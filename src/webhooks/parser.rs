//! Webhook payload decoding.
//!
//! The event type comes from the `X-GitHub-Event` header; the body is decoded
//! according to it. Unknown event types are not an error: any JSON object
//! decodes to [`WebhookEvent::Other`]. A body that is not JSON, or that lacks
//! fields a typed event requires, is a [`ParseError`].

use serde::Deserialize;
use thiserror::Error;

use crate::types::{IssueNumber, RepoId};

use super::events::{
    CommentAction, IssueAction, IssueCommentEvent, IssuesEvent, OtherEvent, PingEvent,
    WebhookEvent,
};

/// Error type for webhook decoding failures.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON deserialization failed (includes missing required fields).
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// A field carries a value the bot does not understand.
    #[error("invalid field value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Decodes a webhook payload into a typed event.
///
/// ```
/// use otto::webhooks::{parse_webhook, WebhookEvent};
///
/// let event = parse_webhook("deployment", br#"{"action":"created"}"#).unwrap();
/// assert!(matches!(event, WebhookEvent::Other(_)));
///
/// assert!(parse_webhook("issues", b"not json").is_err());
/// ```
pub fn parse_webhook(event_type: &str, payload: &[u8]) -> Result<WebhookEvent, ParseError> {
    match event_type {
        "ping" => parse_ping(payload).map(WebhookEvent::Ping),
        "issue_comment" => parse_issue_comment(payload).map(WebhookEvent::IssueComment),
        "issues" => parse_issues(payload).map(WebhookEvent::Issues),
        _ => parse_other(payload).map(WebhookEvent::Other),
    }
}

// ─── Raw payload shapes ───

#[derive(Debug, Deserialize)]
struct RawRepository {
    owner: RawUser,
    name: String,
}

impl RawRepository {
    fn into_repo_id(self) -> RepoId {
        RepoId::new(self.owner.login, self.name)
    }
}

#[derive(Debug, Deserialize)]
struct RawUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    name: String,
}

// ─── ping ───

#[derive(Debug, Deserialize)]
struct RawPingPayload {
    zen: Option<String>,
    hook_id: Option<u64>,
    repository: Option<RawRepository>,
}

fn parse_ping(payload: &[u8]) -> Result<PingEvent, ParseError> {
    let raw: RawPingPayload = serde_json::from_slice(payload)?;
    Ok(PingEvent {
        zen: raw.zen,
        hook_id: raw.hook_id,
        repo: raw.repository.map(RawRepository::into_repo_id),
    })
}

// ─── issue_comment ───

#[derive(Debug, Deserialize)]
struct RawIssueCommentPayload {
    action: String,
    comment: RawComment,
    issue: RawIssue,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    id: u64,
    body: Option<String>,
    user: RawUser,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    number: u64,
    #[serde(default)]
    title: String,
    body: Option<String>,
    #[serde(default)]
    labels: Vec<RawLabel>,
    // Present only when the issue is a pull request.
    pull_request: Option<serde_json::Value>,
}

fn parse_issue_comment(payload: &[u8]) -> Result<IssueCommentEvent, ParseError> {
    let raw: RawIssueCommentPayload = serde_json::from_slice(payload)?;

    let action = match raw.action.as_str() {
        "created" => CommentAction::Created,
        "edited" => CommentAction::Edited,
        "deleted" => CommentAction::Deleted,
        other => {
            return Err(ParseError::InvalidField {
                field: "action",
                value: other.to_string(),
            });
        }
    };

    Ok(IssueCommentEvent {
        repo: raw.repository.into_repo_id(),
        action,
        issue_number: IssueNumber(raw.issue.number),
        issue_title: raw.issue.title,
        is_pull_request: raw.issue.pull_request.is_some(),
        comment_id: raw.comment.id,
        body: raw.comment.body.unwrap_or_default(),
        author_login: raw.comment.user.login,
    })
}

// ─── issues ───

#[derive(Debug, Deserialize)]
struct RawIssuesPayload {
    action: String,
    issue: RawIssue,
    label: Option<RawLabel>,
    repository: RawRepository,
    sender: RawUser,
}

fn parse_issues(payload: &[u8]) -> Result<IssuesEvent, ParseError> {
    let raw: RawIssuesPayload = serde_json::from_slice(payload)?;

    Ok(IssuesEvent {
        repo: raw.repository.into_repo_id(),
        action: IssueAction::from_wire(&raw.action),
        issue_number: IssueNumber(raw.issue.number),
        title: raw.issue.title,
        body: raw.issue.body.unwrap_or_default(),
        labels: raw.issue.labels.into_iter().map(|l| l.name).collect(),
        label: raw.label.map(|l| l.name),
        sender_login: raw.sender.login,
    })
}

// ─── everything else ───

#[derive(Debug, Deserialize)]
struct RawOtherPayload {
    action: Option<String>,
    repository: Option<RawRepository>,
}

fn parse_other(payload: &[u8]) -> Result<OtherEvent, ParseError> {
    let raw: RawOtherPayload = serde_json::from_slice(payload)?;
    Ok(OtherEvent {
        action: raw.action,
        repo: raw.repository.map(RawRepository::into_repo_id),
    })
}
