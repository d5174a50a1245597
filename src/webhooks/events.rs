//! Typed webhook events.
//!
//! Only the fields the bot's modules consume are decoded. Everything else in
//! the payload stays available to modules through the raw bytes carried by
//! [`DispatchedEvent`](crate::modules::DispatchedEvent).
//!
//! | `X-GitHub-Event` | Variant                        |
//! |------------------|--------------------------------|
//! | `ping`           | [`WebhookEvent::Ping`]         |
//! | `issue_comment`  | [`WebhookEvent::IssueComment`] |
//! | `issues`         | [`WebhookEvent::Issues`]       |
//! | anything else    | [`WebhookEvent::Other`]        |

use crate::types::{IssueNumber, RepoId};

/// A decoded webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// Sent once when the hook is created.
    Ping(PingEvent),

    /// A comment on an issue or on a pull request's conversation tab.
    IssueComment(IssueCommentEvent),

    /// An issue was opened, closed, labeled, and so on.
    Issues(IssuesEvent),

    /// Any event type the bot has no typed representation for.
    Other(OtherEvent),
}

impl WebhookEvent {
    /// Returns the repository this event belongs to, if the payload names one.
    pub fn repo(&self) -> Option<&RepoId> {
        match self {
            WebhookEvent::Ping(e) => e.repo.as_ref(),
            WebhookEvent::IssueComment(e) => Some(&e.repo),
            WebhookEvent::Issues(e) => Some(&e.repo),
            WebhookEvent::Other(e) => e.repo.as_ref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingEvent {
    pub zen: Option<String>,
    pub hook_id: Option<u64>,
    pub repo: Option<RepoId>,
}

/// Action performed on an issue comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommentAction {
    Created,
    Edited,
    Deleted,
}

/// An issue or pull request comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueCommentEvent {
    pub repo: RepoId,
    pub action: CommentAction,
    pub issue_number: IssueNumber,
    pub issue_title: String,

    /// True when the "issue" is really a pull request.
    pub is_pull_request: bool,

    pub comment_id: u64,

    /// Comment text. Empty for `deleted` actions.
    pub body: String,

    pub author_login: String,
}

/// Action performed on an issue.
///
/// Actions the bot does not react to are kept verbatim in [`IssueAction::Other`]
/// rather than rejected, since the platform adds new ones over time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IssueAction {
    Opened,
    Edited,
    Closed,
    Reopened,
    Labeled,
    Unlabeled,
    Assigned,
    Unassigned,
    Other(String),
}

impl IssueAction {
    pub fn from_wire(action: &str) -> Self {
        match action {
            "opened" => IssueAction::Opened,
            "edited" => IssueAction::Edited,
            "closed" => IssueAction::Closed,
            "reopened" => IssueAction::Reopened,
            "labeled" => IssueAction::Labeled,
            "unlabeled" => IssueAction::Unlabeled,
            "assigned" => IssueAction::Assigned,
            "unassigned" => IssueAction::Unassigned,
            other => IssueAction::Other(other.to_string()),
        }
    }
}

/// An `issues` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuesEvent {
    pub repo: RepoId,
    pub action: IssueAction,
    pub issue_number: IssueNumber,
    pub title: String,
    pub body: String,

    /// All labels currently on the issue.
    pub labels: Vec<String>,

    /// The label added or removed, for `labeled`/`unlabeled` actions.
    pub label: Option<String>,

    pub sender_login: String,
}

/// An event without a typed representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtherEvent {
    pub action: Option<String>,
    pub repo: Option<RepoId>,
}
