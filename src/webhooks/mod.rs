//! Inbound webhook handling: authentication and decoding.
//!
//! - [`signature`]: HMAC-SHA256 verification of delivery bodies
//! - [`events`]: typed event representations
//! - [`parser`]: payload decoding keyed by the `X-GitHub-Event` header

pub mod events;
pub mod parser;
pub mod signature;

pub use events::{
    CommentAction, IssueAction, IssueCommentEvent, IssuesEvent, OtherEvent, PingEvent,
    WebhookEvent,
};
pub use parser::{ParseError, parse_webhook};
pub use signature::{
    SIGNATURE_HEADER, compute_signature, format_signature_header, parse_signature_header,
    sign_payload, verify_signature,
};
