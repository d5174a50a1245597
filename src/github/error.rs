//! Platform API error classification.
//!
//! Calls are not retried, but the classification still decides how loudly a
//! failure is reported: transient failures (5xx, rate limits, network) are
//! expected noise, while permanent ones (most 4xx) usually mean a
//! misconfigured token or a missing repository permission.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformErrorKind {
    /// Likely to succeed later without intervention.
    Transient,
    /// Needs a configuration or permission change.
    Permanent,
}

#[derive(Debug, Error)]
pub struct PlatformError {
    pub kind: PlatformErrorKind,
    pub status_code: Option<u16>,
    pub message: String,
    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "platform API error (HTTP {code}): {}", self.message),
            None => write!(f, "platform API error: {}", self.message),
        }
    }
}

impl PlatformError {
    /// An error raised locally, without an HTTP exchange.
    pub fn permanent(message: impl Into<String>) -> Self {
        PlatformError {
            kind: PlatformErrorKind::Permanent,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == PlatformErrorKind::Transient
    }

    /// Classifies an octocrab error by status code, then by message.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let (status_code, message) = match &err {
            octocrab::Error::GitHub { source, .. } => {
                (Some(source.status_code.as_u16()), source.message.clone())
            }
            other => (None, other.to_string()),
        };

        PlatformError {
            kind: classify(status_code, &message),
            status_code,
            message,
            source: Some(err),
        }
    }
}

fn classify(status_code: Option<u16>, message: &str) -> PlatformErrorKind {
    match status_code {
        Some(429) => PlatformErrorKind::Transient,
        Some(403) if is_rate_limit_message(message) => PlatformErrorKind::Transient,
        Some(code) if (500..600).contains(&code) => PlatformErrorKind::Transient,
        Some(_) => PlatformErrorKind::Permanent,
        None if is_network_message(message) => PlatformErrorKind::Transient,
        None => PlatformErrorKind::Permanent,
    }
}

fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit") || lower.contains("abuse detection")
}

fn is_network_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["timeout", "timed out", "connection", "dns", "network"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_rate_limits_are_transient() {
        assert_eq!(classify(Some(502), "bad gateway"), PlatformErrorKind::Transient);
        assert_eq!(classify(Some(429), ""), PlatformErrorKind::Transient);
        assert_eq!(
            classify(Some(403), "API rate limit exceeded for installation"),
            PlatformErrorKind::Transient
        );
    }

    #[test]
    fn client_errors_are_permanent() {
        assert_eq!(classify(Some(404), "Not Found"), PlatformErrorKind::Permanent);
        assert_eq!(
            classify(Some(403), "Resource not accessible by integration"),
            PlatformErrorKind::Permanent
        );
        assert_eq!(classify(Some(422), "Validation Failed"), PlatformErrorKind::Permanent);
    }

    #[test]
    fn network_failures_without_status_are_transient() {
        assert_eq!(classify(None, "connection reset by peer"), PlatformErrorKind::Transient);
        assert_eq!(classify(None, "request timed out"), PlatformErrorKind::Transient);
        assert_eq!(classify(None, "invalid header value"), PlatformErrorKind::Permanent);
    }

    #[test]
    fn display_includes_status_when_known() {
        let err = PlatformError {
            kind: PlatformErrorKind::Permanent,
            status_code: Some(404),
            message: "Not Found".into(),
            source: None,
        };
        assert_eq!(err.to_string(), "platform API error (HTTP 404): Not Found");
        assert_eq!(
            PlatformError::permanent("no token").to_string(),
            "platform API error: no token"
        );
    }
}
