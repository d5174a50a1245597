//! Webhook endpoint handler.
//!
//! Verifies the delivery's signature, decodes it, and hands it to the
//! dispatcher before returning 200 OK. Module handlers run afterwards, each
//! in its own task.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::rejection::BytesRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, warn};

use super::AppState;
use crate::modules::DispatchedEvent;
use crate::telemetry;
use crate::webhooks::{ParseError, SIGNATURE_HEADER, parse_webhook, verify_signature};

/// Header name for GitHub event type.
const HEADER_EVENT: &str = "x-github-event";
/// Header name for GitHub delivery ID. Only used for logging.
const HEADER_DELIVERY: &str = "x-github-delivery";

const HANDLER: &str = "webhook";

/// Errors that can occur when accepting a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// The request body could not be read.
    #[error("unreadable request body: {0}")]
    UnreadableBody(#[from] BytesRejection),

    /// Missing signature header.
    #[error("missing signature")]
    MissingSignature,

    /// Invalid signature.
    #[error("invalid signature")]
    InvalidSignature,

    /// Missing required header.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// The body does not decode as the announced event type.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] ParseError),
}

impl WebhookError {
    /// Label for the `err_type` metric.
    pub fn kind(&self) -> &'static str {
        match self {
            WebhookError::UnreadableBody(_) => "unreadable_body",
            WebhookError::MissingSignature => "missing_signature",
            WebhookError::InvalidSignature => "invalid_signature",
            WebhookError::MissingHeader(_) => "missing_header",
            WebhookError::InvalidPayload(_) => "invalid_payload",
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::MissingSignature | WebhookError::InvalidSignature => {
                StatusCode::UNAUTHORIZED
            }
            WebhookError::UnreadableBody(_)
            | WebhookError::MissingHeader(_)
            | WebhookError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        };

        (status, self.to_string()).into_response()
    }
}

/// Webhook handler.
///
/// # Request
///
/// - Method: POST
/// - Required headers:
///   - `X-GitHub-Event`: Event type (e.g., "issues", "issue_comment")
///   - `X-Hub-Signature-256`: HMAC-SHA256 signature of the payload
/// - Body: JSON webhook payload
///
/// # Response
///
/// - 200 OK: Event dispatched to modules
/// - 400 Bad Request: Unreadable body, missing event header, or undecodable payload
/// - 401 Unauthorized: Missing or invalid signature
pub async fn webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, &'static str), WebhookError> {
    let started = Instant::now();
    telemetry::record_request(HANDLER);

    let result = accept(&app_state, &headers, body).await;

    telemetry::record_request_latency(HANDLER, started.elapsed().as_secs_f64() * 1000.0);
    if let Err(e) = &result {
        warn!(
            delivery_id = header(&headers, HEADER_DELIVERY).unwrap_or("-"),
            error = %e,
            "Rejected webhook"
        );
        telemetry::record_server_error(HANDLER, e.kind());
    }
    result
}

async fn accept(
    app_state: &AppState,
    headers: &HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, &'static str), WebhookError> {
    let body = body?;

    // Verify the signature before any parsing.
    let signature = header(headers, SIGNATURE_HEADER).ok_or(WebhookError::MissingSignature)?;
    if !verify_signature(&body, signature, app_state.webhook_secret()) {
        return Err(WebhookError::InvalidSignature);
    }

    let event_type = header(headers, HEADER_EVENT).ok_or(WebhookError::MissingHeader(HEADER_EVENT))?;
    let event = parse_webhook(event_type, &body)?;
    telemetry::record_webhook(event_type);

    let delivered = app_state
        .dispatcher()
        .dispatch(DispatchedEvent::new(event_type, event, body))
        .await;

    debug!(
        delivery_id = header(headers, HEADER_DELIVERY).unwrap_or("-"),
        event_type,
        modules = delivered,
        "Webhook accepted"
    );
    Ok((StatusCode::OK, "ok"))
}

/// A header's value, if present and valid UTF-8.
fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_present() {
        let mut headers = HeaderMap::new();
        headers.insert("x-github-event", "issues".parse().unwrap());

        assert_eq!(header(&headers, HEADER_EVENT), Some("issues"));
    }

    #[test]
    fn header_missing() {
        assert_eq!(header(&HeaderMap::new(), HEADER_EVENT), None);
    }

    #[test]
    fn error_statuses() {
        let status = |e: WebhookError| e.into_response().status();

        assert_eq!(status(WebhookError::MissingSignature), StatusCode::UNAUTHORIZED);
        assert_eq!(status(WebhookError::InvalidSignature), StatusCode::UNAUTHORIZED);
        assert_eq!(status(WebhookError::MissingHeader(HEADER_EVENT)), StatusCode::BAD_REQUEST);

        let parse = parse_webhook("issues", b"nope").unwrap_err();
        assert_eq!(status(WebhookError::InvalidPayload(parse)), StatusCode::BAD_REQUEST);
    }
}
