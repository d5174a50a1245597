//! Health check endpoint for liveness probes.

use axum::http::StatusCode;

use crate::telemetry;

/// Returns 200 OK with the text "ok". No authentication.
pub async fn health_handler() -> (StatusCode, &'static str) {
    telemetry::record_request("healthz");
    (StatusCode::OK, "ok")
}
