//! HTTP server.
//!
//! # Endpoints
//!
//! - `POST /webhook` - Accepts GitHub webhook deliveries, verifies them,
//!   hands them to the [`Dispatcher`] and returns 200 without waiting for
//!   modules to finish
//! - `GET /healthz` - Returns 200 if the server is running

use std::sync::Arc;

use crate::modules::Dispatcher;

pub mod health;
pub mod webhook;

pub use health::health_handler;
pub use webhook::{WebhookError, webhook_handler};

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Webhook secret for HMAC-SHA256 signature verification.
    webhook_secret: Vec<u8>,

    dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(webhook_secret: impl Into<Vec<u8>>, dispatcher: Arc<Dispatcher>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                webhook_secret: webhook_secret.into(),
                dispatcher,
            }),
        }
    }

    pub fn webhook_secret(&self) -> &[u8] {
        &self.inner.webhook_secret
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/healthz", get(health_handler))
        .with_state(app_state)
}

#[cfg(test)]
mod integration_tests {
    use std::time::Duration;

    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::modules::{ModuleDescriptor, ModuleRegistry};
    use crate::test_utils::RecordingModule;
    use crate::webhooks::{WebhookEvent, compute_signature, format_signature_header};

    const SECRET: &[u8] = b"test-secret";

    async fn test_state(modules: &[Arc<RecordingModule>]) -> AppState {
        let registry = Arc::new(ModuleRegistry::new());
        for module in modules {
            registry
                .register(ModuleDescriptor::new(module.clone()))
                .await
                .unwrap();
        }
        AppState::new(SECRET, Arc::new(Dispatcher::new(registry)))
    }

    fn comment_payload() -> serde_json::Value {
        serde_json::json!({
            "action": "created",
            "issue": { "number": 12, "title": "Broken", "body": null },
            "comment": { "id": 99, "body": "/oncall status", "user": { "login": "carol" } },
            "repository": { "name": "hello-world", "owner": { "login": "octocat" } },
            "sender": { "login": "carol" }
        })
    }

    /// Creates a webhook request signed with `secret`.
    fn webhook_request(secret: &[u8], event_type: &str, body: &serde_json::Value) -> Request<Body> {
        let body_bytes = serde_json::to_vec(body).unwrap();
        let signature = compute_signature(&body_bytes, secret);

        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header("x-github-event", event_type)
            .header("x-hub-signature-256", format_signature_header(&signature))
            .body(Body::from(body_bytes))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    // ─── Health endpoint ───

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = build_router(test_state(&[]).await);

        let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
    }

    // ─── Webhook endpoint ───

    #[tokio::test]
    async fn valid_webhook_is_dispatched_to_every_module() {
        let a = RecordingModule::new("a");
        let b = RecordingModule::new("b");
        let state = test_state(&[a.clone(), b.clone()]).await;
        let app = build_router(state.clone());

        let payload = comment_payload();
        let response = app
            .oneshot(webhook_request(SECRET, "issue_comment", &payload))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");

        assert!(state.dispatcher().drain(Duration::from_secs(5)).await);
        for module in [&a, &b] {
            let events = module.events();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].event_type, "issue_comment");
            assert_eq!(events[0].raw.as_ref(), serde_json::to_vec(&payload).unwrap().as_slice());
            assert!(matches!(events[0].event.as_ref(), WebhookEvent::IssueComment(c) if c.body == "/oncall status"));
        }
    }

    #[tokio::test]
    async fn unknown_event_type_is_still_dispatched() {
        let module = RecordingModule::new("m");
        let state = test_state(&[module.clone()]).await;
        let app = build_router(state.clone());

        let response = app
            .oneshot(webhook_request(SECRET, "star", &serde_json::json!({"action": "created"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert!(state.dispatcher().drain(Duration::from_secs(5)).await);
        assert!(matches!(module.events()[0].event.as_ref(), WebhookEvent::Other(_)));
    }

    #[tokio::test]
    async fn wrong_secret_returns_401() {
        let module = RecordingModule::new("m");
        let state = test_state(&[module.clone()]).await;
        let app = build_router(state.clone());

        let response = app
            .oneshot(webhook_request(b"wrong-secret", "issue_comment", &comment_payload()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(state.dispatcher().drain(Duration::from_secs(1)).await);
        assert!(module.events().is_empty());
    }

    #[tokio::test]
    async fn missing_signature_returns_401() {
        let app = build_router(test_state(&[]).await);

        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("x-github-event", "ping")
            .body(Body::from("{}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_event_header_returns_400() {
        let app = build_router(test_state(&[]).await);

        let body = b"{}".to_vec();
        let signature = compute_signature(&body, SECRET);
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("x-hub-signature-256", format_signature_header(&signature))
            .body(Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn undecodable_payload_returns_400() {
        let module = RecordingModule::new("m");
        let state = test_state(&[module.clone()]).await;
        let app = build_router(state.clone());

        // Signed correctly, but missing the fields an issue_comment needs.
        let response = app
            .oneshot(webhook_request(SECRET, "issue_comment", &serde_json::json!({"action": "created"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.dispatcher().drain(Duration::from_secs(1)).await);
        assert!(module.events().is_empty());
    }

    #[tokio::test]
    async fn failing_module_does_not_affect_response() {
        let failing = RecordingModule::failing("broken");
        let ok = RecordingModule::new("ok");
        let state = test_state(&[failing.clone(), ok.clone()]).await;
        let app = build_router(state.clone());

        let response = app
            .oneshot(webhook_request(SECRET, "issue_comment", &comment_payload()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert!(state.dispatcher().drain(Duration::from_secs(5)).await);
        assert_eq!(ok.events().len(), 1);
    }
}
