//! Logging setup and metric helpers.
//!
//! Metrics go through the `metrics` facade; without an installed recorder
//! every helper here is a no-op.

use std::io::Write;

use metrics::{counter, histogram};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{LogConfig, LogFormat};

/// Handle returned by [`init`]; flushes buffered output on shutdown.
#[derive(Debug, Default)]
pub struct Telemetry {
    installed: bool,
}

impl Telemetry {
    /// Whether this call installed the global subscriber.
    pub fn installed(&self) -> bool {
        self.installed
    }

    pub fn shutdown(&self) {
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
    }
}

/// Installs the global tracing subscriber. `RUST_LOG` overrides
/// `config.level`. A second call leaves the first subscriber in place.
pub fn init(config: &LogConfig) -> Telemetry {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .is_ok(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .is_ok(),
    };
    Telemetry { installed }
}

// ─── Server ───

pub fn record_request(handler: &'static str) {
    counter!("otto.server.requests_total", 1, "handler" => handler);
}

pub fn record_webhook(event_type: &str) {
    counter!("otto.server.webhooks_total", 1, "event_type" => event_type.to_string());
}

pub fn record_server_error(handler: &'static str, err_type: &'static str) {
    counter!("otto.server.errors_total", 1, "handler" => handler, "err_type" => err_type);
}

pub fn record_request_latency(handler: &'static str, millis: f64) {
    histogram!("otto.server.request_latency_ms", millis, "handler" => handler);
}

// ─── Modules ───

pub fn record_module_error(module: &str, kind: &'static str) {
    counter!("otto.module.errors_total", 1, "module" => module.to_string(), "kind" => kind);
}

pub fn record_command(module: &str, command: &'static str) {
    counter!("otto.module.commands_total", 1, "module" => module.to_string(), "command" => command);
}

/// Time from assignment to acknowledgement.
pub fn record_ack_latency(schedule: &str, millis: f64) {
    histogram!("otto.module.ack_latency_ms", millis, "schedule" => schedule.to_string());
}
