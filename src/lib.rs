//! otto - a webhook-driven GitHub bot for on-call rotation.
//!
//! Verified webhook deliveries are fanned out to independent feature modules.
//! The bundled `oncall` module turns issues and `/oncall` comments into tasks
//! and rotates them through schedules of responders.

pub mod app;
pub mod commands;
pub mod config;
pub mod github;
pub mod modules;
pub mod oncall;
pub mod server;
pub mod storage;
pub mod telemetry;
pub mod types;
pub mod webhooks;

#[cfg(test)]
pub mod test_utils;
