//! Feature modules and the machinery that feeds them events.
//!
//! A module is anything that reacts to webhook events. Every module has a
//! name and an event handler; initialization and shutdown are optional
//! capabilities. The three are bundled into a [`ModuleDescriptor`] and handed
//! to the [`ModuleRegistry`], which the [`Dispatcher`] reads from.
//!
//! ```text
//! POST /webhook ──► verify ──► decode ──► Dispatcher ──┬──► module A (own task)
//!                                   │                  ├──► module B (own task)
//!                                   ▼                  └──► module C (own task)
//!                              200 OK (immediately)
//! ```

pub mod dispatch;
pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::app::AppHandle;
use crate::github::PlatformError;
use crate::oncall::RotationError;
use crate::storage::StorageError;
use crate::webhooks::WebhookEvent;

pub use dispatch::Dispatcher;
pub use registry::{ModuleRegistry, RegistryError};

/// A verified, decoded delivery as handed to each module.
///
/// Cloning is cheap: the decoded event and the raw body are shared.
#[derive(Debug, Clone)]
pub struct DispatchedEvent {
    /// Value of the `X-GitHub-Event` header.
    pub event_type: String,
    pub event: Arc<WebhookEvent>,
    /// The exact bytes that were signed.
    pub raw: Bytes,
}

impl DispatchedEvent {
    pub fn new(event_type: impl Into<String>, event: WebhookEvent, raw: Bytes) -> Self {
        DispatchedEvent {
            event_type: event_type.into(),
            event: Arc::new(event),
            raw,
        }
    }
}

/// Errors a module may return from any of its hooks.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("rotation error: {0}")]
    Rotation(#[from] RotationError),

    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("invalid module configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Event handling. The only required capability.
#[async_trait]
pub trait Module: Send + Sync {
    /// Unique name; the registry key.
    fn name(&self) -> &str;

    /// Handles one event. Errors are logged by the dispatcher and go no further.
    async fn handle_event(&self, event: &DispatchedEvent) -> Result<(), ModuleError>;
}

/// Optional startup hook, run once before the listener accepts traffic.
#[async_trait]
pub trait ModuleInitializer: Send + Sync {
    async fn initialize(&self, app: &AppHandle) -> Result<(), ModuleError>;
}

/// Optional shutdown hook, run once during graceful shutdown.
#[async_trait]
pub trait ModuleShutdowner: Send + Sync {
    async fn shutdown(&self) -> Result<(), ModuleError>;
}

/// A module together with whichever optional capabilities it provides.
#[derive(Clone)]
pub struct ModuleDescriptor {
    pub name: String,
    pub handler: Arc<dyn Module>,
    pub initializer: Option<Arc<dyn ModuleInitializer>>,
    pub shutdowner: Option<Arc<dyn ModuleShutdowner>>,
}

impl ModuleDescriptor {
    /// A module with only an event handler.
    pub fn new(handler: Arc<dyn Module>) -> Self {
        ModuleDescriptor {
            name: handler.name().to_string(),
            handler,
            initializer: None,
            shutdowner: None,
        }
    }

    pub fn with_initializer(mut self, initializer: Arc<dyn ModuleInitializer>) -> Self {
        self.initializer = Some(initializer);
        self
    }

    pub fn with_shutdowner(mut self, shutdowner: Arc<dyn ModuleShutdowner>) -> Self {
        self.shutdowner = Some(shutdowner);
        self
    }

    /// A module implementing all three capabilities.
    pub fn full<M>(module: Arc<M>) -> Self
    where
        M: Module + ModuleInitializer + ModuleShutdowner + 'static,
    {
        ModuleDescriptor::new(module.clone())
            .with_initializer(module.clone())
            .with_shutdowner(module)
    }
}

impl std::fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("initializer", &self.initializer.is_some())
            .field("shutdowner", &self.shutdowner.is_some())
            .finish()
    }
}
