//! Process lifecycle.
//!
//! Startup: telemetry → storage → module initialization (in registration
//! order, first failure aborts) → HTTP listener.
//!
//! Shutdown: stop the listener → drain in-flight dispatches → shut down all
//! modules in parallel → flush telemetry → close storage. Every step runs
//! even if an earlier one failed; the first module shutdown error is
//! returned. The caller bounds the whole thing with its own timeout.

use std::net::{Ipv4Addr, SocketAddr};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, ConfigError};
use crate::github::{OctocrabPlatform, PlatformClient, PlatformError};
use crate::modules::{
    Dispatcher, ModuleDescriptor, ModuleError, ModuleRegistry, ModuleShutdowner, RegistryError,
};
use crate::server::{AppState, build_router};
use crate::storage::{Storage, StorageError};
use crate::telemetry::{self, Telemetry};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to initialize module {module}: {source}")]
    ModuleInit {
        module: String,
        #[source]
        source: ModuleError,
    },

    #[error("failed to shut down module {module}: {source}")]
    ModuleShutdown {
        module: String,
        #[source]
        source: ModuleError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("listener error: {0}")]
    Listener(#[source] std::io::Error),

    #[error("already started")]
    AlreadyStarted,
}

/// What a module's initializer gets to work with.
#[derive(Clone)]
pub struct AppHandle {
    pub config: Arc<AppConfig>,
    pub storage: Storage,
    pub platform: Arc<dyn PlatformClient>,
}

impl AppHandle {
    /// The module's block under `modules.<name>`, or its default.
    pub fn module_config<T>(&self, name: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + Default,
    {
        self.config.module_config(name)
    }
}

impl std::fmt::Debug for AppHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppHandle")
            .field("config", &self.config)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

pub struct App {
    handle: AppHandle,
    telemetry: Telemetry,
    registry: Arc<ModuleRegistry>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
    server: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
}

impl App {
    /// Installs telemetry, opens storage, and builds the GitHub client.
    pub async fn new(config: AppConfig) -> Result<Self, AppError> {
        let telemetry = telemetry::init(&config.log);
        config.log_summary();

        let storage = Storage::connect(&config.db_path).await?;
        let platform = Arc::new(OctocrabPlatform::from_token(config.github_token.as_deref())?);
        Ok(Self::with_parts(config, telemetry, storage, platform))
    }

    /// Assembles an app from already-built parts.
    pub fn with_parts(
        config: AppConfig,
        telemetry: Telemetry,
        storage: Storage,
        platform: Arc<dyn PlatformClient>,
    ) -> Self {
        let registry = Arc::new(ModuleRegistry::new());
        let dispatcher =
            Arc::new(Dispatcher::new(registry.clone()).with_handler_timeout(config.handler_timeout()));

        App {
            handle: AppHandle {
                config: Arc::new(config),
                storage,
                platform,
            },
            telemetry,
            registry,
            dispatcher,
            cancel: CancellationToken::new(),
            server: Mutex::new(None),
        }
    }

    pub fn handle(&self) -> &AppHandle {
        &self.handle
    }

    pub fn config(&self) -> &AppConfig {
        &self.handle.config
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub async fn register(&self, descriptor: ModuleDescriptor) -> Result<(), AppError> {
        Ok(self.registry.register(descriptor).await?)
    }

    pub fn router(&self) -> axum::Router {
        build_router(AppState::new(
            self.handle.config.web_hook_secret.as_bytes(),
            self.dispatcher.clone(),
        ))
    }

    /// Initializes modules, then listens on the configured port.
    pub async fn start(&self) -> Result<SocketAddr, AppError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.handle.config.port));
        self.initialize_modules().await?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| AppError::Bind { addr, source })?;
        self.serve(listener).await
    }

    /// Initializes modules, then serves on an already-bound listener.
    pub async fn start_on(&self, listener: TcpListener) -> Result<SocketAddr, AppError> {
        self.initialize_modules().await?;
        self.serve(listener).await
    }

    async fn initialize_modules(&self) -> Result<(), AppError> {
        if self.registry.is_empty().await {
            warn!("No modules registered; webhooks will be accepted and dropped");
        }
        for descriptor in self.registry.snapshot().await {
            let Some(initializer) = &descriptor.initializer else {
                continue;
            };
            initializer
                .initialize(&self.handle)
                .await
                .map_err(|source| {
                    error!(module = %descriptor.name, error = %source, "Module initialization failed");
                    AppError::ModuleInit {
                        module: descriptor.name.clone(),
                        source,
                    }
                })?;
            info!(module = %descriptor.name, "Module initialized");
        }
        Ok(())
    }

    async fn serve(&self, listener: TcpListener) -> Result<SocketAddr, AppError> {
        let mut server = self.server.lock().await;
        if server.is_some() {
            return Err(AppError::AlreadyStarted);
        }

        let addr = listener.local_addr().map_err(AppError::Listener)?;
        let router = self.router();
        let cancel = self.cancel.clone();
        *server = Some(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await
        }));

        info!(%addr, "Listening for webhooks");
        Ok(addr)
    }

    /// Runs every shutdown step and returns the first module error.
    pub async fn shutdown(&self) -> Result<(), AppError> {
        info!("Shutting down");

        self.cancel.cancel();
        let server = self.server.lock().await.take();
        if let Some(server) = server {
            match server.await {
                Ok(Ok(())) => debug!("Listener stopped"),
                Ok(Err(e)) => warn!(error = %e, "Listener stopped with an error"),
                Err(e) => warn!(error = %e, "Listener task failed"),
            }
        }

        if !self.dispatcher.drain(self.handle.config.drain_timeout()).await {
            warn!("Proceeding with shutdown while module handlers are still running");
        }

        let result = shutdown_modules(&self.registry.snapshot().await).await;

        self.telemetry.shutdown();
        self.handle.storage.close().await;

        info!(ok = result.is_ok(), "Shutdown complete");
        result
    }
}

/// Shuts every module down concurrently and waits for all of them.
async fn shutdown_modules(modules: &[ModuleDescriptor]) -> Result<(), AppError> {
    let shutdowns = modules.iter().filter_map(|descriptor| {
        let shutdowner: Arc<dyn ModuleShutdowner> = descriptor.shutdowner.clone()?;
        let name = descriptor.name.clone();
        Some(async move {
            let result = match AssertUnwindSafe(shutdowner.shutdown()).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(ModuleError::Other("shutdown panicked".into())),
            };
            (name, result)
        })
    });

    let mut first_error = None;
    for (module, result) in futures::future::join_all(shutdowns).await {
        match result {
            Ok(()) => debug!(module = %module, "Module shut down"),
            Err(source) => {
                error!(module = %module, error = %source, "Module shutdown failed");
                first_error.get_or_insert(AppError::ModuleShutdown { module, source });
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}
