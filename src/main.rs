use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use otto::app::App;
use otto::config::AppConfig;
use otto::modules::ModuleDescriptor;
use otto::oncall::OnCallModule;

/// Webhook-driven on-call automation for GitHub.
#[derive(Debug, Parser)]
#[command(name = "otto", version, about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, env = "OTTO_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Listen port, overriding the configuration file.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    let shutdown_timeout = config.shutdown_timeout();

    let app = App::new(config).await.context("starting otto")?;
    app.register(ModuleDescriptor::full(Arc::new(OnCallModule::new())))
        .await?;

    let addr = app.start().await.context("starting otto")?;
    info!(%addr, "otto is running");

    wait_for_signal().await;
    info!("Shutdown signal received");

    match tokio::time::timeout(shutdown_timeout, app.shutdown()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!(error = %e, "Shutdown finished with errors");
            Err(e.into())
        }
        Err(_) => {
            warn!(timeout_secs = shutdown_timeout.as_secs(), "Shutdown timed out");
            anyhow::bail!("shutdown timed out after {shutdown_timeout:?}")
        }
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
