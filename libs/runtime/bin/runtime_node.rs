//! Runtime node binary - boots one runtime process
//!
//! Usage:
//!   runtime_node --config config/runtime.toml
//!   runtime_node --config config/runtime.toml --environment staging --json-logs

use anyhow::{Context, Result};
use clap::Parser;
use remote_runtime::{ActiveRuntime, Certificate, InMemoryNaming, RemoteRuntime};
use runtime_config::RuntimeConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "runtime_node")]
#[command(about = "Remote runtime process")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment overlay under config/environments/
    #[arg(short, long)]
    environment: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let config = load(&args).map_err(|e| {
        error!("Failed to load configuration: {:#}", e);
        e
    })?;
    info!(
        runtime = %config.runtime.name,
        host = %config.runtime.host,
        port = config.runtime.port,
        nodes = config.nodes.len(),
        "Loaded runtime configuration"
    );

    let naming = InMemoryNaming::new();
    let mut builder = ActiveRuntime::builder(config.clone(), Arc::new(naming.clone()));
    if let Some(path) = &config.security.certificate_path {
        builder = builder.certificate(read_certificate(path, &config.runtime.name)?);
    }

    let runtime = builder.start().await.context("Failed to start runtime")?;
    info!(url = %runtime.url(), "Runtime ready");

    let mut events = runtime.events().subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!(target: "runtime_events", "{}", json),
                    Err(e) => warn!("Failed to encode event: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install CTRL+C signal handler")?;
    info!("Received shutdown signal");

    let report = runtime.kill_runtime().await?;
    if report.is_clean() {
        info!(%report, "Shutdown complete");
    } else {
        for failure in report.nodes.failures.iter().chain(&report.virtual_nodes.failures) {
            warn!(failed = %failure.target, error = %failure.error, "Cleanup failure");
        }
        if let Err(e) = &report.runtime {
            warn!(runtime = %runtime.url(), error = %e, "Runtime left bound in registry");
        }
    }

    event_log.abort();
    Ok(())
}

fn load(args: &Args) -> Result<RuntimeConfig> {
    match &args.config {
        Some(path) => RuntimeConfig::load(Some(path.as_path()), args.environment.as_deref()),
        None => {
            warn!("No configuration file given, using defaults");
            let config = RuntimeConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn read_certificate(path: &Path, runtime_name: &str) -> Result<Certificate> {
    let der = std::fs::read(path)
        .with_context(|| format!("Failed to read certificate {}", path.display()))?;
    let subject = format!("CN={}", runtime_name);
    Ok(Certificate {
        issuer: subject.clone(),
        subject,
        der: der.into(),
    })
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(args.log_level.to_lowercase()))
        .context("Invalid log level")?;

    if args.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    Ok(())
}
