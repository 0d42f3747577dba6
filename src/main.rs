#![forbid(unsafe_code)]

//! `stdio-exchange`: serve one NDJSON request/response endpoint on
//! stdin/stdout.
//!
//! Stdout is the protocol channel, so all diagnostics go to stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use stdio_exchange::diagnostics::DiagnosticHandler;
use stdio_exchange::{AppError, EndpointConfig, FileEnvProvider, Result, StdioEndpoint};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "stdio-exchange", about = "NDJSON request/response endpoint on stdio", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dotenv file re-read before every exchange (overrides `env_file`).
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let result = runtime.block_on(run(args));

    // A pending stdin read parks a blocking thread that never returns.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => EndpointConfig::load_from_path(path)?,
        None => EndpointConfig::default(),
    };
    if let Some(env_file) = args.env_file {
        config.env_file = Some(env_file);
    }
    info!(?config, "configuration loaded");

    let mut endpoint = StdioEndpoint::new(config.clone(), Arc::new(DiagnosticHandler));
    if let Some(path) = config.env_file {
        let provider = FileEnvProvider::new(path);
        info!(path = %provider.path().display(), "environment reloaded from file before each exchange");
        endpoint = endpoint.with_env_provider(Arc::new(provider));
    }

    let ct = CancellationToken::new();
    endpoint.start(tokio::io::stdin(), tokio::io::stdout(), ct.clone())?;

    tokio::select! {
        () = endpoint.wait() => {
            info!("peer closed the stream");
        }
        () = shutdown_signal() => {
            info!("shutdown signal received");
            ct.cancel();
            endpoint.wait().await;
        }
    }

    info!("stdio-exchange shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
