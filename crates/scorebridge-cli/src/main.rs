#![deny(unsafe_code)]

//! scorebridge: serves exchange data to local clients over a Unix socket.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;
use tracing_subscriber::EnvFilter;

use scorebridge_config::{BackendFailurePolicy, BridgeConfig, ConfigError};
use scorebridge_core::build_info::LONG_VERSION;
use scorebridge_core::{GrpcExchange, LifecycleController, ShutdownHandle};

/// Bridge local Unix socket clients to a remote gRPC exchange service.
#[derive(Debug, Parser)]
#[command(name = "scorebridge", version = LONG_VERSION, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "scorebridge.toml")]
    config: PathBuf,

    /// Unix socket to serve local clients on [default: /tmp/scorebridge.sock].
    #[arg(long, value_name = "PATH")]
    socket_path: Option<PathBuf>,

    /// gRPC address of the exchange service, e.g. 10.0.0.5:50051.
    #[arg(long, value_name = "ADDR")]
    grpc_address: Option<String>,

    /// Enable debug output.
    #[arg(long)]
    debug: bool,

    /// What a failed exchange fetch does to the bridge.
    #[arg(long, value_name = "POLICY", value_enum)]
    on_backend_failure: Option<BackendFailurePolicy>,

    /// Print the resolved configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    /// Layer command-line flags over the file configuration.
    fn apply_overrides(&self, mut config: BridgeConfig) -> Result<BridgeConfig> {
        if let Some(path) = &self.socket_path {
            config.socket_path = path.clone();
        }
        if let Some(address) = &self.grpc_address {
            // A blank flag counts as no address at all.
            config.backend.address =
                Some(address.trim().to_string()).filter(|address| !address.is_empty());
        }
        if let Some(policy) = self.on_backend_failure {
            config.backend.on_failure = policy;
        }
        if self.debug {
            config.logging.level = "debug".to_string();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("scorebridge: {e:#}");
            if matches!(
                e.downcast_ref::<ConfigError>(),
                Some(ConfigError::MissingBackendAddress)
            ) {
                eprintln!("\n{}", Cli::command().render_help());
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.apply_overrides(load_config(&cli.config).await?)?;

    if cli.print_config {
        let rendered = toml::to_string_pretty(&config).context("failed to render configuration")?;
        println!("{rendered}");
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    if !cli.config.exists() {
        info!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    // Checked here as well as in the controller so the usage text can be shown
    // before anything is bound.
    config.backend_address()?;

    let timeout = Duration::from_secs(config.backend.connect_timeout_secs);
    let controller = LifecycleController::new(config);
    spawn_signal_listener(controller.shutdown_handle())?;

    controller
        .run(|address| GrpcExchange::connect(address, timeout))
        .await?;
    Ok(())
}

async fn load_config(path: &Path) -> Result<BridgeConfig> {
    if path.exists() {
        BridgeConfig::load(path)
            .await
            .with_context(|| format!("failed to load config from {}", path.display()))
    } else {
        Ok(BridgeConfig::default())
    }
}

/// Turn SIGINT or SIGTERM into a shutdown request.
///
/// Both handlers are installed before this returns, so a signal that arrives
/// once the socket is bound is never missed.
fn spawn_signal_listener(handle: ShutdownHandle) -> Result<()> {
    let mut interrupt =
        signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("Interrupt received"),
            _ = terminate.recv() => info!("Terminate signal received"),
        }
        handle.request_shutdown();
    });
    Ok(())
}
