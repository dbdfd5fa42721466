use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use devfm_core::{Gateway, GatewayConfig};

mod server;

#[derive(Parser, Debug)]
#[command(name = "devfm")]
#[command(about = "File manager backend with a privileged fallback for protected paths")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(long, env = "DEVFM_CONFIG_PATH", global = true)]
    config_path: Option<PathBuf>,

    /// Managed root directory (relative request paths resolve here)
    #[arg(long, env = "DEVFM_ROOT", global = true)]
    root: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:8080
    #[arg(long, env = "DEVFM_LISTEN", global = true)]
    listen: Option<String>,

    /// Never run privileged commands
    #[arg(long, env = "DEVFM_NO_ELEVATION", global = true)]
    no_elevation: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DEVFM_LOG_LEVEL", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the effective configuration as JSON and exit
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = load_config(&cli)?;

    if let Some(Commands::PrintConfig) = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    info!(
        "devfm v{} starting (root={}, elevation={})",
        env!("CARGO_PKG_VERSION"),
        config.managed_root.display(),
        if config.elevation_enabled { config.elevation_helper.as_str() } else { "off" },
    );
    if !config.managed_root.is_dir() {
        warn!("managed root {} is not a directory", config.managed_root.display());
    }

    let gateway = Arc::new(create_gateway(config)?);
    server::serve(gateway).await
}

/// Config file (or defaults when there is none), then CLI overrides.
fn load_config(cli: &Cli) -> Result<GatewayConfig> {
    let config_path = cli
        .config_path
        .clone()
        .unwrap_or_else(GatewayConfig::default_path);

    let mut config = if config_path.exists() {
        info!("loading config from {}", config_path.display());
        GatewayConfig::load(&config_path)?
    } else {
        info!("no config at {}, using defaults", config_path.display());
        GatewayConfig::default()
    };

    // CLI args override config file
    if let Some(root) = &cli.root {
        config.managed_root = root.clone();
    }
    if let Some(listen) = &cli.listen {
        config.listen_addr = listen.clone();
    }
    if cli.no_elevation {
        config.elevation_enabled = false;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[cfg(unix)]
fn create_gateway(config: GatewayConfig) -> Result<Gateway> {
    Ok(Gateway::unix(config))
}

#[cfg(not(unix))]
fn create_gateway(_config: GatewayConfig) -> Result<Gateway> {
    anyhow::bail!("the file manager backend is only supported on Unix hosts")
}
