//! rtun - SSH tunneling made easy
//!
//! Forwards TCP connections in either direction over an SSH session:
//! expose a local service on a remote host, or reach a remote service
//! through a local port.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rtun::config::{ConfigManager, Credentials, Direction};
use rtun::{shutdown, Tunnel};

/// CLI arguments for rtun
#[derive(Parser, Debug)]
#[command(name = "rtun")]
#[command(about = "rtun - TCP forwarding over SSH")]
#[command(version)]
#[command(long_about = "
rtun - TCP forwarding over SSH

Forwards TCP connections in either direction over an SSH session.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  RTUN_SSH             - SSH server (e.g., deploy@bastion.example.com:22)
  RTUN_REMOTE          - Remote address (e.g., :2222)
  RTUN_LOCAL           - Local address (e.g., 127.0.0.1:8080)
  RTUN_DIRECTION       - local-to-remote or remote-to-local
  RTUN_CONNECT_TIMEOUT - Dial timeout (e.g., 10s)
  RTUN_IDLE_TIMEOUT    - Relay idle timeout (e.g., 5m)
  RTUN_BUFFER_SIZE     - Relay buffer size in bytes
  RTUN_LOG_LEVEL       - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "rtun.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// SSH server address (overrides config file)
    #[arg(short = 's', long, help = "SSH server (user@host:port)")]
    pub ssh: Option<String>,

    /// Remote network address (overrides config file)
    #[arg(short = 'r', long, help = "Remote address (host:port)")]
    pub remote: Option<String>,

    /// Local network address (overrides config file)
    #[arg(short = 'l', long, help = "Local address (host:port)")]
    pub local: Option<String>,

    /// Authentication: key:/path/to/key or a password
    #[arg(short = 'a', long, help = "Authentication (key:/path/to/key or password)")]
    pub auth: Option<String>,

    /// Forward local-to-remote: listen on the remote host, relay to local
    #[arg(short = 'L', long = "local-remote", conflicts_with = "remote_local")]
    pub local_remote: bool,

    /// Forward remote-to-local: listen locally, relay through the session
    #[arg(short = 'R', long = "remote-local", conflicts_with = "local_remote")]
    pub remote_local: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    init_tracing(&args)?;

    info!("Starting rtun v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        info!("Config file not found, checking environment variables");
        ConfigManager::load_from_env()?
    };

    let direction = if args.local_remote {
        Some(Direction::LocalToRemote)
    } else if args.remote_local {
        Some(Direction::RemoteToLocal)
    } else {
        None
    };

    // Apply CLI argument overrides (highest priority)
    config.merge_with_cli_args(
        args.ssh.as_deref(),
        args.remote.as_deref(),
        args.local.as_deref(),
        direction,
        args.auth.as_deref(),
    );

    // Final validation after all overrides
    config
        .validate()
        .context("Final configuration validation failed")?;
    let spec = config.forward_spec()?;

    // If validate-config flag is set, just validate and exit
    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Direction: {}", spec.direction);
        info!("  SSH server: {}", spec.ssh);
        info!("  Listen: {}", spec.listen);
        info!("  Target: {}", spec.target);
        info!("  Connect timeout: {:?}", config.relay.connect_timeout);
        info!("  Idle timeout: {:?}", config.relay.idle_timeout);
        info!("  Buffer size: {} bytes", config.relay.buffer_size);
        return Ok(());
    }

    let credentials = load_credentials(&config)?;
    let options = config.relay_options();

    let mut tunnel = Tunnel::start(spec, &credentials, options)
        .await
        .context("Failed to start tunnel")?;

    info!("Tunnel established, press Ctrl+C or send SIGTERM/SIGINT to stop");

    let outcome = tokio::select! {
        signal = shutdown::wait_for_signal() => {
            if let Err(e) = signal {
                error!("Error waiting for shutdown signal: {}", e);
            }
            Ok(())
        }
        ended = tunnel.wait() => ended,
    };

    info!("Initiating graceful shutdown...");
    tunnel.stop().await;
    info!("Tunnel shutdown complete");

    outcome.context("Tunnel failed")
}

/// Turn the auth configuration into credential material. Reading the key file
/// happens here; the tunnel core only ever sees the PEM text.
fn load_credentials(config: &rtun::Config) -> Result<Credentials> {
    if let Some(path) = &config.auth.key_path {
        let pem = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read private key: {}", path.display()))?;
        return Ok(Credentials::from_key(pem));
    }
    if let Some(password) = &config.auth.password {
        return Ok(Credentials::from_password(password.clone()));
    }
    // Let the tunnel report the typed error.
    Ok(Credentials::default())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
