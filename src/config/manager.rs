//! Configuration Manager

use super::{Config, Direction};
use crate::Result;
use anyhow::{bail, Context};
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(ssh) = std::env::var("RTUN_SSH") {
            config.tunnel.ssh = Some(ssh);
        }

        if let Ok(remote) = std::env::var("RTUN_REMOTE") {
            config.tunnel.remote = Some(remote);
        }

        if let Ok(local) = std::env::var("RTUN_LOCAL") {
            config.tunnel.local = Some(local);
        }

        if let Ok(direction) = std::env::var("RTUN_DIRECTION") {
            config.tunnel.direction = Some(match direction.as_str() {
                "local-to-remote" => Direction::LocalToRemote,
                "remote-to-local" => Direction::RemoteToLocal,
                other => bail!(
                    "Invalid RTUN_DIRECTION: {} (expected local-to-remote or remote-to-local)",
                    other
                ),
            });
        }

        if let Ok(timeout) = std::env::var("RTUN_CONNECT_TIMEOUT") {
            config.relay.connect_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid RTUN_CONNECT_TIMEOUT: {}", timeout))?;
        }

        if let Ok(timeout) = std::env::var("RTUN_IDLE_TIMEOUT") {
            config.relay.idle_timeout = Some(
                humantime::parse_duration(&timeout)
                    .with_context(|| format!("Invalid RTUN_IDLE_TIMEOUT: {}", timeout))?,
            );
        }

        if let Ok(buffer_size) = std::env::var("RTUN_BUFFER_SIZE") {
            config.relay.buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid RTUN_BUFFER_SIZE: {}", buffer_size))?;
        }

        if let Ok(log_level) = std::env::var("RTUN_LOG_LEVEL") {
            config.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate configuration values. Endpoint presence and shape are checked
    /// separately by [`Config::forward_spec`], which reports typed errors.
    pub fn validate(&self) -> Result<()> {
        if self.relay.buffer_size < 1024 {
            bail!("relay.buffer_size must be at least 1024 bytes");
        }

        if self.relay.buffer_size > 1048576 {
            bail!("relay.buffer_size cannot exceed 1MB");
        }

        if self.relay.connect_timeout.as_secs() == 0 {
            bail!("relay.connect_timeout must be greater than 0");
        }

        if self.relay.connect_timeout.as_secs() > 300 {
            bail!("relay.connect_timeout cannot exceed 5 minutes");
        }

        if let Some(idle) = self.relay.idle_timeout {
            if idle.as_secs() == 0 {
                bail!("relay.idle_timeout must be greater than 0 when set");
            }
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            bail!(
                "log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Merge with CLI arguments (highest priority). The auth string follows
    /// the `key:/path/to/key` convention; anything else is a password.
    pub fn merge_with_cli_args(
        &mut self,
        ssh: Option<&str>,
        remote: Option<&str>,
        local: Option<&str>,
        direction: Option<Direction>,
        auth: Option<&str>,
    ) {
        if let Some(ssh) = ssh {
            self.tunnel.ssh = Some(ssh.to_string());
        }

        if let Some(remote) = remote {
            self.tunnel.remote = Some(remote.to_string());
        }

        if let Some(local) = local {
            self.tunnel.local = Some(local.to_string());
        }

        if let Some(direction) = direction {
            self.tunnel.direction = Some(direction);
            tracing::debug!("CLI override: direction set to {}", direction);
        }

        if let Some(auth) = auth {
            match auth.strip_prefix("key:") {
                Some(path) => self.auth.key_path = Some(path.into()),
                None => self.auth.password = Some(auth.to_string()),
            }
        }
    }
}
