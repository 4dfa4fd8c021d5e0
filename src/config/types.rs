//! Configuration Types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::TunnelError;
use crate::relay::RelayOptions;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub tunnel: TunnelConfig,
    pub auth: AuthConfig,
    pub relay: RelayConfig,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tunnel: TunnelConfig::default(),
            auth: AuthConfig::default(),
            relay: RelayConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Tunnel endpoints; every field can also arrive from the CLI.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub direction: Option<Direction>,
    /// SSH server address: `user@host:port`
    pub ssh: Option<String>,
    /// Address on the remote network: `host:port`
    pub remote: Option<String>,
    /// Address on the local network: `host:port`
    pub local: Option<String>,
}

/// Authentication configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub key_path: Option<PathBuf>,
    pub password: Option<String>,
}

/// Relay tunables
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// No traffic in either direction for this long closes the relay.
    /// Absent means relays are never timed out.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Option<Duration>,
    pub buffer_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            idle_timeout: None,
            buffer_size: 8192,
        }
    }
}

/// Tunnel direction.
///
/// `LocalToRemote` accepts connections on the remote network (through the
/// SSH session) and relays each one to a service on the local network.
/// `RemoteToLocal` accepts connections on the local network and relays each
/// one to a service reachable from the remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    LocalToRemote,
    RemoteToLocal,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalToRemote => write!(f, "local-to-remote"),
            Self::RemoteToLocal => write!(f, "remote-to-local"),
        }
    }
}

/// A `host:port` pair. The host may be empty for listen addresses
/// (`:2222` binds all interfaces); dial targets default to loopback.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':').ok_or(TunnelError::AddressFormat {
            input: s.to_string(),
            reason: "expected host:port",
        })?;
        let port = port.parse::<u16>().map_err(|_| TunnelError::AddressFormat {
            input: s.to_string(),
            reason: "invalid port number",
        })?;
        // IPv6 hosts arrive bracketed: [::1]:8080
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        Ok(Self::new(host, port))
    }
}

/// SSH server endpoint parsed from `user@host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshEndpoint {
    pub user: String,
    pub addr: Endpoint,
}

impl fmt::Display for SshEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.addr)
    }
}

impl FromStr for SshEndpoint {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user, addr) = s.split_once('@').ok_or(TunnelError::AddressFormat {
            input: s.to_string(),
            reason: "expected user@host:port",
        })?;
        if user.is_empty() {
            return Err(TunnelError::AddressFormat {
                input: s.to_string(),
                reason: "empty user",
            });
        }
        let addr: Endpoint = addr.parse().map_err(|_| TunnelError::AddressFormat {
            input: s.to_string(),
            reason: "expected user@host:port",
        })?;
        if addr.host.is_empty() {
            return Err(TunnelError::AddressFormat {
                input: s.to_string(),
                reason: "empty host",
            });
        }
        Ok(Self {
            user: user.to_string(),
            addr,
        })
    }
}

/// Credential material already read from storage by the caller. When both a
/// key and a password are present, the key takes precedence.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// PEM-encoded private key text.
    pub private_key: Option<String>,
    pub password: Option<String>,
}

/// The authentication method selected from a [`Credentials`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod<'a> {
    Key(&'a str),
    Password(&'a str),
}

impl Credentials {
    pub fn from_key(pem: impl Into<String>) -> Self {
        Self {
            private_key: Some(pem.into()),
            password: None,
        }
    }

    pub fn from_password(password: impl Into<String>) -> Self {
        Self {
            private_key: None,
            password: Some(password.into()),
        }
    }

    /// Select the authentication method, key first.
    pub fn method(&self) -> Result<AuthMethod<'_>, TunnelError> {
        if let Some(key) = self.private_key.as_deref() {
            return Ok(AuthMethod::Key(key));
        }
        if let Some(password) = self.password.as_deref() {
            return Ok(AuthMethod::Password(password));
        }
        Err(TunnelError::AuthConfig(
            "supply a private key or a password".to_string(),
        ))
    }

    pub fn validate(&self) -> Result<(), TunnelError> {
        self.method().map(|_| ())
    }
}

/// Everything a tunnel needs, validated and immutable once the tunnel starts.
///
/// `listen` is where connections are accepted (remote network for
/// `LocalToRemote`, local network for `RemoteToLocal`); `target` is what each
/// relay dials (local network for `LocalToRemote`, remote network for
/// `RemoteToLocal`).
#[derive(Debug, Clone)]
pub struct ForwardSpec {
    pub direction: Direction,
    pub ssh: SshEndpoint,
    pub listen: Endpoint,
    pub target: Endpoint,
}

impl ForwardSpec {
    pub fn validate(&self) -> Result<(), TunnelError> {
        if self.ssh.addr.port == 0 {
            return Err(TunnelError::MissingParameter("ssh port"));
        }
        if self.listen.port == 0 {
            return Err(TunnelError::MissingParameter("listen port"));
        }
        if self.target.port == 0 {
            return Err(TunnelError::MissingParameter("target port"));
        }
        Ok(())
    }
}

impl Config {
    /// Build the validated [`ForwardSpec`] this configuration describes.
    /// Checks presence first, then address shapes, before any network I/O
    /// happens anywhere.
    pub fn forward_spec(&self) -> Result<ForwardSpec, TunnelError> {
        let direction = self
            .tunnel
            .direction
            .ok_or(TunnelError::MissingParameter("direction (-L or -R)"))?;
        let ssh = self
            .tunnel
            .ssh
            .as_deref()
            .ok_or(TunnelError::MissingParameter("ssh address (-s user@host:port)"))?;
        let remote = self
            .tunnel
            .remote
            .as_deref()
            .ok_or(TunnelError::MissingParameter("remote address (-r host:port)"))?;
        let local = self
            .tunnel
            .local
            .as_deref()
            .ok_or(TunnelError::MissingParameter("local address (-l host:port)"))?;

        let ssh: SshEndpoint = ssh.parse()?;
        let remote: Endpoint = remote.parse()?;
        let local: Endpoint = local.parse()?;

        let (listen, target) = match direction {
            Direction::LocalToRemote => (remote, local),
            Direction::RemoteToLocal => (local, remote),
        };

        let spec = ForwardSpec {
            direction,
            ssh,
            listen,
            target,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            connect_timeout: self.relay.connect_timeout,
            idle_timeout: self.relay.idle_timeout,
            buffer_size: self.relay.buffer_size,
        }
    }
}
