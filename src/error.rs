//! Error Types
//!
//! Typed error taxonomy for the tunnel engine. Fatal variants terminate the
//! tunnel and are surfaced to the caller; `Accept` is recovered inside the
//! accept loop and `Relay` is isolated to the one connection it belongs to.
//! Library code never exits the process; the binary decides what a fatal
//! error means.

use thiserror::Error;

type Source = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum TunnelError {
    /// Malformed endpoint string (`host:port` or `user@host:port`).
    #[error("malformed address `{input}`: {reason}")]
    AddressFormat { input: String, reason: &'static str },

    /// A required configuration field is absent.
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    /// No usable credential was supplied, or the supplied key is unusable.
    #[error("authentication configuration error: {0}")]
    AuthConfig(String),

    /// The SSH server rejected the supplied credentials.
    #[error("authentication rejected for {user}@{endpoint}")]
    Auth { user: String, endpoint: String },

    /// The endpoint is unreachable or the transport handshake failed.
    #[error("failed to dial {endpoint}: {source}")]
    Dial {
        endpoint: String,
        #[source]
        source: Source,
    },

    /// The listen address could not be bound, locally or on the remote host,
    /// or the listener stopped being usable.
    #[error("cannot listen on {address}: {reason}")]
    Listen { address: String, reason: String },

    /// Transient per-iteration accept failure; the accept loop continues.
    #[error("accept failed: {source}")]
    Accept {
        #[source]
        source: std::io::Error,
    },

    /// Counterpart dial failed or an established relay hit a mid-stream I/O
    /// failure. Scoped to one connection.
    #[error("relay to {target} failed: {reason}")]
    Relay { target: String, reason: String },
}

impl TunnelError {
    pub(crate) fn dial(endpoint: impl ToString, source: impl Into<Source>) -> Self {
        Self::Dial {
            endpoint: endpoint.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn listen(address: impl ToString, reason: impl Into<String>) -> Self {
        Self::Listen {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn relay(target: impl ToString, reason: impl Into<String>) -> Self {
        Self::Relay {
            target: target.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error terminates the tunnel. `Accept` and `Relay` are
    /// recovered in place; everything else is surfaced to the caller and the
    /// tunnel never (re-)enters the relaying state.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Accept { .. } | Self::Relay { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality_classification() {
        assert!(TunnelError::MissingParameter("ssh address").is_fatal());
        assert!(TunnelError::AuthConfig("no credential".into()).is_fatal());
        assert!(TunnelError::listen("127.0.0.1:1", "in use").is_fatal());
        assert!(!TunnelError::relay("10.0.0.1:80", "refused").is_fatal());
        assert!(!TunnelError::Accept {
            source: std::io::Error::from(std::io::ErrorKind::ConnectionAborted),
        }
        .is_fatal());
    }
}
