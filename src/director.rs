//! Listener Director
//!
//! Owns one listener (a local TCP socket or a remote listener hosted by the
//! SSH session) and runs the accept loop: every accepted connection becomes
//! an independent relay task. Per-connection failures are logged and the loop
//! continues; only listener-level failures end the loop.

use std::io;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Endpoint;
use crate::error::TunnelError;
use crate::relay::{run_relay, RelayOptions, RelayStream, TargetDialer};
use crate::session::RemoteListener;
use crate::shutdown;

/// Where inbound connections come from.
pub enum TunnelListener {
    Local(TcpListener),
    Remote(RemoteListener),
}

impl TunnelListener {
    /// Bind a local TCP listener. An empty host means all interfaces.
    pub async fn bind_local(addr: &Endpoint) -> Result<Self, TunnelError> {
        let host = if addr.host.is_empty() {
            "0.0.0.0"
        } else {
            addr.host.as_str()
        };
        let listener = TcpListener::bind((host, addr.port))
            .await
            .map_err(|e| TunnelError::listen(addr, e.to_string()))?;
        info!(address = %format!("{host}:{}", addr.port), "local listener bound");
        Ok(Self::Local(listener))
    }

    /// The locally bound address, when there is one.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        match self {
            Self::Local(listener) => listener.local_addr().ok(),
            Self::Remote(_) => None,
        }
    }

    /// Wait for the next inbound connection.
    ///
    /// Transient socket errors come back as [`TunnelError::Accept`] and leave
    /// the listener usable. A closed remote session is a [`TunnelError::Listen`]:
    /// the sequence of forwarded connections cannot resume.
    async fn accept(&mut self) -> Result<RelayStream, TunnelError> {
        match self {
            Self::Local(listener) => {
                let (stream, peer) = listener
                    .accept()
                    .await
                    .map_err(|e| Self::classify_accept_error(listener, e))?;
                debug!(peer = %peer, "accepted connection");
                let _ = stream.set_nodelay(true);
                Ok(Box::new(stream))
            }
            Self::Remote(listener) => match listener.accept().await {
                Some(stream) => Ok(Box::new(stream)),
                None => Err(TunnelError::listen(
                    listener.address(),
                    "session transport closed",
                )),
            },
        }
    }

    fn classify_accept_error(listener: &TcpListener, e: io::Error) -> TunnelError {
        // Per-connection failures that leave the socket healthy.
        let transient = matches!(
            e.kind(),
            io::ErrorKind::ConnectionAborted
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionRefused
                | io::ErrorKind::Interrupted
                | io::ErrorKind::WouldBlock
        );
        if transient {
            TunnelError::Accept { source: e }
        } else {
            let addr = listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "<unknown>".into());
            TunnelError::Listen {
                address: addr,
                reason: e.to_string(),
            }
        }
    }
}

/// Accept loop: one listener fanned out to per-connection relay tasks.
pub struct Director {
    listener: TunnelListener,
    dialer: Arc<dyn TargetDialer>,
    options: RelayOptions,
    shutdown: watch::Receiver<bool>,
}

impl Director {
    pub fn new(
        listener: TunnelListener,
        dialer: Arc<dyn TargetDialer>,
        options: RelayOptions,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            listener,
            dialer,
            options,
            shutdown,
        }
    }

    /// Run until shutdown or a fatal listener error. Relay tasks started here
    /// observe the same shutdown flag and wind down on their own.
    pub async fn run(mut self) -> Result<(), TunnelError> {
        loop {
            let source = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = shutdown::triggered(&mut self.shutdown) => {
                    info!("director stopping, shutdown requested");
                    return Ok(());
                }
            };

            match source {
                Ok(source) => {
                    let dialer = Arc::clone(&self.dialer);
                    let options = self.options.clone();
                    let shutdown = self.shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = run_relay(source, dialer, options, shutdown).await {
                            warn!(error = %e, "relay ended with error");
                        }
                    });
                }
                Err(e @ TunnelError::Accept { .. }) => {
                    warn!(error = %e, "accept failed, listener still healthy");
                }
                Err(e) => {
                    error!(error = %e, "listener failed, stopping director");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn per_connection_accept_errors_keep_the_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::Interrupted,
            io::ErrorKind::WouldBlock,
        ] {
            let classified = TunnelListener::classify_accept_error(&listener, kind.into());
            assert!(
                matches!(classified, TunnelError::Accept { .. }),
                "{kind:?} should leave the listener usable"
            );
            assert!(!classified.is_fatal());
        }
    }

    #[tokio::test]
    async fn listener_level_accept_errors_are_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        for kind in [
            io::ErrorKind::OutOfMemory,
            io::ErrorKind::PermissionDenied,
            io::ErrorKind::Other,
        ] {
            let classified = TunnelListener::classify_accept_error(&listener, kind.into());
            assert!(
                matches!(classified, TunnelError::Listen { .. }),
                "{kind:?} should stop the accept loop"
            );
            assert!(classified.is_fatal());
        }
    }
}
