//! Tunnel Supervisor
//!
//! Ties the pieces together for one forwarding rule: open the session, bind
//! the direction-appropriate listener, run the director, and tear everything
//! down in order on stop. State transitions are published on a watch channel
//! so callers can observe the lifecycle.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{Credentials, Direction, ForwardSpec};
use crate::director::{Director, TunnelListener};
use crate::error::TunnelError;
use crate::relay::{LocalDialer, RelayOptions, SessionDialer, TargetDialer};
use crate::session::Session;

/// Lifecycle of a tunnel, in order. `Closing` and `Closed` are terminal
/// whichever state preceded them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Idle,
    Connecting,
    Listening,
    Relaying,
    Closing,
    Closed,
}

/// A running tunnel: session + listener + director, with ordered teardown.
pub struct Tunnel {
    spec: ForwardSpec,
    session: Arc<Session>,
    state_tx: watch::Sender<TunnelState>,
    shutdown_tx: watch::Sender<bool>,
    director: Option<JoinHandle<Result<(), TunnelError>>>,
}

impl Tunnel {
    /// Validate, connect, bind, and start relaying.
    ///
    /// Validation happens before any network I/O: a malformed spec or unusable
    /// credentials fail without a single connection attempt. Any later failure
    /// tears down whatever was already established.
    pub async fn start(
        spec: ForwardSpec,
        credentials: &Credentials,
        options: RelayOptions,
    ) -> Result<Self, TunnelError> {
        let (state_tx, _) = watch::channel(TunnelState::Idle);
        Self::start_observed(spec, credentials, options, state_tx).await
    }

    /// Like [`Tunnel::start`], publishing lifecycle transitions on a
    /// caller-supplied watch channel. Receivers held before the call observe
    /// `Connecting` and `Listening` as they happen; a fatal startup error
    /// ends in `Closed`.
    pub async fn start_observed(
        spec: ForwardSpec,
        credentials: &Credentials,
        options: RelayOptions,
        state_tx: watch::Sender<TunnelState>,
    ) -> Result<Self, TunnelError> {
        spec.validate()?;
        credentials.validate()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        state_tx.send_replace(TunnelState::Connecting);
        let mut session =
            match Session::connect(&spec.ssh, credentials, options.connect_timeout).await {
                Ok(session) => session,
                Err(e) => return Err(Self::fail(&state_tx, e)),
            };

        let (listener, session) = match spec.direction {
            Direction::LocalToRemote => {
                // Listener lives on the remote host; accepted connections are
                // relayed to a target we dial locally.
                match session.open_remote_listener(&spec.listen).await {
                    Ok(listener) => (TunnelListener::Remote(listener), Arc::new(session)),
                    Err(e) => {
                        session.close().await;
                        return Err(Self::fail(&state_tx, e));
                    }
                }
            }
            Direction::RemoteToLocal => {
                // Listener is a local socket; accepted connections are relayed
                // to a target dialed from the remote host.
                match TunnelListener::bind_local(&spec.listen).await {
                    Ok(listener) => (listener, Arc::new(session)),
                    Err(e) => {
                        session.close().await;
                        return Err(Self::fail(&state_tx, e));
                    }
                }
            }
        };
        state_tx.send_replace(TunnelState::Listening);

        let dialer: Arc<dyn TargetDialer> = match spec.direction {
            Direction::LocalToRemote => Arc::new(LocalDialer::new(spec.target.clone())),
            Direction::RemoteToLocal => {
                Arc::new(SessionDialer::new(Arc::clone(&session), spec.target.clone()))
            }
        };

        let director = Director::new(listener, dialer, options, shutdown_rx);
        let handle = tokio::spawn(director.run());
        state_tx.send_replace(TunnelState::Relaying);

        info!(
            direction = %spec.direction,
            listen = %spec.listen,
            target = %spec.target,
            "tunnel started"
        );

        Ok(Self {
            spec,
            session,
            state_tx,
            shutdown_tx,
            director: Some(handle),
        })
    }

    /// A failed start still walks the lifecycle to its end.
    fn fail(state_tx: &watch::Sender<TunnelState>, e: TunnelError) -> TunnelError {
        state_tx.send_replace(TunnelState::Closing);
        state_tx.send_replace(TunnelState::Closed);
        e
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TunnelState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<TunnelState> {
        self.state_tx.subscribe()
    }

    pub fn spec(&self) -> &ForwardSpec {
        &self.spec
    }

    /// Wait for the director to finish on its own. Returns the fatal error
    /// that ended it, or `Ok(())` if it stopped cleanly.
    pub async fn wait(&mut self) -> Result<(), TunnelError> {
        match self.director.as_mut() {
            Some(handle) => {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(_) => Ok(()),
                };
                self.director = None;
                result
            }
            None => Ok(()),
        }
    }

    /// Graceful, ordered teardown: stop accepting, let in-flight relays wind
    /// down, then close the session.
    pub async fn stop(mut self) {
        self.state_tx.send_replace(TunnelState::Closing);
        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.director.take() {
            let _ = handle.await;
        }
        self.session.close().await;

        self.state_tx.send_replace(TunnelState::Closed);
        info!(listen = %self.spec.listen, "tunnel closed");
    }
}
