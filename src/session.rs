//! SSH Session
//!
//! One authenticated SSH connection to a remote host. A session can host at
//! most one remote listener (connections the server forwards back over the
//! transport) and any number of concurrent outbound dials originated from the
//! remote side. The supervisor closes the session last, after the listener
//! and the relays it fed have been stopped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Msg};
use russh::{Channel, ChannelStream, Disconnect};
use russh_keys::key;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::{AuthMethod, Credentials, Endpoint, SshEndpoint};
use crate::error::TunnelError;

/// Client-side event handler. Forwarded channels (connections accepted by the
/// remote listener) are queued for the [`RemoteListener`] to pick up.
struct ClientHandler {
    forwarded_tx: mpsc::UnboundedSender<Channel<Msg>>,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Accept whatever host key the server presents, the same trust model
        // as an `InsecureIgnoreHostKey` SSH client.
        Ok(true)
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        debug!(
            bound = %format!("{connected_address}:{connected_port}"),
            origin = %format!("{originator_address}:{originator_port}"),
            "forwarded connection from remote listener"
        );
        // If the listener is gone the channel is dropped here, which closes it.
        let _ = self.forwarded_tx.send(channel);
        Ok(())
    }
}

/// One authenticated transport connection to a remote host.
pub struct Session {
    handle: client::Handle<ClientHandler>,
    endpoint: Endpoint,
    forwarded_rx: Option<mpsc::UnboundedReceiver<Channel<Msg>>>,
}

impl Session {
    /// Perform the SSH handshake and authenticate.
    ///
    /// Credentials are validated before any network I/O: no usable credential
    /// means [`TunnelError::AuthConfig`] with zero connection attempts. An
    /// unreachable endpoint or failed handshake is a [`TunnelError::Dial`];
    /// rejected credentials are a [`TunnelError::Auth`].
    pub async fn connect(
        ssh: &SshEndpoint,
        credentials: &Credentials,
        connect_timeout: Duration,
    ) -> Result<Self, TunnelError> {
        let method = credentials.method()?;

        let config = Arc::new(client::Config::default());
        let (forwarded_tx, forwarded_rx) = mpsc::unbounded_channel();
        let handler = ClientHandler { forwarded_tx };

        let connect = client::connect(config, (ssh.addr.host.as_str(), ssh.addr.port), handler);
        let mut handle = match tokio::time::timeout(connect_timeout, connect).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(TunnelError::dial(&ssh.addr, e)),
            Err(_) => return Err(TunnelError::dial(&ssh.addr, "connection timed out")),
        };

        let authenticated = match method {
            AuthMethod::Key(pem) => {
                let key = russh_keys::decode_secret_key(pem, None)
                    .map_err(|e| TunnelError::AuthConfig(format!("cannot parse private key: {e}")))?;
                handle
                    .authenticate_publickey(&ssh.user, Arc::new(key))
                    .await
                    .map_err(|e| TunnelError::dial(&ssh.addr, e))?
            }
            AuthMethod::Password(password) => handle
                .authenticate_password(&ssh.user, password)
                .await
                .map_err(|e| TunnelError::dial(&ssh.addr, e))?,
        };

        if !authenticated {
            return Err(TunnelError::Auth {
                user: ssh.user.clone(),
                endpoint: ssh.addr.to_string(),
            });
        }

        info!(server = %ssh.addr, user = %ssh.user, "SSH session established");
        Ok(Self {
            handle,
            endpoint: ssh.addr.clone(),
            forwarded_rx: Some(forwarded_rx),
        })
    }

    /// Ask the remote host to accept connections on `addr` and hand them back
    /// over this session. Refusal (address in use, not permitted) is a
    /// [`TunnelError::Listen`].
    pub async fn open_remote_listener(
        &mut self,
        addr: &Endpoint,
    ) -> Result<RemoteListener, TunnelError> {
        // The forward request reports the port the server actually bound,
        // which matters when port 0 asked it to pick one.
        let bound_port = self
            .handle
            .tcpip_forward(addr.host.clone(), addr.port as u32)
            .await
            .map_err(|e| TunnelError::listen(addr, e.to_string()))?;

        let incoming = self.forwarded_rx.take().ok_or_else(|| {
            TunnelError::listen(addr, "session already owns a remote listener")
        })?;

        let address = Endpoint::new(
            addr.host.clone(),
            if addr.port == 0 {
                bound_port as u16
            } else {
                addr.port
            },
        );
        info!(address = %address, server = %self.endpoint, "remote listener bound");
        Ok(RemoteListener { incoming, address })
    }

    /// Ask the remote host to originate a TCP connection to `addr`, exposed
    /// here as a bidirectional stream. Safe to call from many relay tasks
    /// concurrently.
    pub async fn dial_through_session(
        &self,
        addr: &Endpoint,
    ) -> Result<ChannelStream<Msg>, TunnelError> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(
                addr.host.clone(),
                addr.port as u32,
                "127.0.0.1",
                0,
            )
            .await
            .map_err(|e| TunnelError::dial(addr, e))?;
        Ok(channel.into_stream())
    }

    /// Terminate the transport. Every listener or stream produced through
    /// this session observes a close afterwards.
    pub async fn close(&self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "tunnel closed", "")
            .await
        {
            debug!(server = %self.endpoint, error = %e, "disconnect failed, transport already gone");
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

/// Accept side of a remote listener: a lazy, non-restartable sequence of
/// connections the remote host forwarded back to us.
pub struct RemoteListener {
    incoming: mpsc::UnboundedReceiver<Channel<Msg>>,
    address: Endpoint,
}

impl RemoteListener {
    /// Next forwarded connection. `None` once the owning session's transport
    /// is gone; the listener cannot be restarted.
    pub async fn accept(&mut self) -> Option<ChannelStream<Msg>> {
        self.incoming.recv().await.map(Channel::into_stream)
    }

    pub fn address(&self) -> &Endpoint {
        &self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remote_listener_ends_when_the_transport_is_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listener = RemoteListener {
            incoming: rx,
            address: Endpoint::new("", 2222),
        };
        drop(tx);

        // A dropped queue means the session transport is gone; the sequence
        // of forwarded connections cannot resume.
        assert!(listener.accept().await.is_none());
        assert_eq!(listener.address(), &Endpoint::new("", 2222));
    }
}
