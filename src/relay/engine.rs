//! Relay Engine
//!
//! Splices one accepted source connection with a freshly dialed target
//! connection. The two directions are copied independently; as soon as either
//! one terminates (EOF, I/O error, idle timeout, or shutdown), both
//! connections are closed, which forces the other direction to terminate as
//! well. The relay returns only once both connections are closed, so no
//! handle outlives it regardless of which side failed first.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::stats::{RelayStats, RelaySummary};
use crate::config::Endpoint;
use crate::error::TunnelError;
use crate::session::Session;
use crate::shutdown;

/// Byte stream carried by one side of a relay.
pub trait RelayIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> RelayIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type RelayStream = Box<dyn RelayIo>;

/// Produces the target-side connection for one accepted source connection.
/// Shared by all relay tasks of a tunnel; dials never coordinate.
#[async_trait]
pub trait TargetDialer: Send + Sync {
    async fn dial(&self) -> Result<RelayStream, TunnelError>;

    fn target(&self) -> &Endpoint;
}

/// Plain TCP dial on the local network stack.
pub struct LocalDialer {
    pub target: Endpoint,
}

impl LocalDialer {
    pub fn new(target: Endpoint) -> Self {
        Self { target }
    }
}

#[async_trait]
impl TargetDialer for LocalDialer {
    async fn dial(&self) -> Result<RelayStream, TunnelError> {
        let host = if self.target.host.is_empty() {
            "127.0.0.1"
        } else {
            self.target.host.as_str()
        };
        let stream = TcpStream::connect((host, self.target.port))
            .await
            .map_err(|e| TunnelError::dial(&self.target, e))?;
        stream.set_nodelay(true).ok();
        Ok(Box::new(stream))
    }

    fn target(&self) -> &Endpoint {
        &self.target
    }
}

/// Dial originated by the remote host, carried over the SSH session.
pub struct SessionDialer {
    pub session: Arc<Session>,
    pub target: Endpoint,
}

impl SessionDialer {
    pub fn new(session: Arc<Session>, target: Endpoint) -> Self {
        Self { session, target }
    }
}

#[async_trait]
impl TargetDialer for SessionDialer {
    async fn dial(&self) -> Result<RelayStream, TunnelError> {
        let stream = self.session.dial_through_session(&self.target).await?;
        Ok(Box::new(stream))
    }

    fn target(&self) -> &Endpoint {
        &self.target
    }
}

/// Relay tunables
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub connect_timeout: Duration,
    /// No traffic in either direction for this long closes the relay.
    pub idle_timeout: Option<Duration>,
    pub buffer_size: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            idle_timeout: None,
            buffer_size: 8192,
        }
    }
}

/// Why the splice stopped. The first cause wins; everything after it is
/// teardown.
enum Stop {
    Eof,
    Io(io::Error),
    Idle,
    Shutdown,
}

/// Dial the counterpart endpoint and splice it with `source`.
///
/// A failed dial closes `source` immediately and reports a non-fatal
/// [`TunnelError::Relay`]; nothing outlives that failure. Once established,
/// the relay copies bytes verbatim in both directions until either direction
/// terminates, then closes both connections.
pub async fn run_relay(
    source: RelayStream,
    dialer: Arc<dyn TargetDialer>,
    options: RelayOptions,
    mut shutdown: watch::Receiver<bool>,
) -> Result<RelaySummary, TunnelError> {
    let target_addr = dialer.target().clone();

    let target = match timeout(options.connect_timeout, dialer.dial()).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            // dropping `source` closes the accepted connection
            return Err(TunnelError::relay(
                &target_addr,
                format!("target dial failed: {e}"),
            ));
        }
        Err(_) => {
            return Err(TunnelError::relay(&target_addr, "target dial timed out"));
        }
    };
    debug!(target_addr = %target_addr, "target dialed, splicing");

    let stats = RelayStats::new();
    let (mut source_rd, mut source_wr) = tokio::io::split(source);
    let (mut target_rd, mut target_wr) = tokio::io::split(target);

    let stop = {
        let upstream = copy_half(&mut source_rd, &mut target_wr, &stats, true, options.buffer_size);
        let downstream =
            copy_half(&mut target_rd, &mut source_wr, &stats, false, options.buffer_size);
        tokio::pin!(upstream, downstream);

        tokio::select! {
            result = &mut upstream => match result {
                Ok(()) => Stop::Eof,
                Err(e) => Stop::Io(e),
            },
            result = &mut downstream => match result {
                Ok(()) => Stop::Eof,
                Err(e) => Stop::Io(e),
            },
            _ = idle_watch(&stats, options.idle_timeout) => Stop::Idle,
            _ = shutdown::triggered(&mut shutdown) => Stop::Shutdown,
        }
    };

    // Close both ends. The direction still in flight observes a closed peer
    // and terminates; its remaining halves are dropped right here.
    let _ = target_wr.shutdown().await;
    let _ = source_wr.shutdown().await;
    drop(source_rd);
    drop(target_rd);

    match stop {
        Stop::Eof => {
            stats.log_completion(&target_addr.to_string());
            Ok(RelaySummary::from_stats(&stats))
        }
        Stop::Io(e) if is_disconnect(&e) => {
            // Half-close races surface as resets; treat them as a normal end.
            stats.log_completion(&target_addr.to_string());
            Ok(RelaySummary::from_stats(&stats))
        }
        Stop::Io(e) => {
            warn!(target_addr = %target_addr, error = %e, "relay I/O failure");
            Err(TunnelError::relay(&target_addr, format!("stream failed: {e}")))
        }
        Stop::Idle => Err(TunnelError::relay(&target_addr, "idle timeout reached")),
        Stop::Shutdown => {
            debug!(target_addr = %target_addr, "relay cancelled by shutdown");
            Ok(RelaySummary::from_stats(&stats))
        }
    }
}

/// Copy one direction until EOF or error, counting bytes as they move.
async fn copy_half<R, W>(
    reader: &mut R,
    writer: &mut W,
    stats: &RelayStats,
    upstream: bool,
    buffer_size: usize,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        if upstream {
            stats.record_up(n as u64);
        } else {
            stats.record_down(n as u64);
        }
    }
}

/// Resolves once the relay has been idle for `limit`. Never resolves when no
/// limit is configured.
async fn idle_watch(stats: &RelayStats, limit: Option<Duration>) {
    let Some(limit) = limit else {
        std::future::pending::<()>().await;
        return;
    };
    loop {
        let remaining = limit.saturating_sub(stats.idle_for());
        if remaining.is_zero() {
            return;
        }
        tokio::time::sleep(remaining).await;
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}
