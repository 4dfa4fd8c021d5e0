//! Tests for the listener director: accept loop, per-connection isolation,
//! and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;

use rtun::config::Endpoint;
use rtun::director::{Director, TunnelListener};
use rtun::relay::{LocalDialer, RelayOptions, TargetDialer};

/// Echo server that serves connections until dropped.
async fn spawn_echo_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// Start a director listening on an ephemeral local port, relaying to
/// `target`. Returns the listen address, the shutdown switch, and the
/// director task handle.
async fn start_director(
    target: std::net::SocketAddr,
) -> (
    std::net::SocketAddr,
    watch::Sender<bool>,
    tokio::task::JoinHandle<Result<(), rtun::TunnelError>>,
) {
    let listener = TunnelListener::bind_local(&Endpoint::new("127.0.0.1", 0))
        .await
        .unwrap();
    let listen_addr = listener.local_addr().unwrap();

    let dialer: Arc<dyn TargetDialer> = Arc::new(LocalDialer::new(Endpoint::new(
        target.ip().to_string(),
        target.port(),
    )));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let director = Director::new(listener, dialer, RelayOptions::default(), shutdown_rx);
    let handle = tokio::spawn(director.run());

    (listen_addr, shutdown_tx, handle)
}

async fn echo_roundtrip(addr: std::net::SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(payload).await.unwrap();
    let mut reply = vec![0u8; payload.len()];
    timeout(Duration::from_secs(5), client.read_exact(&mut reply))
        .await
        .expect("echo should arrive")
        .unwrap();
    client.shutdown().await.unwrap();
    reply
}

/// Target that answers every connection with a fixed reply and closes.
async fn spawn_fixed_reply_server(reply: &'static [u8]) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let _ = stream.write_all(reply).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn client_receives_exactly_the_target_reply() {
    let target = spawn_fixed_reply_server(b"OK").await;
    let (listen_addr, shutdown_tx, handle) = start_director(target).await;

    let mut client = TcpStream::connect(listen_addr).await.unwrap();
    let mut reply = Vec::new();
    timeout(Duration::from_secs(5), client.read_to_end(&mut reply))
        .await
        .expect("reply should arrive before the bound")
        .unwrap();
    assert_eq!(&reply, b"OK");

    shutdown_tx.send(true).unwrap();
    timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn relays_an_accepted_connection_to_the_target() {
    let echo_addr = spawn_echo_server().await;
    let (listen_addr, shutdown_tx, handle) = start_director(echo_addr).await;

    let reply = echo_roundtrip(listen_addr, b"through the tunnel").await;
    assert_eq!(&reply, b"through the tunnel");

    shutdown_tx.send(true).unwrap();
    let result = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn concurrent_connections_are_isolated() {
    let echo_addr = spawn_echo_server().await;
    let (listen_addr, shutdown_tx, handle) = start_director(echo_addr).await;

    let a = tokio::spawn(echo_roundtrip(listen_addr, b"first connection"));
    let b = tokio::spawn(echo_roundtrip(listen_addr, b"second connection"));

    assert_eq!(a.await.unwrap(), b"first connection");
    assert_eq!(b.await.unwrap(), b"second connection");

    shutdown_tx.send(true).unwrap();
    timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn accept_loop_survives_failed_dials() {
    // Target with nothing listening behind it.
    let dead_addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let (listen_addr, shutdown_tx, handle) = start_director(dead_addr).await;

    // Each connection fails in isolation; the tunnel keeps accepting.
    for _ in 0..3 {
        let mut client = TcpStream::connect(listen_addr).await.unwrap();
        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .expect("failed relay must close the connection in bounded time")
            .unwrap();
        assert_eq!(n, 0);
    }

    // Still alive: shutdown ends the loop cleanly, not an earlier error.
    shutdown_tx.send(true).unwrap();
    let result = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn shutdown_stops_the_accept_loop() {
    let echo_addr = spawn_echo_server().await;
    let (listen_addr, shutdown_tx, handle) = start_director(echo_addr).await;

    shutdown_tx.send(true).unwrap();
    let result = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert!(result.is_ok());

    // Nothing accepts on the old address once the director is gone.
    let refused = TcpStream::connect(listen_addr).await;
    assert!(refused.is_err() || {
        // A connect may still land in the dead listener's backlog; reads
        // must then observe an immediate close.
        let mut stream = refused.unwrap();
        let mut buf = [0u8; 1];
        timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .map(|r| matches!(r, Ok(0) | Err(_)))
            .unwrap_or(false)
    });
}
