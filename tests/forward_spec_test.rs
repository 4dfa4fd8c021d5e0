//! Tests for address parsing, credential selection, and the validation that
//! must reject a bad setup before any network I/O happens.

use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::timeout;

use rtun::config::{AuthMethod, Config, Credentials, Direction, Endpoint, SshEndpoint};
use rtun::relay::RelayOptions;
use rtun::{Tunnel, TunnelError, TunnelState};

#[test]
fn parses_host_port() {
    let ep: Endpoint = "example.com:8080".parse().unwrap();
    assert_eq!(ep.host, "example.com");
    assert_eq!(ep.port, 8080);
}

#[test]
fn parses_bare_port_listen_address() {
    let ep: Endpoint = ":2222".parse().unwrap();
    assert_eq!(ep.host, "");
    assert_eq!(ep.port, 2222);
}

#[test]
fn parses_bracketed_ipv6() {
    let ep: Endpoint = "[::1]:8080".parse().unwrap();
    assert_eq!(ep.host, "::1");
    assert_eq!(ep.port, 8080);
}

#[test]
fn rejects_malformed_endpoints() {
    for input in ["no-port", "host:notaport", "host:99999", ""] {
        let result = input.parse::<Endpoint>();
        assert!(
            matches!(result, Err(TunnelError::AddressFormat { .. })),
            "{input:?} should be rejected"
        );
    }
}

#[test]
fn parses_ssh_endpoint() {
    let ssh: SshEndpoint = "deploy@bastion.example.com:22".parse().unwrap();
    assert_eq!(ssh.user, "deploy");
    assert_eq!(ssh.addr, Endpoint::new("bastion.example.com", 22));
}

#[test]
fn rejects_malformed_ssh_endpoints() {
    for input in ["nouser.example.com:22", "@host:22", "user@:22", "user@host"] {
        let result = input.parse::<SshEndpoint>();
        assert!(
            matches!(result, Err(TunnelError::AddressFormat { .. })),
            "{input:?} should be rejected"
        );
    }
}

#[test]
fn key_takes_precedence_over_password() {
    let creds = Credentials {
        private_key: Some("PEM".into()),
        password: Some("hunter2".into()),
    };
    assert!(matches!(creds.method(), Ok(AuthMethod::Key("PEM"))));
}

#[test]
fn password_used_when_no_key() {
    let creds = Credentials::from_password("hunter2");
    assert!(matches!(creds.method(), Ok(AuthMethod::Password("hunter2"))));
}

#[test]
fn empty_credentials_are_a_config_error() {
    let creds = Credentials::default();
    assert!(matches!(
        creds.validate(),
        Err(TunnelError::AuthConfig(_))
    ));
}

fn full_config() -> Config {
    let mut config = Config::default();
    config.tunnel.direction = Some(Direction::LocalToRemote);
    config.tunnel.ssh = Some("deploy@bastion.example.com:22".into());
    config.tunnel.remote = Some(":2222".into());
    config.tunnel.local = Some("127.0.0.1:8080".into());
    config
}

#[test]
fn forward_spec_reports_each_missing_parameter() {
    let cases: [(&str, fn(&mut Config)); 4] = [
        ("direction", |c| c.tunnel.direction = None),
        ("ssh", |c| c.tunnel.ssh = None),
        ("remote", |c| c.tunnel.remote = None),
        ("local", |c| c.tunnel.local = None),
    ];
    for (name, clear) in cases {
        let mut config = full_config();
        clear(&mut config);
        let result = config.forward_spec();
        assert!(
            matches!(result, Err(TunnelError::MissingParameter(_))),
            "missing {name} should be reported"
        );
    }
}

#[test]
fn direction_decides_listen_and_target_sides() {
    let spec = full_config().forward_spec().unwrap();
    assert_eq!(spec.listen, Endpoint::new("", 2222));
    assert_eq!(spec.target, Endpoint::new("127.0.0.1", 8080));

    let mut config = full_config();
    config.tunnel.direction = Some(Direction::RemoteToLocal);
    let spec = config.forward_spec().unwrap();
    assert_eq!(spec.listen, Endpoint::new("127.0.0.1", 8080));
    assert_eq!(spec.target, Endpoint::new("", 2222));
}

#[tokio::test]
async fn tunnel_start_rejects_empty_credentials_without_dialing() {
    let spec = full_config().forward_spec().unwrap();

    // Returns immediately with the configuration error; a connection attempt
    // would hang well past this bound.
    let result = timeout(
        Duration::from_millis(500),
        Tunnel::start(spec, &Credentials::default(), RelayOptions::default()),
    )
    .await
    .expect("validation must not touch the network");

    assert!(matches!(result, Err(TunnelError::AuthConfig(_))));
}

#[tokio::test]
async fn startup_states_are_observable_through_a_supplied_watcher() {
    // A TCP server that accepts and then says nothing: the SSH handshake
    // cannot proceed, so the connect attempt runs into its timeout.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ssh_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _socket = listener.accept().await;
        std::future::pending::<()>().await
    });

    let mut config = full_config();
    config.tunnel.ssh = Some(format!("deploy@127.0.0.1:{}", ssh_addr.port()));
    let spec = config.forward_spec().unwrap();

    let options = RelayOptions {
        connect_timeout: Duration::from_secs(1),
        ..RelayOptions::default()
    };
    let (state_tx, mut state_rx) = watch::channel(TunnelState::Idle);
    let starting = tokio::spawn(async move {
        let credentials = Credentials::from_password("hunter2");
        Tunnel::start_observed(spec, &credentials, options, state_tx).await
    });

    // Connecting is visible while the handshake is still in flight.
    timeout(
        Duration::from_secs(5),
        state_rx.wait_for(|s| *s == TunnelState::Connecting),
    )
    .await
    .expect("connecting state should be published before the failure")
    .unwrap();

    let result = timeout(Duration::from_secs(5), starting)
        .await
        .expect("connect timeout must bound the start attempt")
        .unwrap();
    assert!(matches!(result, Err(TunnelError::Dial { .. })));

    // The failed start walked the lifecycle to its end.
    assert_eq!(*state_rx.borrow(), TunnelState::Closed);
}
