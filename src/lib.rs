//! rtun: TCP forwarding over an SSH session.
//!
//! One tunnel relays connections between a listener and a target endpoint
//! through an authenticated SSH transport, in either direction:
//!
//! - local-to-remote: the remote host listens, traffic is relayed to a
//!   target dialed locally;
//! - remote-to-local: a local socket listens, traffic is relayed to a
//!   target dialed from the remote host.
//!
//! [`Tunnel::start`] wires everything up; [`Tunnel::stop`] tears it down in
//! order. Every connection is relayed verbatim by an independent task.

pub mod config;
pub mod director;
pub mod error;
pub mod relay;
pub mod session;
pub mod shutdown;
pub mod supervisor;

pub use config::{Config, Credentials, Direction, Endpoint, ForwardSpec, SshEndpoint};
pub use error::TunnelError;
pub use relay::RelayOptions;
pub use supervisor::{Tunnel, TunnelState};

pub type Result<T> = anyhow::Result<T>;
