//! Configuration Module

pub mod manager;
pub mod types;

pub use manager::ConfigManager;
pub use types::{
    AuthMethod, Config, Credentials, Direction, Endpoint, ForwardSpec, SshEndpoint,
};
