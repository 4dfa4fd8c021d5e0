//! Relay Module

pub mod engine;
pub mod stats;

pub use engine::{
    run_relay, LocalDialer, RelayIo, RelayOptions, RelayStream, SessionDialer, TargetDialer,
};
pub use stats::{RelayStats, RelaySummary};
