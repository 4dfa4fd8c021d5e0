//! Relay Statistics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Byte counters for one relay pair. Shared between the two directional copy
/// halves; updated without coordination.
#[derive(Debug)]
pub struct RelayStats {
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
    last_activity_ms: AtomicU64,
    started: Instant,
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
            last_activity_ms: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Bytes copied source to target.
    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    /// Bytes copied target to source.
    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_up() + self.bytes_down()
    }

    pub fn duration(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time since the last byte moved in either direction.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }

    pub(crate) fn record_up(&self, bytes: u64) {
        self.bytes_up.fetch_add(bytes, Ordering::Relaxed);
        self.touch();
    }

    pub(crate) fn record_down(&self, bytes: u64) {
        self.bytes_down.fetch_add(bytes, Ordering::Relaxed);
        self.touch();
    }

    fn touch(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_activity_ms.store(elapsed, Ordering::Relaxed);
    }

    pub(crate) fn log_completion(&self, target: &str) {
        info!(
            target_addr = target,
            bytes_up = self.bytes_up(),
            bytes_down = self.bytes_down(),
            duration_ms = self.duration().as_millis() as u64,
            "relay completed"
        );
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Final counters of a finished relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySummary {
    pub bytes_up: u64,
    pub bytes_down: u64,
    pub duration: Duration,
}

impl RelaySummary {
    pub(crate) fn from_stats(stats: &RelayStats) -> Self {
        Self {
            bytes_up: stats.bytes_up(),
            bytes_down: stats.bytes_down(),
            duration: stats.duration(),
        }
    }
}
