//! Engine tuning, overridable through the environment.

use std::time::Duration;

/// Execution engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long the worker sleeps on an empty queue before asking the idle
    /// supplier again.
    pub idle_wait: Duration,
    /// Upper bound on one wait for the audio buffer to drain.
    pub audio_wait: Duration,
    /// Minimum ticks between two automatic snapshots.
    pub snapshot_interval: u64,
    /// Automatic snapshots kept for reverse playback; the oldest is dropped.
    pub max_snapshots: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_wait: Duration::from_millis(10),
            audio_wait: Duration::from_millis(20),
            snapshot_interval: 20_000,
            max_snapshots: 64,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `REWIND_IDLE_WAIT_MS`, `REWIND_AUDIO_WAIT_MS`,
    /// `REWIND_SNAPSHOT_INTERVAL` and `REWIND_MAX_SNAPSHOTS`.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let idle_wait_ms: u64 = std::env::var("REWIND_IDLE_WAIT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.idle_wait.as_millis() as u64);

        let audio_wait_ms: u64 = std::env::var("REWIND_AUDIO_WAIT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.audio_wait.as_millis() as u64);

        let snapshot_interval: u64 = std::env::var("REWIND_SNAPSHOT_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.snapshot_interval);

        let max_snapshots: usize = std::env::var("REWIND_MAX_SNAPSHOTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_snapshots);

        Self {
            idle_wait: Duration::from_millis(idle_wait_ms.max(1)),
            audio_wait: Duration::from_millis(audio_wait_ms),
            snapshot_interval: snapshot_interval.max(1),
            max_snapshots,
        }
    }
}
