//! Collaborators the engine drives: the emulated machine, the audio ring
//! buffer and the idle command supplier.

use std::time::Duration;

use thiserror::Error;

use crate::{Command, Event};

/// Failure reported by a [`Device`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    /// The device does not implement this command.
    #[error("unsupported command: {0}")]
    Unsupported(&'static str),

    /// The device rejected the command or failed while applying it.
    #[error("device fault: {0}")]
    Fault(String),

    /// A state blob could not be imported.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// The emulated machine.
///
/// Implementations must be deterministic: applying the same sequence of
/// commands to a device imported from the same state must yield identical
/// events (same ticks, same audio samples) and identical exported state.
pub trait Device: Send + 'static {
    /// Apply one command and describe its outcome.
    ///
    /// Returns `Ok(None)` for commands that have no observable outcome.
    /// A `RunUntil` may stop before its `stop_tick`; the returned event's
    /// tick is the tick actually reached.
    fn apply(&mut self, command: &Command) -> Result<Option<Event>, DeviceError>;

    /// Current value of the monotonic tick counter.
    fn tick(&self) -> u64;

    /// Export the full machine state.
    fn export_state(&self) -> Vec<u8>;

    /// Replace the full machine state with an exported one.
    fn import_state(&mut self, state: &[u8]) -> Result<(), DeviceError>;

    /// Export a thumbnail of the current screen.
    fn export_screen(&self) -> Vec<u8>;
}

/// Backpressure signal from the audio ring buffer.
pub trait AudioBuffer: Send + Sync {
    /// Whether the buffer holds more audio than the output can consume.
    fn is_overrun(&self) -> bool;

    /// Block until the buffer drains below its threshold or `timeout`
    /// elapses. Returns `true` if the buffer is no longer overrun.
    fn wait_for_underrun(&self, timeout: Duration) -> bool;
}

/// An audio sink that never applies backpressure.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAudio;

impl AudioBuffer for NoAudio {
    fn is_overrun(&self) -> bool {
        false
    }

    fn wait_for_underrun(&self, _timeout: Duration) -> bool {
        true
    }
}

/// Supplies a default command when the engine's queue is empty.
pub trait IdleSupplier: Send {
    /// Produce the next idle command given the device's current tick, or
    /// `None` to let the engine wait.
    fn next_command(&mut self, tick: u64) -> Option<Command>;
}

impl<F> IdleSupplier for F
where
    F: FnMut(u64) -> Option<Command> + Send,
{
    fn next_command(&mut self, tick: u64) -> Option<Command> {
        self(tick)
    }
}

/// Runs the machine one video frame at a time.
#[derive(Debug, Clone, Copy)]
pub struct VsyncSupplier {
    frame_ticks: u64,
}

impl VsyncSupplier {
    /// `frame_ticks` is the number of ticks between two vertical syncs.
    #[must_use]
    pub const fn new(frame_ticks: u64) -> Self {
        Self {
            frame_ticks: if frame_ticks == 0 { 1 } else { frame_ticks },
        }
    }

    #[must_use]
    pub const fn frame_ticks(&self) -> u64 {
        self.frame_ticks
    }
}

impl IdleSupplier for VsyncSupplier {
    fn next_command(&mut self, tick: u64) -> Option<Command> {
        // Align to the next frame boundary so a paused-then-resumed machine
        // lands back on the same cadence. No boundary left past u64::MAX.
        let next = (tick / self.frame_ticks)
            .checked_add(1)?
            .checked_mul(self.frame_ticks)?;
        Some(Command::RunUntil { stop_tick: next })
    }
}
