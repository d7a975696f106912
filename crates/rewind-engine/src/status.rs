//! Observable engine state.

/// What the worker thread is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// Waiting for a command.
    Idle,
    /// Applying a command.
    Processing,
    /// No worker thread is running.
    #[default]
    Stopped,
}

/// How the engine fills gaps in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// The idle supplier drives the machine forward.
    #[default]
    Running,
    /// Only queued commands run.
    Paused,
    /// Idle steps revert to successively older automatic snapshots.
    Reversing,
}

/// Run-state flags changed by engine-level commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Control {
    pub mode: RunMode,
    /// Nesting depth of `Lock`; idle work is suppressed while non-zero.
    pub locks: u32,
}

impl Control {
    #[must_use]
    pub const fn allows_idle(&self) -> bool {
        self.locks == 0 && !matches!(self.mode, RunMode::Paused)
    }
}

/// Point-in-time view of the engine, as returned by
/// [`Engine::status`](crate::Engine::status).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatus {
    pub state: EngineState,
    pub mode: RunMode,
    pub locks: u32,
    pub tick: u64,
    pub queued: usize,
    pub auto_snapshots: usize,
    pub explicit_snapshots: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_gate() {
        let mut control = Control::default();
        assert!(control.allows_idle());

        control.locks = 2;
        assert!(!control.allows_idle());

        control.locks = 0;
        control.mode = RunMode::Paused;
        assert!(!control.allows_idle());

        control.mode = RunMode::Reversing;
        assert!(control.allows_idle());
    }
}
