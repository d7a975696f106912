//! One-shot completion signal attached to every enqueued command.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Why the engine refused to apply a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Unknown command or a command the device does not implement.
    Unsupported,
    /// The device failed while applying the command.
    DeviceFault(String),
    /// A snapshot command named an id the engine does not hold.
    UnknownSnapshot(u64),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => write!(f, "unsupported command"),
            Self::DeviceFault(reason) => write!(f, "device fault: {reason}"),
            Self::UnknownSnapshot(id) => write!(f, "unknown snapshot {id}"),
        }
    }
}

/// Final result of a command, delivered through its [`Completion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Rejected(Rejection),
}

impl Outcome {
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[derive(Default)]
struct Slot {
    outcome: Mutex<Option<Outcome>>,
    signal: Condvar,
}

/// A one-shot signal set by the engine once a command is applied or
/// rejected.
///
/// Clones share the same slot: the engine keeps one, the caller keeps
/// another. The first [`complete`](Self::complete) wins; later calls are
/// ignored.
#[derive(Clone, Default)]
pub struct Completion {
    slot: Arc<Slot>,
}

impl Completion {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the outcome and wake every waiter.
    ///
    /// Returns `false` if the signal had already been set.
    pub fn complete(&self, outcome: Outcome) -> bool {
        let mut slot = self.slot.outcome.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.slot.signal.notify_all();
        true
    }

    /// The outcome, if the signal has been set.
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome> {
        self.slot.outcome.lock().clone()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.slot.outcome.lock().is_some()
    }

    /// Block until the signal is set.
    ///
    /// Commands queued behind a `Quit` are never signaled; prefer
    /// [`wait_timeout`](Self::wait_timeout) unless the engine is known to be
    /// running.
    pub fn wait(&self) -> Outcome {
        let mut slot = self.slot.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.slot.signal.wait(&mut slot);
        }
    }

    /// Block until the signal is set or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        let mut slot = self.slot.outcome.lock();
        if slot.is_none() {
            self.slot
                .signal
                .wait_while_for(&mut slot, |outcome| outcome.is_none(), timeout);
        }
        slot.clone()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("outcome", &*self.slot.outcome.lock())
            .finish()
    }
}
