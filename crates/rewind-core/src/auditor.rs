//! Subscribers notified of every processed `(Command, Event)` pair.

use crate::{Command, Event};

/// Receives every event the engine produces, in production order.
///
/// Auditors run synchronously on the engine's worker thread after the device
/// guard has been released. They must not block on a command completion from
/// inside [`audit`](Self::audit): the worker that would signal it is the one
/// running the callback.
pub trait Auditor: Send + Sync + 'static {
    fn audit(&self, command: &Command, event: &Event);
}

impl<F> Auditor for F
where
    F: Fn(&Command, &Event) + Send + Sync + 'static,
{
    fn audit(&self, command: &Command, event: &Event) {
        self(command, event);
    }
}
