//! FIFO of commands waiting for the worker.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rewind_core::{Command, Completion};

/// A command waiting to be applied, with the signal its caller holds.
pub struct QueuedCommand {
    pub command: Command,
    pub completion: Completion,
}

impl core::fmt::Debug for QueuedCommand {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueuedCommand")
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

/// Multi-producer, single-consumer command queue.
///
/// Producers only ever push to the back. The worker pops the front and, when
/// a command has to be retried, puts it back at the front, so the retried
/// command keeps its place ahead of everything enqueued meanwhile.
#[derive(Default)]
pub struct CommandQueue {
    items: Mutex<VecDeque<QueuedCommand>>,
    not_empty: Condvar,
}

impl CommandQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command and wake the worker.
    pub fn push(&self, command: Command) -> Completion {
        let completion = Completion::new();
        self.items.lock().push_back(QueuedCommand {
            command,
            completion: completion.clone(),
        });
        self.not_empty.notify_one();
        completion
    }

    pub fn pop(&self) -> Option<QueuedCommand> {
        self.items.lock().pop_front()
    }

    /// Put a command back at the front for a retry.
    pub fn requeue(&self, queued: QueuedCommand) {
        self.items.lock().push_front(queued);
    }

    /// Block until the queue is non-empty or `timeout` elapses.
    ///
    /// Returns `true` if there is work.
    pub fn wait_for_work(&self, timeout: Duration) -> bool {
        let mut items = self.items.lock();
        if items.is_empty() {
            self.not_empty
                .wait_while_for(&mut items, |items| items.is_empty(), timeout);
        }
        !items.is_empty()
    }

    /// Drop every queued command without signaling it.
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let dropped = items.len();
        items.clear();
        dropped
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl core::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_requeue_keeps_front() {
        let queue = CommandQueue::new();
        queue.push(Command::RunUntil { stop_tick: 10 });
        queue.push(Command::Reset);

        let first = queue.pop().unwrap();
        queue.push(Command::Pause);
        queue.requeue(first);

        assert_eq!(queue.pop().unwrap().command, Command::RunUntil { stop_tick: 10 });
        assert_eq!(queue.pop().unwrap().command, Command::Reset);
        assert_eq!(queue.pop().unwrap().command, Command::Pause);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_wait_wakes_on_push() {
        let queue = Arc::new(CommandQueue::new());
        assert!(!queue.wait_for_work(Duration::from_millis(1)));

        let producer = Arc::clone(&queue);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            producer.push(Command::Reset);
        });
        assert!(queue.wait_for_work(Duration::from_secs(5)));
        handle.join().unwrap();
    }

    #[test]
    fn test_clear_leaves_completions_unsignaled() {
        let queue = CommandQueue::new();
        let completion = queue.push(Command::Reset);
        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
        assert!(!completion.is_complete());
    }
}
