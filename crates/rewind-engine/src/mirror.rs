//! Forwarding of the event stream to another thread, e.g. a network peer.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender};
use rewind_core::{Auditor, Command, Encode, Event};

/// Auditor that sends every encoded [`Event`] down a channel.
///
/// The receiving side decodes frames with
/// [`Decode::from_bytes`](rewind_core::Decode::from_bytes). Sending never
/// blocks the worker; once the receiver is dropped the mirror goes quiet.
pub struct EventMirror {
    tx: Sender<Vec<u8>>,
    recordable_only: bool,
    disconnected: AtomicBool,
}

impl EventMirror {
    /// Mirror into an unbounded channel and return its receiving end.
    #[must_use]
    pub fn channel() -> (Self, Receiver<Vec<u8>>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self::new(tx), rx)
    }

    #[must_use]
    pub const fn new(tx: Sender<Vec<u8>>) -> Self {
        Self {
            tx,
            recordable_only: false,
            disconnected: AtomicBool::new(false),
        }
    }

    /// Forward only events that change machine history.
    #[must_use]
    pub const fn recordable_only(mut self) -> Self {
        self.recordable_only = true;
        self
    }
}

impl Auditor for EventMirror {
    fn audit(&self, _command: &Command, event: &Event) {
        if self.recordable_only && !event.is_recordable() {
            return;
        }
        if self.disconnected.load(Ordering::Relaxed) {
            return;
        }
        let frame = match event.to_bytes() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Event at tick {} not mirrored: {e}", event.tick);
                return;
            }
        };
        if self.tx.send(frame).is_err() {
            tracing::debug!("Event mirror receiver dropped, mirror disabled");
            self.disconnected.store(true, Ordering::Relaxed);
        }
    }
}

impl core::fmt::Debug for EventMirror {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventMirror")
            .field("recordable_only", &self.recordable_only)
            .field("disconnected", &self.disconnected.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use rewind_core::{Decode, EventKind};

    use super::*;

    #[test]
    fn test_mirror_sends_decodable_frames() {
        let (mirror, rx) = EventMirror::channel();
        let event = Event::new(
            640,
            EventKind::RunUntil {
                stop_tick: 700,
                samples: vec![1, 2],
            },
        );
        mirror.audit(&Command::RunUntil { stop_tick: 700 }, &event);

        let frame = rx.try_recv().unwrap();
        assert_eq!(Event::from_bytes(&frame).unwrap(), event);
    }

    #[test]
    fn test_recordable_filter() {
        let (mirror, rx) = EventMirror::channel();
        let mirror = mirror.recordable_only();
        mirror.audit(&Command::Pause, &Event::new(1, EventKind::Pause));
        mirror.audit(&Command::Reset, &Event::new(2, EventKind::Reset));

        let only = Event::from_bytes(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(only.kind, EventKind::Reset);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_is_harmless() {
        let (mirror, rx) = EventMirror::channel();
        drop(rx);
        mirror.audit(&Command::Reset, &Event::new(0, EventKind::Reset));
        mirror.audit(&Command::Reset, &Event::new(1, EventKind::Reset));
        assert!(mirror.disconnected.load(Ordering::Relaxed));
    }
}
