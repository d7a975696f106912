//! The auditor that turns the engine's event stream into timeline nodes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rewind_core::{Auditor, Command, Device, Event, EventKind, SnapshotId};
use rewind_engine::{AUTO_SNAPSHOT_BASE, Engine, ReverseHistory};

use crate::{NodeId, Timeline, TimelineResult};

/// Recorder configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderConfig {
    /// Ticks between two automatic system bookmarks. `None` disables them.
    pub bookmark_interval: Option<u64>,
}

impl RecorderConfig {
    /// Read `REWIND_BOOKMARK_INTERVAL`; `0` or unset disables automatic
    /// bookmarks.
    #[must_use]
    pub fn from_env() -> Self {
        let interval: u64 = std::env::var("REWIND_BOOKMARK_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        Self {
            bookmark_interval: (interval > 0).then_some(interval),
        }
    }
}

/// Records every recordable event into a shared [`Timeline`].
///
/// Locks are always taken timeline first, device second. The engine
/// releases the device guard before running auditors, so the recorder can
/// export bookmarks from the worker thread.
pub struct Recorder<D> {
    timeline: Arc<Mutex<Timeline>>,
    device: Arc<Mutex<D>>,
    history: ReverseHistory,
    config: RecorderConfig,
    /// Tick of the last system bookmark.
    last_bookmark: Mutex<u64>,
    /// Node that was current when each explicit snapshot was taken.
    snapshots: Mutex<HashMap<SnapshotId, NodeId>>,
}

impl<D: Device> Recorder<D> {
    /// Recorder for the events of `engine`, sharing its device guard.
    pub fn new(timeline: Arc<Mutex<Timeline>>, engine: &Engine<D>, config: RecorderConfig) -> Self {
        let start = {
            let timeline = timeline.lock();
            timeline.node(timeline.current()).map_or(0, crate::Node::tick)
        };
        Self {
            timeline,
            device: engine.device(),
            history: engine.reverse_history(),
            config,
            last_bookmark: Mutex::new(start),
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn timeline(&self) -> &Arc<Mutex<Timeline>> {
        &self.timeline
    }

    #[must_use]
    pub const fn config(&self) -> RecorderConfig {
        self.config
    }

    /// Jump to `node` and resynchronize the device.
    ///
    /// The engine's reverse history belongs to the branch being left and is
    /// dropped. Pause the engine first; an event still in flight would
    /// otherwise be appended under the new position.
    pub fn jump_to(&self, node: NodeId) -> TimelineResult<()> {
        let mut timeline = self.timeline.lock();
        let mut device = self.device.lock();
        timeline.set_current(node, &mut *device)?;
        self.history.clear();
        *self.last_bookmark.lock() = device.tick();
        Ok(())
    }

    /// Create a user bookmark at the current position.
    pub fn bookmark(&self) -> TimelineResult<NodeId> {
        let mut timeline = self.timeline.lock();
        let device = self.device.lock();
        timeline.add_bookmark(false, &*device)
    }

    fn record(&self, timeline: &mut Timeline, event: &Event) {
        if let Err(e) = timeline.add(event.clone()) {
            tracing::warn!("Dropped event at tick {}: {e}", event.tick);
            return;
        }

        let Some(interval) = self.config.bookmark_interval else {
            return;
        };
        let mut last = self.last_bookmark.lock();
        if event.tick.saturating_sub(*last) < interval {
            return;
        }
        let device = self.device.lock();
        match timeline.add_bookmark(true, &*device) {
            Ok(node) => {
                tracing::debug!("System bookmark {node} at tick {}", event.tick);
                *last = event.tick;
            }
            Err(e) => tracing::warn!("System bookmark at tick {} failed: {e}", event.tick),
        }
    }

    /// Follow the engine after it replaced the machine state.
    fn follow(&self, timeline: &mut Timeline, event: &Event) -> TimelineResult<NodeId> {
        let known = match event.kind {
            EventKind::RevertToSnapshot { id } => self.snapshots.lock().get(&id).copied(),
            _ => None,
        };
        match (&event.kind, known) {
            (_, Some(node)) if timeline.contains(node) => {
                timeline.move_current_to(node)?;
                Ok(node)
            }
            // Reverse playback: the ring only ever holds states of the
            // current path.
            (EventKind::RevertToSnapshot { id }, None) if *id >= AUTO_SNAPSHOT_BASE => {
                timeline.move_current_back_to(event.tick)
            }
            _ => {
                let device = self.device.lock();
                timeline.adopt_state(&*device)
            }
        }
    }
}

impl<D: Device> Auditor for Recorder<D> {
    fn audit(&self, _command: &Command, event: &Event) {
        let mut timeline = self.timeline.lock();
        match event.kind {
            _ if event.is_recordable() => self.record(&mut timeline, event),
            EventKind::CreateSnapshot { id } => {
                self.snapshots.lock().insert(id, timeline.current());
            }
            EventKind::DeleteSnapshot { id } => {
                self.snapshots.lock().remove(&id);
            }
            EventKind::RevertToSnapshot { .. } | EventKind::LoadSnapshot { .. } => {
                match self.follow(&mut timeline, event) {
                    Ok(node) => tracing::trace!("Timeline followed the machine to {node}"),
                    Err(e) => tracing::warn!(
                        "Could not follow {} at tick {}: {e}",
                        event.replay_command().name(),
                        event.tick
                    ),
                }
                *self.last_bookmark.lock() = event.tick;
            }
            _ => {}
        }
    }
}

impl<D> core::fmt::Debug for Recorder<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Recorder")
            .field("config", &self.config)
            .field("snapshots", &self.snapshots.lock().len())
            .finish_non_exhaustive()
    }
}
