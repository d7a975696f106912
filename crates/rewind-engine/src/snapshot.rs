//! In-memory machine snapshots: explicit ones named by callers, and a ring
//! of automatic ones feeding reverse playback.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use rewind_core::SnapshotId;

/// First id handed to automatic snapshots. Explicit ids are looked up
/// before automatic ones, so callers should stay below this.
pub const AUTO_SNAPSHOT_BASE: SnapshotId = 1 << 63;

#[derive(Debug, Clone)]
pub struct AutoSnapshot {
    pub id: SnapshotId,
    pub tick: u64,
    pub state: Vec<u8>,
}

#[derive(Debug)]
pub struct Snapshots {
    explicit: HashMap<SnapshotId, Vec<u8>>,
    ring: VecDeque<AutoSnapshot>,
    next_auto_id: SnapshotId,
    last_auto_tick: Option<u64>,
    interval: u64,
    max: usize,
}

impl Snapshots {
    #[must_use]
    pub fn new(interval: u64, max: usize) -> Self {
        Self {
            explicit: HashMap::new(),
            ring: VecDeque::with_capacity(max),
            next_auto_id: AUTO_SNAPSHOT_BASE,
            last_auto_tick: None,
            interval: interval.max(1),
            max,
        }
    }

    /// Store `state` under `id`, replacing any previous snapshot with that id.
    pub fn create(&mut self, id: SnapshotId, state: Vec<u8>) {
        self.explicit.insert(id, state);
    }

    /// State to revert to for `id`.
    ///
    /// Reverting to an automatic snapshot consumes it together with every
    /// newer automatic snapshot. Reverting to an explicit one discards the
    /// whole automatic ring.
    pub fn revert(&mut self, id: SnapshotId) -> Option<Vec<u8>> {
        if let Some(state) = self.explicit.get(&id).cloned() {
            self.clear_auto();
            return Some(state);
        }
        let position = self.ring.iter().position(|snapshot| snapshot.id == id)?;
        let snapshot = self.ring.drain(position..).next()?;
        self.last_auto_tick = Some(snapshot.tick);
        Some(snapshot.state)
    }

    pub fn delete(&mut self, id: SnapshotId) -> bool {
        if self.explicit.remove(&id).is_some() {
            return true;
        }
        let before = self.ring.len();
        self.ring.retain(|snapshot| snapshot.id != id);
        self.ring.len() != before
    }

    /// Whether an automatic snapshot should be taken at `tick`.
    #[must_use]
    pub fn is_due(&self, tick: u64) -> bool {
        if self.max == 0 {
            return false;
        }
        self.last_auto_tick
            .is_none_or(|last| tick < last || tick - last >= self.interval)
    }

    pub fn record(&mut self, tick: u64, state: Vec<u8>) -> SnapshotId {
        let id = self.next_auto_id;
        self.next_auto_id += 1;
        self.last_auto_tick = Some(tick);
        if self.ring.len() == self.max {
            self.ring.pop_front();
        }
        self.ring.push_back(AutoSnapshot { id, tick, state });
        id
    }

    /// Take the newest automatic snapshot for a reverse step.
    pub fn pop_newest(&mut self) -> Option<AutoSnapshot> {
        let snapshot = self.ring.pop_back()?;
        self.last_auto_tick = Some(snapshot.tick);
        Some(snapshot)
    }

    /// Forget the reverse history, after the machine state was replaced.
    pub fn clear_auto(&mut self) {
        self.ring.clear();
        self.last_auto_tick = None;
    }

    #[must_use]
    pub fn auto_len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn explicit_len(&self) -> usize {
        self.explicit.len()
    }
}

/// Handle to an engine's automatic snapshot ring.
///
/// Anything that replaces the machine state outside the command queue, such
/// as a timeline jump, must [`clear`](Self::clear) it. Otherwise reverse
/// playback walks back into the history that was left.
#[derive(Debug, Clone)]
pub struct ReverseHistory(pub(crate) Arc<Mutex<Snapshots>>);

impl ReverseHistory {
    pub fn clear(&self) {
        self.0.lock().clear_auto();
    }

    /// Automatic snapshots left to step back through.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().auto_len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_is_bounded() {
        let mut snapshots = Snapshots::new(100, 3);
        for tick in [0, 100, 200, 300, 400] {
            assert!(snapshots.is_due(tick));
            snapshots.record(tick, vec![tick as u8]);
        }
        assert_eq!(snapshots.auto_len(), 3);
        assert_eq!(snapshots.pop_newest().unwrap().tick, 400);
        assert_eq!(snapshots.pop_newest().unwrap().tick, 300);
        assert_eq!(snapshots.pop_newest().unwrap().tick, 200);
        assert!(snapshots.pop_newest().is_none());
    }

    #[test]
    fn test_interval() {
        let mut snapshots = Snapshots::new(100, 8);
        snapshots.record(50, Vec::new());
        assert!(!snapshots.is_due(149));
        assert!(snapshots.is_due(150));
        // Going back in time always allows a fresh snapshot.
        assert!(snapshots.is_due(10));
    }

    #[test]
    fn test_revert_to_auto_drops_newer() {
        let mut snapshots = Snapshots::new(1, 8);
        let first = snapshots.record(1, vec![1]);
        snapshots.record(2, vec![2]);
        snapshots.record(3, vec![3]);

        assert_eq!(snapshots.revert(first), Some(vec![1]));
        assert_eq!(snapshots.auto_len(), 0);
        assert_eq!(snapshots.revert(first), None);
    }

    #[test]
    fn test_handle_clears_shared_ring() {
        let history = ReverseHistory(Arc::new(Mutex::new(Snapshots::new(10, 4))));
        history.0.lock().record(0, vec![0]);
        history.0.lock().record(10, vec![1]);
        assert_eq!(history.clone().len(), 2);

        history.clone().clear();
        assert!(history.is_empty());
        assert!(history.0.lock().is_due(20));
    }

    #[test]
    fn test_explicit_survives_revert() {
        let mut snapshots = Snapshots::new(1, 0);
        snapshots.create(7, vec![7, 7]);
        assert_eq!(snapshots.revert(7), Some(vec![7, 7]));
        assert_eq!(snapshots.revert(7), Some(vec![7, 7]));
        assert!(snapshots.delete(7));
        assert!(!snapshots.delete(7));
        assert!(!snapshots.is_due(0));
    }
}
