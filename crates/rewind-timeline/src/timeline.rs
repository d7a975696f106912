//! The branching timeline and its persistence.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use rewind_blob::{Blob, BlobStore, RecordCursor, StoreConfig, atomic_replace, scratch_path};
use rewind_core::{Command, Device, Event};

use crate::change::{Change, ChangeKind, ObserverId, TimelineObserver};
use crate::journal::Record;
use crate::node::{Node, NodeId, Payload, Snapshot};
use crate::{TimelineError, TimelineResult};

/// Iterator over the live nodes of a [`Timeline`].
pub type Nodes<'a> = std::iter::Flatten<std::slice::Iter<'a, Option<Node>>>;

/// Branching history of machine events.
///
/// The tree lives in an arena: nodes sit in slots of a vector and refer to
/// each other by [`NodeId`]. Every mutation is first appended to the
/// journal in the backing [`BlobStore`], then applied in memory, then
/// reported to observers.
pub struct Timeline {
    nodes: Vec<Option<Node>>,
    slots: HashMap<NodeId, usize>,
    free: Vec<usize>,
    current: NodeId,
    next_id: u64,
    /// Machine state at the root, restored when jumping back to it.
    initial: Blob,
    store: Arc<BlobStore>,
    observers: Vec<(ObserverId, Box<dyn TimelineObserver>)>,
    next_observer: u64,
}

fn append(store: &BlobStore, record: &Record) -> TimelineResult<()> {
    store.append_frame(record.tag(), &record.payload()?)?;
    Ok(())
}

impl Timeline {
    // ==================== Construction ====================

    /// Create a timeline file at `path` whose root holds `initial_state`.
    ///
    /// Any existing file at `path` is replaced.
    pub fn create(
        path: impl AsRef<Path>,
        config: StoreConfig,
        initial_state: &[u8],
    ) -> TimelineResult<Self> {
        let store = Arc::new(BlobStore::create(path, config)?);
        append(&store, &Record::Initial)?;
        let initial = store.write_compressed(initial_state)?;
        store.sync()?;
        tracing::info!("Created timeline {}", store.path().display());
        Ok(Self::empty(store, initial))
    }

    /// Rebuild a timeline by replaying the journal of an existing file.
    ///
    /// A damaged tail is cut off at the last intact record.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> TimelineResult<Self> {
        let store = Arc::new(BlobStore::open(path, config)?);
        let timeline = Self::replay(&store)?;
        tracing::info!(
            "Opened timeline {} ({} nodes, current {})",
            store.path().display(),
            timeline.len(),
            timeline.current
        );
        Ok(timeline)
    }

    fn empty(store: Arc<BlobStore>, initial: Blob) -> Self {
        let root = Node {
            id: NodeId::ROOT,
            parent: None,
            children: Vec::new(),
            tick: 0,
            payload: Payload::Root,
            prelude: Vec::new(),
        };
        Self {
            nodes: vec![Some(root)],
            slots: HashMap::from([(NodeId::ROOT, 0)]),
            free: Vec::new(),
            current: NodeId::ROOT,
            next_id: 1,
            initial,
            store,
            observers: Vec::new(),
            next_observer: 0,
        }
    }

    fn replay(store: &Arc<BlobStore>) -> TimelineResult<Self> {
        let mut cursor = store.records()?;
        let mut timeline: Option<Self> = None;
        let mut records = 0usize;

        loop {
            let start = cursor.position();
            match Self::replay_next(store, &mut cursor, &mut timeline) {
                Ok(true) => records += 1,
                Ok(false) => break,
                Err(e) if e.is_corruption() => {
                    tracing::warn!(
                        "Timeline journal damaged at offset {start}: {e}; dropping the tail"
                    );
                    store.truncate(start)?;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::debug!("Replayed {records} journal records");
        timeline.ok_or_else(|| TimelineError::Journal {
            offset: cursor.position(),
            reason: "no initial state".to_owned(),
        })
    }

    /// Apply the next journal record. Returns `false` at the end of the file.
    fn replay_next(
        store: &Arc<BlobStore>,
        cursor: &mut RecordCursor,
        timeline: &mut Option<Self>,
    ) -> TimelineResult<bool> {
        if cursor.peek_tag()?.is_none() {
            return Ok(false);
        }
        let frame = cursor.read_frame()?;
        let record =
            Record::decode(frame.tag, &frame.payload)?.ok_or_else(|| TimelineError::Journal {
                offset: frame.offset,
                reason: format!("unknown journal tag {:#04x}", frame.tag),
            })?;
        let blobs = (0..record.trailing_blobs())
            .map(|_| cursor.skip_blob())
            .collect::<Result<Vec<_>, _>>()?;

        if matches!(record, Record::Initial) && timeline.is_none() {
            *timeline = Some(Self::empty(Arc::clone(store), blobs[0]));
            return Ok(true);
        }
        let Some(timeline) = timeline.as_mut() else {
            return Err(TimelineError::Journal {
                offset: frame.offset,
                reason: "record before the initial state".to_owned(),
            });
        };
        timeline
            .apply_record(record, &blobs)
            .map_err(|e| match e {
                TimelineError::Journal { reason, .. } => TimelineError::Journal {
                    offset: frame.offset,
                    reason,
                },
                e if e.is_corruption() => e,
                e => TimelineError::Journal {
                    offset: frame.offset,
                    reason: e.to_string(),
                },
            })?;
        Ok(true)
    }

    /// Apply a replayed journal record to the in-memory tree.
    fn apply_record(&mut self, record: Record, blobs: &[Blob]) -> TimelineResult<()> {
        match record {
            Record::AddAction { id, parent, event } => {
                self.check_new_child(id, parent, event.tick)?;
                self.insert(id, parent, event.tick, Payload::Action(event));
                self.current = id;
            }
            Record::AddBookmark {
                id,
                parent,
                tick,
                system,
                event,
            } => {
                self.check_new_child(id, parent, tick)?;
                let snapshot = Snapshot {
                    state: blobs[0],
                    screen: blobs[1],
                };
                self.insert(
                    id,
                    parent,
                    tick,
                    Payload::Bookmark {
                        event,
                        snapshot,
                        system,
                    },
                );
                self.current = id;
            }
            Record::ConvertToBookmark { id, system } => {
                let snapshot = Snapshot {
                    state: blobs[0],
                    screen: blobs[1],
                };
                if !self.convert(id, snapshot, system) {
                    return Err(TimelineError::Journal {
                        offset: 0,
                        reason: format!("{id} is not an action"),
                    });
                }
            }
            Record::DeleteBranch { id } => {
                self.check_delete_branch(id)?;
                self.remove_subtree(id);
            }
            Record::DeleteBookmark { id } => {
                self.check_delete_bookmark(id)?;
                self.demote(id);
            }
            Record::SetCurrent { id } => {
                if !self.contains(id) {
                    return Err(TimelineError::NodeNotFound(id));
                }
                self.current = id;
            }
            Record::Initial => {
                return Err(TimelineError::Journal {
                    offset: 0,
                    reason: "duplicate initial state".to_owned(),
                });
            }
            Record::Prelude { id, events } => {
                let node = self.get_mut(id).ok_or(TimelineError::NodeNotFound(id))?;
                node.prelude = events;
            }
        }
        Ok(())
    }

    // ==================== Arena primitives ====================

    fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes[*self.slots.get(&id)?].as_ref()
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let slot = *self.slots.get(&id)?;
        self.nodes[slot].as_mut()
    }

    fn node_or_err(&self, id: NodeId) -> TimelineResult<&Node> {
        self.get(id).ok_or(TimelineError::NodeNotFound(id))
    }

    fn current_node(&self) -> &Node {
        self.get(self.current)
            .unwrap_or_else(|| unreachable!("current node {} is always in the tree", self.current))
    }

    fn insert(&mut self, id: NodeId, parent: NodeId, tick: u64, payload: Payload) {
        let node = Node {
            id,
            parent: Some(parent),
            children: Vec::new(),
            tick,
            payload,
            prelude: Vec::new(),
        };
        let slot = if let Some(slot) = self.free.pop() {
            self.nodes[slot] = Some(node);
            slot
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        };
        self.slots.insert(id, slot);
        if let Some(parent) = self.get_mut(parent) {
            parent.children.push(id);
        }
        self.next_id = self.next_id.max(id.0 + 1);
    }

    fn release(&mut self, id: NodeId) -> Option<Node> {
        let slot = self.slots.remove(&id)?;
        self.free.push(slot);
        self.nodes[slot].take()
    }

    /// Detach `id` from its parent and free it with all its descendants.
    fn remove_subtree(&mut self, id: NodeId) -> usize {
        if let Some(parent) = self.get(id).and_then(Node::parent) {
            if let Some(parent) = self.get_mut(parent) {
                parent.children.retain(|child| *child != id);
            }
        }
        let mut removed = 0;
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.release(id) {
                stack.extend(node.children);
                removed += 1;
            }
        }
        removed
    }

    /// Turn an action leaf into a bookmark. Returns `false` if `id` is not
    /// an action.
    fn convert(&mut self, id: NodeId, snapshot: Snapshot, system: bool) -> bool {
        let Some(node) = self.get_mut(id) else {
            return false;
        };
        let Payload::Action(event) = &node.payload else {
            return false;
        };
        node.payload = Payload::Bookmark {
            event: Some(event.clone()),
            snapshot,
            system,
        };
        true
    }

    /// Demote a bookmark and move its children up to its parent, at its
    /// position. A bookmark without an event is removed entirely.
    ///
    /// The moved children inherit the demoted node's prelude and event as
    /// their own prelude, so replaying down to them still passes through it.
    fn demote(&mut self, id: NodeId) {
        let Some(node) = self.get_mut(id) else {
            return;
        };
        let Some(parent) = node.parent else {
            return;
        };
        let children = std::mem::take(&mut node.children);
        let mut carried = node.prelude.clone();
        let keep = match std::mem::replace(&mut node.payload, Payload::Root) {
            Payload::Bookmark {
                event: Some(event), ..
            } => {
                carried.push(event.clone());
                node.payload = Payload::Action(event);
                true
            }
            other => {
                node.payload = other;
                false
            }
        };

        for child in &children {
            if let Some(child) = self.get_mut(*child) {
                child.parent = Some(parent);
                let own = std::mem::take(&mut child.prelude);
                child.prelude = carried.iter().cloned().chain(own).collect();
            }
        }
        if let Some(parent) = self.get_mut(parent) {
            let position = parent
                .children
                .iter()
                .position(|child| *child == id)
                .unwrap_or(parent.children.len());
            let insert_at = if keep { position + 1 } else { position };
            if !keep && position < parent.children.len() {
                parent.children.remove(position);
            }
            let tail = parent.children.split_off(insert_at.min(parent.children.len()));
            parent.children.extend(children);
            parent.children.extend(tail);
        }
        if !keep {
            self.release(id);
        }
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.get(node).and_then(Node::parent) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    // ==================== Preconditions ====================

    fn check_new_child(&self, id: NodeId, parent: NodeId, tick: u64) -> TimelineResult<()> {
        if self.contains(id) {
            return Err(TimelineError::Journal {
                offset: 0,
                reason: format!("{id} already exists"),
            });
        }
        let parent = self.node_or_err(parent)?;
        if tick < parent.tick {
            return Err(TimelineError::TickRegression {
                current: parent.tick,
                tick,
            });
        }
        Ok(())
    }

    fn check_delete_branch(&self, id: NodeId) -> TimelineResult<()> {
        let node = self.node_or_err(id)?;
        if node.is_root() {
            return Err(TimelineError::CannotDelete {
                node: id,
                reason: "the root cannot be deleted",
            });
        }
        if self.is_ancestor_or_self(id, self.current) {
            return Err(TimelineError::CannotDelete {
                node: id,
                reason: "the branch contains the current node",
            });
        }
        Ok(())
    }

    fn check_delete_bookmark(&self, id: NodeId) -> TimelineResult<()> {
        let node = self.node_or_err(id)?;
        if node.is_root() {
            return Err(TimelineError::CannotDelete {
                node: id,
                reason: "the root cannot be deleted",
            });
        }
        if !node.is_bookmark() {
            return Err(TimelineError::CannotDelete {
                node: id,
                reason: "not a bookmark",
            });
        }
        if id == self.current {
            return Err(TimelineError::CannotDelete {
                node: id,
                reason: "it is the current node",
            });
        }
        Ok(())
    }

    // ==================== Mutations ====================

    /// Record `event` as a new child of the current node and make it
    /// current.
    pub fn add(&mut self, event: Event) -> TimelineResult<NodeId> {
        let parent = self.current;
        let parent_tick = self.current_node().tick;
        if event.tick < parent_tick {
            return Err(TimelineError::TickRegression {
                current: parent_tick,
                tick: event.tick,
            });
        }

        let id = NodeId(self.next_id);
        append(
            &self.store,
            &Record::AddAction {
                id,
                parent,
                event: event.clone(),
            },
        )?;
        self.insert(id, parent, event.tick, Payload::Action(event));
        self.current = id;
        self.notify(Change::new(id, ChangeKind::Add).with_parent(Some(parent)));
        Ok(id)
    }

    /// Move the current pointer to `node` and bring `device` to the state
    /// recorded there.
    ///
    /// The device is restored from the nearest bookmark at or above `node`
    /// (or from the initial state), then every action between that point
    /// and `node` is replayed, each preceded by its prelude. On error the
    /// tree is left untouched.
    pub fn set_current<D: Device + ?Sized>(
        &mut self,
        node: NodeId,
        device: &mut D,
    ) -> TimelineResult<()> {
        let path = self.path_from_root(node)?;
        let anchor = path
            .iter()
            .rposition(|id| self.get(*id).is_some_and(|n| n.is_root() || n.is_bookmark()))
            .unwrap_or(0);

        let state = match self.node_or_err(path[anchor])?.snapshot() {
            Some(snapshot) => self.store.read(snapshot.state)?,
            None => self.store.read(self.initial)?,
        };
        let replay: Vec<Command> = path[anchor + 1..]
            .iter()
            .filter_map(|id| self.get(*id))
            .flat_map(|node| node.prelude.iter().chain(node.event()))
            .map(Event::replay_command)
            .collect();

        device.import_state(&state)?;
        for command in &replay {
            device.apply(command)?;
        }
        tracing::debug!(
            "Jumped to {node}: restored {} and replayed {} events",
            path[anchor],
            replay.len()
        );

        if node != self.current {
            append(&self.store, &Record::SetCurrent { id: node })?;
            self.current = node;
            self.notify(Change::new(node, ChangeKind::UpdateCurrent));
        }
        Ok(())
    }

    /// Snapshot `device` into a bookmark at the current position.
    ///
    /// A current action leaf is converted in place; otherwise a new bookmark
    /// child is inserted and becomes current. `system` marks bookmarks made
    /// automatically.
    pub fn add_bookmark<D: Device + ?Sized>(
        &mut self,
        system: bool,
        device: &D,
    ) -> TimelineResult<NodeId> {
        let current = self.current_node();
        if !matches!(current.payload, Payload::Action(_)) || !current.children.is_empty() {
            return self.insert_bookmark(self.current, system, device);
        }

        let id = current.id;
        let record = Record::ConvertToBookmark { id, system };
        let snapshot = self.write_snapshot(&record, device, self.nearest_state(id))?;
        self.convert(id, snapshot, system);
        tracing::debug!("Bookmarked {id} (system: {system})");
        self.notify(Change::new(id, ChangeKind::Bookmark));
        Ok(id)
    }

    /// Record a machine state that no path through the tree reproduces,
    /// such as a loaded snapshot, as a system bookmark directly under the
    /// root, and make it current.
    pub fn adopt_state<D: Device + ?Sized>(&mut self, device: &D) -> TimelineResult<NodeId> {
        self.insert_bookmark(NodeId::ROOT, true, device)
    }

    fn insert_bookmark<D: Device + ?Sized>(
        &mut self,
        parent: NodeId,
        system: bool,
        device: &D,
    ) -> TimelineResult<NodeId> {
        let parent_tick = self.node_or_err(parent)?.tick;
        let tick = device.tick();
        if tick < parent_tick {
            return Err(TimelineError::TickRegression {
                current: parent_tick,
                tick,
            });
        }

        let id = NodeId(self.next_id);
        let record = Record::AddBookmark {
            id,
            parent,
            tick,
            system,
            event: None,
        };
        let snapshot = self.write_snapshot(&record, device, self.nearest_state(parent))?;
        self.insert(
            id,
            parent,
            tick,
            Payload::Bookmark {
                event: None,
                snapshot,
                system,
            },
        );
        self.current = id;
        tracing::debug!("Bookmarked {id} under {parent} (system: {system})");
        self.notify(Change::new(id, ChangeKind::Bookmark).with_parent(Some(parent)));
        Ok(id)
    }

    /// Append `record` followed by the state and screen blobs of `device`.
    fn write_snapshot<D: Device + ?Sized>(
        &self,
        record: &Record,
        device: &D,
        candidate: Blob,
    ) -> TimelineResult<Snapshot> {
        let state = device.export_state();
        let screen = device.export_screen();

        let mark = self.store.len();
        let written = append(&self.store, record).and_then(|()| {
            Ok(Snapshot {
                state: self.store.write_smallest(&state, Some(candidate))?,
                screen: self.store.write_smallest(&screen, None)?,
            })
        });
        if written.is_err() {
            // Keep the journal parseable: a frame must be followed by its blobs.
            self.store.truncate(mark)?;
        }
        written
    }

    /// Remove `node` and everything below it.
    ///
    /// Fails with [`TimelineError::CannotDelete`] for the root or a branch
    /// holding the current node.
    pub fn delete_branch(&mut self, node: NodeId) -> TimelineResult<()> {
        self.check_delete_branch(node)?;
        let parent = self.parent(node);
        append(&self.store, &Record::DeleteBranch { id: node })?;
        let removed = self.remove_subtree(node);
        tracing::debug!("Deleted branch {node} ({removed} nodes)");
        self.notify(Change::new(node, ChangeKind::DeleteBranch).with_parent(parent));
        Ok(())
    }

    /// Demote the bookmark `node` to an action and move its children up to
    /// its parent, right after it and in their original order. A bookmark
    /// that was inserted without an event is removed instead.
    ///
    /// The children keep the bookmark's event in their
    /// [`prelude`](Node::prelude), so jumping to them still reaches the
    /// state they were recorded in.
    pub fn delete_bookmark(&mut self, node: NodeId) -> TimelineResult<()> {
        self.check_delete_bookmark(node)?;
        let parent = self.parent(node);
        append(&self.store, &Record::DeleteBookmark { id: node })?;
        self.demote(node);
        self.notify(Change::new(node, ChangeKind::DeleteBookmark).with_parent(parent));
        Ok(())
    }

    /// Point `Current` at `node` without touching any device.
    ///
    /// For when the machine already reached `node`'s state by other means,
    /// e.g. the engine reverting to a snapshot taken there.
    pub fn move_current_to(&mut self, node: NodeId) -> TimelineResult<()> {
        self.node_or_err(node)?;
        if node != self.current {
            append(&self.store, &Record::SetCurrent { id: node })?;
            self.current = node;
            self.notify(Change::new(node, ChangeKind::UpdateCurrent));
        }
        Ok(())
    }

    /// Move `Current` up to its deepest ancestor (or itself) whose tick is
    /// at most `tick`, without touching any device.
    ///
    /// Used after the engine rewound the machine on its own.
    pub fn move_current_back_to(&mut self, tick: u64) -> TimelineResult<NodeId> {
        let mut node = self.current;
        while let Some(n) = self.get(node) {
            if n.tick <= tick {
                break;
            }
            match n.parent {
                Some(parent) => node = parent,
                None => break,
            }
        }
        if node != self.current {
            append(&self.store, &Record::SetCurrent { id: node })?;
            self.current = node;
            self.notify(Change::new(node, ChangeKind::UpdateCurrent));
        }
        Ok(node)
    }

    // ==================== Queries ====================

    #[must_use]
    pub const fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    #[must_use]
    pub const fn current(&self) -> NodeId {
        self.current
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.slots.contains_key(&id)
    }

    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(Node::parent)
    }

    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(Node::children).unwrap_or_default()
    }

    /// Number of nodes, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always `false`: the root is never deleted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Every node, in no particular order.
    pub fn iter(&self) -> Nodes<'_> {
        self.nodes.iter().flatten()
    }

    /// Ids from the root down to `id`, both included.
    pub fn path_from_root(&self, id: NodeId) -> TimelineResult<Vec<NodeId>> {
        let mut path = vec![id];
        let mut node = self.node_or_err(id)?;
        while let Some(parent) = node.parent {
            path.push(parent);
            node = self.node_or_err(parent)?;
        }
        path.reverse();
        Ok(path)
    }

    #[must_use]
    pub fn is_interesting(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(Node::is_interesting)
    }

    /// Nearest strict ancestor of `id` that is interesting.
    #[must_use]
    pub fn interesting_parent(&self, id: NodeId) -> Option<NodeId> {
        let mut node = self.parent(id)?;
        while !self.is_interesting(node) {
            node = self.parent(node)?;
        }
        Some(node)
    }

    /// All bookmarks, by ascending id.
    #[must_use]
    pub fn bookmarks(&self) -> Vec<NodeId> {
        let mut ids: Vec<_> = self
            .iter()
            .filter(|node| node.is_bookmark())
            .map(Node::id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Machine state stored in bookmark `id`.
    pub fn bookmark_state(&self, id: NodeId) -> TimelineResult<Vec<u8>> {
        let snapshot = self.bookmark_snapshot(id)?;
        Ok(self.store.read(snapshot.state)?)
    }

    /// Screen thumbnail stored in bookmark `id`.
    pub fn bookmark_screen(&self, id: NodeId) -> TimelineResult<Vec<u8>> {
        let snapshot = self.bookmark_snapshot(id)?;
        Ok(self.store.read(snapshot.screen)?)
    }

    fn bookmark_snapshot(&self, id: NodeId) -> TimelineResult<Snapshot> {
        self.node_or_err(id)?
            .snapshot()
            .ok_or(TimelineError::NodeNotFound(id))
    }

    /// Machine state at the root.
    pub fn initial_state(&self) -> TimelineResult<Vec<u8>> {
        Ok(self.store.read(self.initial)?)
    }

    /// State blob of the nearest bookmark at or above `id`, or the initial
    /// state.
    fn nearest_state(&self, id: NodeId) -> Blob {
        let mut node = self.get(id);
        while let Some(n) = node {
            if let Some(snapshot) = n.snapshot() {
                return snapshot.state;
            }
            node = n.parent.and_then(|parent| self.get(parent));
        }
        self.initial
    }

    #[must_use]
    pub fn store(&self) -> &Arc<BlobStore> {
        &self.store
    }

    /// Flush the journal to disk.
    pub fn sync(&self) -> TimelineResult<()> {
        Ok(self.store.sync()?)
    }

    // ==================== Observers ====================

    /// Register `observer` for every subsequent change.
    pub fn observe(&mut self, observer: impl TimelineObserver) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }

    fn notify(&self, change: Change) {
        for (_, observer) in &self.observers {
            observer.on_change(&change);
        }
    }

    // ==================== Compaction ====================

    /// Rewrite the file with only the live tree.
    ///
    /// Deleted branches and their snapshots are dropped and bookmark states
    /// are re-diffed along the surviving paths. The new file is built next
    /// to the old one and swapped in with [`atomic_replace`].
    pub fn compact(&mut self) -> TimelineResult<()> {
        let path = self.store.path().to_path_buf();
        let scratch = scratch_path(&path);
        let config = self.store.config();
        let before = self.store.len();

        let (initial, snapshots) = match self.write_compacted(&scratch, config) {
            Ok(written) => written,
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_file(&scratch) {
                    tracing::debug!("Could not remove {}: {cleanup}", scratch.display());
                }
                return Err(e);
            }
        };

        atomic_replace(&path, &scratch)?;
        self.store = Arc::new(BlobStore::open(&path, config)?);
        self.initial = initial;
        for (id, snapshot) in snapshots {
            if let Some(Payload::Bookmark { snapshot: old, .. }) =
                self.get_mut(id).map(|node| &mut node.payload)
            {
                *old = snapshot;
            }
        }

        tracing::info!(
            "Compacted {} from {before} to {} bytes",
            path.display(),
            self.store.len()
        );
        Ok(())
    }

    /// Write the live tree into a fresh store at `scratch`, returning the
    /// new initial blob and the new snapshot of every bookmark.
    fn write_compacted(
        &self,
        scratch: &Path,
        config: StoreConfig,
    ) -> TimelineResult<(Blob, Vec<(NodeId, Snapshot)>)> {
        let target = BlobStore::create(scratch, config)?;
        append(&target, &Record::Initial)?;
        let initial = target.write_compressed(&self.store.read(self.initial)?)?;

        let mut snapshots = Vec::new();
        // (node, state blob its bookmark children should diff against)
        let mut stack = vec![(NodeId::ROOT, initial)];
        while let Some((id, candidate)) = stack.pop() {
            let node = self.node_or_err(id)?;
            let child_candidate = match (&node.payload, node.parent) {
                (Payload::Root, _) | (_, None) => candidate,
                (Payload::Action(event), Some(parent)) => {
                    append(
                        &target,
                        &Record::AddAction {
                            id,
                            parent,
                            event: event.clone(),
                        },
                    )?;
                    candidate
                }
                (
                    Payload::Bookmark {
                        event,
                        snapshot,
                        system,
                    },
                    Some(parent),
                ) => {
                    append(
                        &target,
                        &Record::AddBookmark {
                            id,
                            parent,
                            tick: node.tick,
                            system: *system,
                            event: event.clone(),
                        },
                    )?;
                    let state = target
                        .write_smallest(&self.store.read(snapshot.state)?, Some(candidate))?;
                    let screen = target.write_smallest(&self.store.read(snapshot.screen)?, None)?;
                    snapshots.push((id, Snapshot { state, screen }));
                    state
                }
            };
            if !node.prelude.is_empty() {
                append(
                    &target,
                    &Record::Prelude {
                        id,
                        events: node.prelude.clone(),
                    },
                )?;
            }
            stack.extend(
                node.children
                    .iter()
                    .rev()
                    .map(|child| (*child, child_candidate)),
            );
        }

        append(&target, &Record::SetCurrent { id: self.current })?;
        target.sync()?;
        Ok((initial, snapshots))
    }
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a Node;
    type IntoIter = Nodes<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl core::fmt::Debug for Timeline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Timeline")
            .field("path", &self.store.path())
            .field("nodes", &self.len())
            .field("current", &self.current)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}
