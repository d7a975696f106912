//! Timeline nodes.

use std::fmt;

use rewind_blob::Blob;
use rewind_core::Event;

/// Stable identifier of a timeline node.
///
/// Ids are allocated monotonically. A stale id simply stops resolving once
/// its node is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    /// The root is always node 0.
    pub const ROOT: Self = Self(0);

    #[must_use]
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Blob handles of a bookmark's machine state and screen thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub state: Blob,
    pub screen: Blob,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Synthetic start of history, at tick 0.
    Root,
    Action(Event),
    /// A node carrying a full machine snapshot.
    ///
    /// `event` is `None` for a bookmark inserted as a child rather than
    /// converted from an action. `system` marks bookmarks created
    /// automatically rather than by the user.
    Bookmark {
        event: Option<Event>,
        snapshot: Snapshot,
        system: bool,
    },
}

/// One point of the branching history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) tick: u64,
    pub(crate) payload: Payload,
    /// Events between the parent and this node's own event, left behind by
    /// deleting a bookmark that used to sit in between.
    pub(crate) prelude: Vec<Event>,
}

impl Node {
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// `None` only for the root.
    #[must_use]
    pub const fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in creation order.
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    #[must_use]
    pub const fn is_root(&self) -> bool {
        matches!(self.payload, Payload::Root)
    }

    #[must_use]
    pub const fn is_bookmark(&self) -> bool {
        matches!(self.payload, Payload::Bookmark { .. })
    }

    /// Events replayed before this node's own event when travelling down
    /// from its parent. Only non-empty for nodes moved up by
    /// [`Timeline::delete_bookmark`](crate::Timeline::delete_bookmark).
    #[must_use]
    pub fn prelude(&self) -> &[Event] {
        &self.prelude
    }

    /// The event recorded at this node, if any.
    #[must_use]
    pub const fn event(&self) -> Option<&Event> {
        match &self.payload {
            Payload::Action(event)
            | Payload::Bookmark {
                event: Some(event), ..
            } => Some(event),
            _ => None,
        }
    }

    #[must_use]
    pub const fn snapshot(&self) -> Option<Snapshot> {
        match self.payload {
            Payload::Bookmark { snapshot, .. } => Some(snapshot),
            _ => None,
        }
    }

    /// Root, bookmark, or a branch point (any child count other than one).
    ///
    /// Always derived from the current shape; never stored.
    #[must_use]
    pub fn is_interesting(&self) -> bool {
        self.is_root() || self.is_bookmark() || self.children.len() != 1
    }
}
