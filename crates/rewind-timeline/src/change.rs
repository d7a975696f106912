//! Change notifications for incremental views of the tree.

use crate::NodeId;

/// What kind of mutation a [`Change`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A node was appended.
    Add,
    /// A node and its subtree were removed.
    DeleteBranch,
    /// A bookmark was demoted or removed; its children moved up.
    DeleteBookmark,
    /// `Current` moved.
    UpdateCurrent,
    /// A bookmark was created, by conversion or insertion.
    Bookmark,
}

/// One structural mutation, delivered synchronously after it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    /// The node added, deleted, converted, or made current.
    pub node: NodeId,
    pub kind: ChangeKind,
    /// Parent of `node` before the mutation, for deletions.
    pub original_parent: Option<NodeId>,
}

impl Change {
    pub(crate) const fn new(node: NodeId, kind: ChangeKind) -> Self {
        Self {
            node,
            kind,
            original_parent: None,
        }
    }

    pub(crate) const fn with_parent(mut self, parent: Option<NodeId>) -> Self {
        self.original_parent = parent;
        self
    }
}

/// Identifies an observer registered with
/// [`Timeline::observe`](crate::Timeline::observe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

/// Receives every [`Change`] of a timeline.
pub trait TimelineObserver: Send + Sync + 'static {
    fn on_change(&self, change: &Change);
}

impl<F> TimelineObserver for F
where
    F: Fn(&Change) + Send + Sync + 'static,
{
    fn on_change(&self, change: &Change) {
        self(change);
    }
}
