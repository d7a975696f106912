//! Timeline error types.

use rewind_blob::BlobError;
use rewind_core::{CodecError, DeviceError};
use thiserror::Error;

use crate::NodeId;

/// Timeline error type.
#[derive(Debug, Error)]
pub enum TimelineError {
    /// The node is not (or no longer) in the tree.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// A delete precondition does not hold. Nothing was changed.
    #[error("cannot delete {node}: {reason}")]
    CannotDelete { node: NodeId, reason: &'static str },

    /// An event would make ticks decrease along the current path.
    #[error("event at tick {tick} is before the current node's tick {current}")]
    TickRegression { current: u64, tick: u64 },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Blob store failure, including on-disk corruption.
    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),

    /// An event in the journal could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The device refused a state import or a replayed command.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// A journal record does not fit the tree rebuilt so far.
    #[error("bad journal record at offset {offset}: {reason}")]
    Journal { offset: u64, reason: String },
}

impl TimelineError {
    /// Whether the error means the timeline file is damaged.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        match self {
            Self::Blob(e) => e.is_corruption(),
            Self::Codec(_) | Self::Journal { .. } => true,
            _ => false,
        }
    }
}

/// Result type for timeline operations.
pub type TimelineResult<T> = Result<T, TimelineError>;
