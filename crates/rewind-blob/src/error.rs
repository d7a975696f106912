//! Blob store error types.

use thiserror::Error;

/// Blob store error type.
#[derive(Debug, Error)]
pub enum BlobError {
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The file does not start with the blob store header.
    #[error("not a blob store file (bad header)")]
    BadHeader,

    /// A record starts with a tag this build does not know.
    #[error("unknown record tag {tag:#04x} at offset {offset}")]
    UnknownTag { offset: u64, tag: u8 },

    /// A record declares more bytes than the file holds.
    #[error("truncated record at offset {offset}")]
    Truncated { offset: u64 },

    /// A record is structurally invalid.
    #[error("corrupt record at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    /// A blob handle points at a frame owned by an outer layer.
    #[error("record at offset {offset} is a frame (tag {tag:#04x}), not a blob")]
    NotABlob { offset: u64, tag: u8 },

    /// Frame tags must not collide with blob encodings.
    #[error("invalid frame tag {0:#04x}")]
    InvalidFrameTag(u8),

    /// The delta codec failed to apply a delta.
    #[error("delta error: {0}")]
    Delta(String),
}

impl BlobError {
    /// Whether the error means the file content is damaged, as opposed to an
    /// environment failure.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::BadHeader
                | Self::UnknownTag { .. }
                | Self::Truncated { .. }
                | Self::Corrupt { .. }
                | Self::NotABlob { .. }
                | Self::Delta(_)
        )
    }
}

/// Result type for blob store operations.
pub type BlobResult<T> = Result<T, BlobError>;
