//! Append-only blob storage with delta chains.
//!
//! Every payload is written once and addressed by the offset of its record.
//! Successive machine snapshots are usually stored as diffs against an
//! earlier one, so a long history costs little more than its first state.
//!
//! ```text
//! ┌────────┬─────────┬───────────┬────────┬─────────┬──────┐
//! │ header │ frame   │ compressed│ frame  │ diff ───┼─► base
//! └────────┴─────────┴───────────┴────────┴─────────┴──────┘
//! ```
//!
//! Outer layers interleave their own frames (tag `>= 0x10`) with blobs and
//! scan them back with a [`RecordCursor`]. See [`record`] for the layout.
//!
//! # Example
//!
//! ```no_run
//! use rewind_blob::{BlobStore, StoreConfig};
//!
//! let store = BlobStore::open("states.rwd", StoreConfig::default())?;
//! let first = store.write_smallest(&[0u8; 4096], None)?;
//! let second = store.write_smallest(&[1u8; 4096], Some(first))?;
//! assert_eq!(store.read(second)?, vec![1u8; 4096]);
//! # Ok::<(), rewind_blob::BlobError>(())
//! ```

#![allow(clippy::redundant_pub_crate)]

mod config;
mod cursor;
mod delta;
mod error;
pub mod record;
mod replace;
mod store;

pub use config::StoreConfig;
pub use cursor::{Frame, RecordCursor};
pub use delta::{DeltaCodec, XorDelta};
pub use error::{BlobError, BlobResult};
pub use record::{BlobKind, FIRST_FRAME_TAG};
pub use replace::{Recovery, atomic_replace, backup_path, recover, scratch_path};
pub use store::{Blob, BlobStore};
