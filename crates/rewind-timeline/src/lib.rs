//! Branching, persistent history of machine events.
//!
//! Every recordable [`Event`](rewind_core::Event) becomes a node under the
//! current one, so going back in time and acting differently grows a new
//! branch instead of overwriting history. Bookmarks carry full machine
//! snapshots and anchor jumps: moving to any node restores the nearest
//! bookmark above it and replays the actions in between.
//!
//! ```text
//! Root ── a1 ── a2 ── [B3] ── a4 ── a5      <- Current
//!                       └──── a6 ── a7
//! ```
//!
//! The tree is persisted as a journal of small frames interleaved with the
//! snapshot blobs in a single [`BlobStore`](rewind_blob::BlobStore) file.
//! Opening the file replays the journal; [`Timeline::compact`] rewrites it
//! with only the live tree.
//!
//! ```no_run
//! use rewind_blob::StoreConfig;
//! use rewind_core::{Command, Device, toy::ToyMachine};
//! use rewind_timeline::Timeline;
//!
//! let mut machine = ToyMachine::default();
//! let mut timeline =
//!     Timeline::create("session.rwd", StoreConfig::default(), &machine.export_state())?;
//!
//! let event = machine.apply(&Command::RunUntil { stop_tick: 1_000 })?.unwrap();
//! timeline.add(event)?;
//! let bookmark = timeline.add_bookmark(false, &machine)?;
//! timeline.set_current(bookmark, &mut machine)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![allow(clippy::redundant_pub_crate)]

mod change;
mod error;
pub mod journal;
mod node;
mod recorder;
mod timeline;

pub use change::{Change, ChangeKind, ObserverId, TimelineObserver};
pub use error::{TimelineError, TimelineResult};
pub use node::{Node, NodeId, Payload, Snapshot};
pub use recorder::{Recorder, RecorderConfig};
pub use timeline::{Nodes, Timeline};
