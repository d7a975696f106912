//! Execution engine: one worker thread, one device, a strictly ordered
//! event stream.
//!
//! ```text
//!  producers ──enqueue──► CommandQueue ──► Worker ──lock──► Device::apply
//!                             ▲              │
//!               IdleSupplier ─┘ (when empty) ├──► Completion::complete
//!                                            └──► Auditor::audit (in order)
//! ```
//!
//! The worker holds the device guard only while applying a single command.
//! Auditors run afterwards, on the worker thread, so they may take the
//! guard themselves (e.g. to export a bookmark) but must never wait on a
//! [`Completion`](rewind_core::Completion) of the same engine.
//!
//! Engine-level commands (pause, resume, reverse, lock, snapshots) are
//! handled here and never reach the device.

#![allow(clippy::redundant_pub_crate)]

mod config;
mod engine;
mod error;
mod mirror;
mod queue;
mod snapshot;
mod status;
mod worker;

pub use config::EngineConfig;
pub use engine::{Engine, SubscriptionId};
pub use error::{EngineError, EngineResult};
pub use mirror::EventMirror;
pub use queue::{CommandQueue, QueuedCommand};
pub use snapshot::{AUTO_SNAPSHOT_BASE, ReverseHistory};
pub use status::{EngineState, EngineStatus, RunMode};
