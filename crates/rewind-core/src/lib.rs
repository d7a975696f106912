//! Command/event contract for the rewind record-and-replay stack.
//!
//! Producers (UI, network, idle supplier) send [`Command`]s to the execution
//! engine. The engine applies each one to the [`Device`] and publishes the
//! resulting [`Event`], stamped with the device tick, to every [`Auditor`].
//! The timeline records those events; replaying them against a device
//! restored from a snapshot reproduces the same history bit for bit.
//!
//! ```text
//!  enqueue(Command) ──► Engine worker ──► Device::apply ──► Event
//!        │                                                   │
//!   Completion ◄──────────── Applied / Rejected              ▼
//!                                             Auditor::audit(&Command, &Event)
//! ```
//!
//! Both sum types have a stable byte encoding ([`Encode`] / [`Decode`]) so
//! they can be persisted or mirrored over a network.

mod auditor;
mod codec;
mod command;
mod completion;
mod device;
mod event;
#[cfg(feature = "toy")]
pub mod toy;

pub use auditor::Auditor;
pub use codec::{CodecError, CodecResult, Decode, Encode};
pub use command::{Command, SnapshotId};
pub use completion::{Completion, Outcome, Rejection};
pub use device::{AudioBuffer, Device, DeviceError, IdleSupplier, NoAudio, VsyncSupplier};
pub use event::{Event, EventKind};

/// Tag constants of the command/event byte layout.
pub mod tags {
    pub use crate::codec::{
        TAG_CREATE_SNAPSHOT, TAG_DELETE_SNAPSHOT, TAG_KEY_PRESS, TAG_LOAD_DISC, TAG_LOAD_SNAPSHOT,
        TAG_LOAD_TAPE, TAG_LOCK, TAG_PAUSE, TAG_QUIT, TAG_RESET, TAG_RESUME, TAG_REVERSE,
        TAG_REVERT_TO_SNAPSHOT, TAG_RUN_UNTIL, TAG_SWITCH_VERSION, TAG_UNLOCK,
    };
}
