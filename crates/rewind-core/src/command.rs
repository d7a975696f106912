//! Requests sent to the execution engine.

use std::fmt;

/// Snapshot identifier used by the in-memory snapshot commands.
pub type SnapshotId = u64;

/// A request to change or query machine/engine state.
///
/// Every variant is serializable through [`Encode`](crate::Encode) and keeps a
/// stable discriminant byte, so command streams written by one build can be
/// read by another.
#[derive(Clone, PartialEq, Eq)]
pub enum Command {
    /// Reset the machine.
    Reset,
    /// Press or release a key.
    KeyPress { code: u8, down: bool },
    /// Insert a disc image into a drive (an empty image ejects).
    LoadDisc { drive: u8, image: Vec<u8> },
    /// Insert a tape image.
    LoadTape { image: Vec<u8> },
    /// Run the machine until its tick counter reaches `stop_tick`.
    RunUntil { stop_tick: u64 },
    /// Switch the machine to another hardware/ROM version.
    SwitchVersion { version: u8 },
    /// Replace the machine state with an exported state blob.
    LoadSnapshot { blob: Vec<u8> },
    /// Capture the machine state into the engine's in-memory snapshot table.
    CreateSnapshot { id: SnapshotId },
    /// Restore a snapshot captured with `CreateSnapshot`.
    RevertToSnapshot { id: SnapshotId },
    /// Forget a snapshot captured with `CreateSnapshot`.
    DeleteSnapshot { id: SnapshotId },
    Pause,
    Resume,
    /// Play history backwards using the automatic snapshot ring.
    Reverse,
    Lock,
    Unlock,
    /// Stop the worker. Anything queued after it is never applied.
    Quit,
    /// A command written by a newer build that this build cannot interpret.
    Unsupported { tag: u8, payload: Vec<u8> },
}

impl Command {
    /// Short variant name, used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Reset => "Reset",
            Self::KeyPress { .. } => "KeyPress",
            Self::LoadDisc { .. } => "LoadDisc",
            Self::LoadTape { .. } => "LoadTape",
            Self::RunUntil { .. } => "RunUntil",
            Self::SwitchVersion { .. } => "SwitchVersion",
            Self::LoadSnapshot { .. } => "LoadSnapshot",
            Self::CreateSnapshot { .. } => "CreateSnapshot",
            Self::RevertToSnapshot { .. } => "RevertToSnapshot",
            Self::DeleteSnapshot { .. } => "DeleteSnapshot",
            Self::Pause => "Pause",
            Self::Resume => "Resume",
            Self::Reverse => "Reverse",
            Self::Lock => "Lock",
            Self::Unlock => "Unlock",
            Self::Quit => "Quit",
            Self::Unsupported { .. } => "Unsupported",
        }
    }

    /// Whether the command is interpreted by the engine itself rather than
    /// forwarded to the device.
    #[must_use]
    pub const fn is_engine_control(&self) -> bool {
        matches!(
            self,
            Self::LoadSnapshot { .. }
                | Self::CreateSnapshot { .. }
                | Self::RevertToSnapshot { .. }
                | Self::DeleteSnapshot { .. }
                | Self::Pause
                | Self::Resume
                | Self::Reverse
                | Self::Lock
                | Self::Unlock
                | Self::Quit
        )
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Image and snapshot payloads can be hundreds of kilobytes.
        match self {
            Self::KeyPress { code, down } => f
                .debug_struct("KeyPress")
                .field("code", code)
                .field("down", down)
                .finish(),
            Self::LoadDisc { drive, image } => f
                .debug_struct("LoadDisc")
                .field("drive", drive)
                .field("image_len", &image.len())
                .finish(),
            Self::LoadTape { image } => f
                .debug_struct("LoadTape")
                .field("image_len", &image.len())
                .finish(),
            Self::RunUntil { stop_tick } => f
                .debug_struct("RunUntil")
                .field("stop_tick", stop_tick)
                .finish(),
            Self::SwitchVersion { version } => f
                .debug_struct("SwitchVersion")
                .field("version", version)
                .finish(),
            Self::LoadSnapshot { blob } => f
                .debug_struct("LoadSnapshot")
                .field("blob_len", &blob.len())
                .finish(),
            Self::CreateSnapshot { id }
            | Self::RevertToSnapshot { id }
            | Self::DeleteSnapshot { id } => f.debug_struct(self.name()).field("id", id).finish(),
            Self::Unsupported { tag, payload } => f
                .debug_struct("Unsupported")
                .field("tag", tag)
                .field("payload_len", &payload.len())
                .finish(),
            _ => f.write_str(self.name()),
        }
    }
}
