//! Tick-stamped outcomes of applied commands.

use std::fmt;

use crate::{Command, SnapshotId};

/// The payload of an [`Event`], mirroring the shape of [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Reset,
    KeyPress { code: u8, down: bool },
    LoadDisc { drive: u8, image: Vec<u8> },
    LoadTape { image: Vec<u8> },
    /// The machine ran towards `stop_tick`; the tick actually reached is the
    /// event's own tick.
    RunUntil { stop_tick: u64, samples: Vec<u16> },
    SwitchVersion { version: u8 },
    LoadSnapshot { blob: Vec<u8> },
    CreateSnapshot { id: SnapshotId },
    RevertToSnapshot { id: SnapshotId },
    DeleteSnapshot { id: SnapshotId },
    Pause,
    Resume,
    Reverse,
    Lock,
    Unlock,
}

/// The deterministic outcome of applying one [`Command`].
///
/// Events are immutable once created. `Clone` deep-copies any owned payload,
/// so a clone can be handed to another consumer (e.g. a network mirror)
/// without sharing buffers with the timeline.
#[derive(Clone, PartialEq, Eq)]
pub struct Event {
    /// Machine tick immediately after the command was applied.
    pub tick: u64,
    pub kind: EventKind,
}

impl Event {
    #[must_use]
    pub const fn new(tick: u64, kind: EventKind) -> Self {
        Self { tick, kind }
    }

    /// Tick reached by a `RunUntil`, or the stamp tick for everything else.
    #[must_use]
    pub const fn reached_tick(&self) -> u64 {
        self.tick
    }

    /// Whether a `RunUntil` event stopped before its requested tick.
    #[must_use]
    pub const fn is_partial_run(&self) -> bool {
        matches!(self.kind, EventKind::RunUntil { stop_tick, .. } if self.tick < stop_tick)
    }

    /// Whether the event changes deterministic machine history and therefore
    /// belongs on the timeline.
    #[must_use]
    pub const fn is_recordable(&self) -> bool {
        matches!(
            self.kind,
            EventKind::Reset
                | EventKind::KeyPress { .. }
                | EventKind::LoadDisc { .. }
                | EventKind::LoadTape { .. }
                | EventKind::RunUntil { .. }
                | EventKind::SwitchVersion { .. }
        )
    }

    /// The command that reproduces this event when applied to a machine in
    /// the state the event was recorded from.
    ///
    /// A `RunUntil` replays up to the tick actually reached, not the tick
    /// originally requested.
    #[must_use]
    pub fn replay_command(&self) -> Command {
        match &self.kind {
            EventKind::Reset => Command::Reset,
            EventKind::KeyPress { code, down } => Command::KeyPress {
                code: *code,
                down: *down,
            },
            EventKind::LoadDisc { drive, image } => Command::LoadDisc {
                drive: *drive,
                image: image.clone(),
            },
            EventKind::LoadTape { image } => Command::LoadTape {
                image: image.clone(),
            },
            EventKind::RunUntil { .. } => Command::RunUntil {
                stop_tick: self.tick,
            },
            EventKind::SwitchVersion { version } => Command::SwitchVersion { version: *version },
            EventKind::LoadSnapshot { blob } => Command::LoadSnapshot { blob: blob.clone() },
            EventKind::CreateSnapshot { id } => Command::CreateSnapshot { id: *id },
            EventKind::RevertToSnapshot { id } => Command::RevertToSnapshot { id: *id },
            EventKind::DeleteSnapshot { id } => Command::DeleteSnapshot { id: *id },
            EventKind::Pause => Command::Pause,
            EventKind::Resume => Command::Resume,
            EventKind::Reverse => Command::Reverse,
            EventKind::Lock => Command::Lock,
            EventKind::Unlock => Command::Unlock,
        }
    }

    /// Build the event that echoes `command` with no extra outcome data.
    ///
    /// Returns `None` for `RunUntil` (its event carries audio), `Quit` and
    /// unsupported commands.
    #[must_use]
    pub fn echo(tick: u64, command: &Command) -> Option<Self> {
        let kind = match command {
            Command::Reset => EventKind::Reset,
            Command::KeyPress { code, down } => EventKind::KeyPress {
                code: *code,
                down: *down,
            },
            Command::LoadDisc { drive, image } => EventKind::LoadDisc {
                drive: *drive,
                image: image.clone(),
            },
            Command::LoadTape { image } => EventKind::LoadTape {
                image: image.clone(),
            },
            Command::SwitchVersion { version } => EventKind::SwitchVersion { version: *version },
            Command::LoadSnapshot { blob } => EventKind::LoadSnapshot { blob: blob.clone() },
            Command::CreateSnapshot { id } => EventKind::CreateSnapshot { id: *id },
            Command::RevertToSnapshot { id } => EventKind::RevertToSnapshot { id: *id },
            Command::DeleteSnapshot { id } => EventKind::DeleteSnapshot { id: *id },
            Command::Pause => EventKind::Pause,
            Command::Resume => EventKind::Resume,
            Command::Reverse => EventKind::Reverse,
            Command::Lock => EventKind::Lock,
            Command::Unlock => EventKind::Unlock,
            Command::RunUntil { .. } | Command::Quit | Command::Unsupported { .. } => return None,
        };
        Some(Self { tick, kind })
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EventKind::RunUntil { stop_tick, samples } => f
                .debug_struct("RunUntil")
                .field("tick", &self.tick)
                .field("stop_tick", stop_tick)
                .field("samples", &samples.len())
                .finish(),
            _ => write!(f, "{:?}@{}", self.replay_command(), self.tick),
        }
    }
}
