//! Journal frames appended to the timeline's blob store after each mutation.
//!
//! ```text
//! 0x10 AddAction         id:u64 parent:u64 event
//! 0x11 AddBookmark       id:u64 parent:u64 tick:u64 system:u8 has_event:u8 [event]  + state blob + screen blob
//! 0x12 ConvertToBookmark id:u64 system:u8                                          + state blob + screen blob
//! 0x13 DeleteBranch      id:u64
//! 0x14 DeleteBookmark    id:u64
//! 0x15 SetCurrent        id:u64
//! 0x16 Initial                                                                    + state blob
//! 0x17 Prelude           id:u64 count:u32 event*
//! ```
//!
//! `Prelude` is only written by compaction; live deletes of bookmarks
//! rebuild preludes while replaying `DeleteBookmark`.
//!
//! Replaying the frames in file order rebuilds the tree. Blobs following a
//! frame are stepped over with the cursor's skip path and resolved lazily.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rewind_core::{CodecError, Decode, Encode, Event};

use crate::{NodeId, TimelineResult};

pub const TAG_ADD_ACTION: u8 = 0x10;
pub const TAG_ADD_BOOKMARK: u8 = 0x11;
pub const TAG_CONVERT_TO_BOOKMARK: u8 = 0x12;
pub const TAG_DELETE_BRANCH: u8 = 0x13;
pub const TAG_DELETE_BOOKMARK: u8 = 0x14;
pub const TAG_SET_CURRENT: u8 = 0x15;
pub const TAG_INITIAL: u8 = 0x16;
pub const TAG_PRELUDE: u8 = 0x17;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    AddAction {
        id: NodeId,
        parent: NodeId,
        event: Event,
    },
    AddBookmark {
        id: NodeId,
        parent: NodeId,
        tick: u64,
        system: bool,
        event: Option<Event>,
    },
    ConvertToBookmark {
        id: NodeId,
        system: bool,
    },
    DeleteBranch {
        id: NodeId,
    },
    DeleteBookmark {
        id: NodeId,
    },
    SetCurrent {
        id: NodeId,
    },
    Initial,
    Prelude {
        id: NodeId,
        events: Vec<Event>,
    },
}

impl Record {
    /// Number of blob records that follow this frame.
    #[must_use]
    pub const fn trailing_blobs(&self) -> usize {
        match self {
            Self::AddBookmark { .. } | Self::ConvertToBookmark { .. } => 2,
            Self::Initial => 1,
            _ => 0,
        }
    }

    #[must_use]
    pub const fn tag(&self) -> u8 {
        match self {
            Self::AddAction { .. } => TAG_ADD_ACTION,
            Self::AddBookmark { .. } => TAG_ADD_BOOKMARK,
            Self::ConvertToBookmark { .. } => TAG_CONVERT_TO_BOOKMARK,
            Self::DeleteBranch { .. } => TAG_DELETE_BRANCH,
            Self::DeleteBookmark { .. } => TAG_DELETE_BOOKMARK,
            Self::SetCurrent { .. } => TAG_SET_CURRENT,
            Self::Initial => TAG_INITIAL,
            Self::Prelude { .. } => TAG_PRELUDE,
        }
    }

    /// Frame payload, without tag or length.
    pub fn payload(&self) -> TimelineResult<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Self::AddAction { id, parent, event } => {
                out.write_u64::<LittleEndian>(id.0)?;
                out.write_u64::<LittleEndian>(parent.0)?;
                event.encode(&mut out)?;
            }
            Self::AddBookmark {
                id,
                parent,
                tick,
                system,
                event,
            } => {
                out.write_u64::<LittleEndian>(id.0)?;
                out.write_u64::<LittleEndian>(parent.0)?;
                out.write_u64::<LittleEndian>(*tick)?;
                out.write_u8(u8::from(*system))?;
                out.write_u8(u8::from(event.is_some()))?;
                if let Some(event) = event {
                    event.encode(&mut out)?;
                }
            }
            Self::ConvertToBookmark { id, system } => {
                out.write_u64::<LittleEndian>(id.0)?;
                out.write_u8(u8::from(*system))?;
            }
            Self::DeleteBranch { id } | Self::DeleteBookmark { id } | Self::SetCurrent { id } => {
                out.write_u64::<LittleEndian>(id.0)?;
            }
            Self::Initial => {}
            Self::Prelude { id, events } => {
                out.write_u64::<LittleEndian>(id.0)?;
                let count = u32::try_from(events.len()).map_err(|_| CodecError::PayloadTooLong {
                    len: u32::MAX,
                    max: u32::MAX,
                })?;
                out.write_u32::<LittleEndian>(count)?;
                for event in events {
                    event.encode(&mut out)?;
                }
            }
        }
        Ok(out)
    }

    /// Decode a frame. `None` if the tag is not a journal tag.
    pub fn decode(tag: u8, payload: &[u8]) -> TimelineResult<Option<Self>> {
        let mut reader = payload;
        let r = &mut reader;
        let id = |r: &mut &[u8]| -> TimelineResult<NodeId> {
            Ok(NodeId(r.read_u64::<LittleEndian>()?))
        };
        let flag = |r: &mut &[u8]| -> TimelineResult<bool> {
            match r.read_u8()? {
                0 => Ok(false),
                1 => Ok(true),
                other => Err(CodecError::InvalidBool(other).into()),
            }
        };

        let record = match tag {
            TAG_ADD_ACTION => Self::AddAction {
                id: id(r)?,
                parent: id(r)?,
                event: Event::decode(r)?,
            },
            TAG_ADD_BOOKMARK => {
                let id_value = id(r)?;
                let parent = id(r)?;
                let tick = r.read_u64::<LittleEndian>()?;
                let system = flag(r)?;
                let event = if flag(r)? {
                    Some(Event::decode(r)?)
                } else {
                    None
                };
                Self::AddBookmark {
                    id: id_value,
                    parent,
                    tick,
                    system,
                    event,
                }
            }
            TAG_CONVERT_TO_BOOKMARK => Self::ConvertToBookmark {
                id: id(r)?,
                system: flag(r)?,
            },
            TAG_DELETE_BRANCH => Self::DeleteBranch { id: id(r)? },
            TAG_DELETE_BOOKMARK => Self::DeleteBookmark { id: id(r)? },
            TAG_SET_CURRENT => Self::SetCurrent { id: id(r)? },
            TAG_INITIAL => Self::Initial,
            TAG_PRELUDE => {
                let id_value = id(r)?;
                let count = r.read_u32::<LittleEndian>()?;
                let events = (0..count)
                    .map(|_| Event::decode(r))
                    .collect::<Result<Vec<_>, _>>()?;
                Self::Prelude {
                    id: id_value,
                    events,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use rewind_core::EventKind;

    use super::*;

    #[test]
    fn test_bookmark_with_event() {
        let record = Record::AddBookmark {
            id: NodeId(12),
            parent: NodeId(11),
            tick: 4_000,
            system: true,
            event: Some(Event::new(
                4_000,
                EventKind::RunUntil {
                    stop_tick: 4_000,
                    samples: vec![3, 4],
                },
            )),
        };
        let payload = record.payload().unwrap();
        assert_eq!(Record::decode(record.tag(), &payload).unwrap(), Some(record));
    }

    #[test]
    fn test_prelude_frame() {
        let record = Record::Prelude {
            id: NodeId(5),
            events: vec![
                Event::new(
                    200,
                    EventKind::RunUntil {
                        stop_tick: 200,
                        samples: Vec::new(),
                    },
                ),
                Event::new(200, EventKind::Reset),
            ],
        };
        let payload = record.payload().unwrap();
        assert_eq!(&payload[8..12], &[2, 0, 0, 0]);
        assert_eq!(Record::decode(TAG_PRELUDE, &payload).unwrap(), Some(record));
        // A count promising more events than the frame holds.
        assert!(Record::decode(TAG_PRELUDE, &payload[..12]).is_err());
    }

    #[test]
    fn test_fixed_layout() {
        let payload = Record::SetCurrent { id: NodeId(258) }.payload().unwrap();
        assert_eq!(payload, vec![2, 1, 0, 0, 0, 0, 0, 0]);
        assert!(Record::Initial.payload().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_tag_and_short_payload() {
        assert_eq!(Record::decode(0x7e, &[]).unwrap(), None);
        assert!(Record::decode(TAG_DELETE_BRANCH, &[1, 2]).is_err());
        assert!(Record::decode(TAG_CONVERT_TO_BOOKMARK, &[0, 0, 0, 0, 0, 0, 0, 0, 7]).is_err());
    }
}
