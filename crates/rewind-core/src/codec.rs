//! Byte codec for commands and events.
//!
//! # Layout
//!
//! All integers are little-endian.
//!
//! ```text
//! Command := tag:u8 fields...
//! Event   := tick:u64 tag:u8 fields...
//!
//! bytes   := len:u32 data[len]
//! samples := count:u32 u16[count]
//! bool    := u8 (0 or 1)
//! ```
//!
//! | tag  | variant          | fields                            |
//! |------|------------------|-----------------------------------|
//! | 0x01 | Reset            |                                   |
//! | 0x02 | KeyPress         | code:u8 down:bool                 |
//! | 0x03 | LoadDisc         | drive:u8 image:bytes              |
//! | 0x04 | LoadTape         | image:bytes                       |
//! | 0x05 | RunUntil         | stop_tick:u64 (event: +samples)   |
//! | 0x06 | SwitchVersion    | version:u8                        |
//! | 0x07 | LoadSnapshot     | blob:bytes                        |
//! | 0x08 | CreateSnapshot   | id:u64                            |
//! | 0x09 | RevertToSnapshot | id:u64                            |
//! | 0x0A | DeleteSnapshot   | id:u64                            |
//! | 0x0B | Pause            |                                   |
//! | 0x0C | Resume           |                                   |
//! | 0x0D | Reverse          |                                   |
//! | 0x0E | Lock             |                                   |
//! | 0x0F | Unlock           |                                   |
//! | 0x10 | Quit             | (commands only)                   |
//!
//! A command tag this build does not know decodes to
//! [`Command::Unsupported`] with the rest of the input as payload, so newer
//! command streams stay readable.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::{Command, Event, EventKind};

pub const TAG_RESET: u8 = 0x01;
pub const TAG_KEY_PRESS: u8 = 0x02;
pub const TAG_LOAD_DISC: u8 = 0x03;
pub const TAG_LOAD_TAPE: u8 = 0x04;
pub const TAG_RUN_UNTIL: u8 = 0x05;
pub const TAG_SWITCH_VERSION: u8 = 0x06;
pub const TAG_LOAD_SNAPSHOT: u8 = 0x07;
pub const TAG_CREATE_SNAPSHOT: u8 = 0x08;
pub const TAG_REVERT_TO_SNAPSHOT: u8 = 0x09;
pub const TAG_DELETE_SNAPSHOT: u8 = 0x0A;
pub const TAG_PAUSE: u8 = 0x0B;
pub const TAG_RESUME: u8 = 0x0C;
pub const TAG_REVERSE: u8 = 0x0D;
pub const TAG_LOCK: u8 = 0x0E;
pub const TAG_UNLOCK: u8 = 0x0F;
pub const TAG_QUIT: u8 = 0x10;

/// Upper bound on a single length-prefixed payload (256 MiB).
const MAX_PAYLOAD_LEN: u32 = 256 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Unknown event tag: {0:#04x}")]
    UnknownEventTag(u8),
    #[error("Payload too long: {len} > {max}")]
    PayloadTooLong { len: u32, max: u32 },
    #[error("Invalid bool byte: {0}")]
    InvalidBool(u8),
}

pub type CodecResult<T> = Result<T, CodecError>;

pub trait Encode {
    fn encode<W: Write>(&self, writer: &mut W) -> CodecResult<()>;

    /// Encode into a fresh buffer.
    fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }
}

pub trait Decode: Sized {
    fn decode<R: Read>(reader: &mut R) -> CodecResult<Self>;

    fn from_bytes(mut bytes: &[u8]) -> CodecResult<Self> {
        Self::decode(&mut bytes)
    }
}

/// Length prefix for `len` items, refusing anything the decoder would reject.
fn length_prefix(len: usize, max: u32) -> CodecResult<u32> {
    match u32::try_from(len) {
        Ok(len) if len <= max => Ok(len),
        Ok(len) => Err(CodecError::PayloadTooLong { len, max }),
        Err(_) => Err(CodecError::PayloadTooLong { len: u32::MAX, max }),
    }
}

fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> CodecResult<()> {
    let len = length_prefix(bytes.len(), MAX_PAYLOAD_LEN)?;
    writer.write_u32::<LittleEndian>(len)?;
    writer.write_all(bytes)?;
    Ok(())
}

fn read_bytes<R: Read>(reader: &mut R) -> CodecResult<Vec<u8>> {
    let len = reader.read_u32::<LittleEndian>()?;
    if len > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLong {
            len,
            max: MAX_PAYLOAD_LEN,
        });
    }
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data)?;
    Ok(data)
}

fn read_bool<R: Read>(reader: &mut R) -> CodecResult<bool> {
    match reader.read_u8()? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(CodecError::InvalidBool(other)),
    }
}

fn write_samples<W: Write>(writer: &mut W, samples: &[u16]) -> CodecResult<()> {
    let count = length_prefix(samples.len(), MAX_PAYLOAD_LEN / 2)?;
    writer.write_u32::<LittleEndian>(count)?;
    for &sample in samples {
        writer.write_u16::<LittleEndian>(sample)?;
    }
    Ok(())
}

fn read_samples<R: Read>(reader: &mut R) -> CodecResult<Vec<u16>> {
    let count = reader.read_u32::<LittleEndian>()?;
    if count > MAX_PAYLOAD_LEN / 2 {
        return Err(CodecError::PayloadTooLong {
            len: count,
            max: MAX_PAYLOAD_LEN / 2,
        });
    }
    let mut samples = vec![0u16; count as usize];
    reader.read_u16_into::<LittleEndian>(&mut samples)?;
    Ok(samples)
}

impl Encode for Command {
    fn encode<W: Write>(&self, writer: &mut W) -> CodecResult<()> {
        match self {
            Self::Reset => writer.write_u8(TAG_RESET)?,
            Self::KeyPress { code, down } => {
                writer.write_u8(TAG_KEY_PRESS)?;
                writer.write_u8(*code)?;
                writer.write_u8(u8::from(*down))?;
            }
            Self::LoadDisc { drive, image } => {
                writer.write_u8(TAG_LOAD_DISC)?;
                writer.write_u8(*drive)?;
                write_bytes(writer, image)?;
            }
            Self::LoadTape { image } => {
                writer.write_u8(TAG_LOAD_TAPE)?;
                write_bytes(writer, image)?;
            }
            Self::RunUntil { stop_tick } => {
                writer.write_u8(TAG_RUN_UNTIL)?;
                writer.write_u64::<LittleEndian>(*stop_tick)?;
            }
            Self::SwitchVersion { version } => {
                writer.write_u8(TAG_SWITCH_VERSION)?;
                writer.write_u8(*version)?;
            }
            Self::LoadSnapshot { blob } => {
                writer.write_u8(TAG_LOAD_SNAPSHOT)?;
                write_bytes(writer, blob)?;
            }
            Self::CreateSnapshot { id } => {
                writer.write_u8(TAG_CREATE_SNAPSHOT)?;
                writer.write_u64::<LittleEndian>(*id)?;
            }
            Self::RevertToSnapshot { id } => {
                writer.write_u8(TAG_REVERT_TO_SNAPSHOT)?;
                writer.write_u64::<LittleEndian>(*id)?;
            }
            Self::DeleteSnapshot { id } => {
                writer.write_u8(TAG_DELETE_SNAPSHOT)?;
                writer.write_u64::<LittleEndian>(*id)?;
            }
            Self::Pause => writer.write_u8(TAG_PAUSE)?,
            Self::Resume => writer.write_u8(TAG_RESUME)?,
            Self::Reverse => writer.write_u8(TAG_REVERSE)?,
            Self::Lock => writer.write_u8(TAG_LOCK)?,
            Self::Unlock => writer.write_u8(TAG_UNLOCK)?,
            Self::Quit => writer.write_u8(TAG_QUIT)?,
            Self::Unsupported { tag, payload } => {
                writer.write_u8(*tag)?;
                writer.write_all(payload)?;
            }
        }
        Ok(())
    }
}

impl Decode for Command {
    fn decode<R: Read>(reader: &mut R) -> CodecResult<Self> {
        let tag = reader.read_u8()?;
        Ok(match tag {
            TAG_RESET => Self::Reset,
            TAG_KEY_PRESS => Self::KeyPress {
                code: reader.read_u8()?,
                down: read_bool(reader)?,
            },
            TAG_LOAD_DISC => Self::LoadDisc {
                drive: reader.read_u8()?,
                image: read_bytes(reader)?,
            },
            TAG_LOAD_TAPE => Self::LoadTape {
                image: read_bytes(reader)?,
            },
            TAG_RUN_UNTIL => Self::RunUntil {
                stop_tick: reader.read_u64::<LittleEndian>()?,
            },
            TAG_SWITCH_VERSION => Self::SwitchVersion {
                version: reader.read_u8()?,
            },
            TAG_LOAD_SNAPSHOT => Self::LoadSnapshot {
                blob: read_bytes(reader)?,
            },
            TAG_CREATE_SNAPSHOT => Self::CreateSnapshot {
                id: reader.read_u64::<LittleEndian>()?,
            },
            TAG_REVERT_TO_SNAPSHOT => Self::RevertToSnapshot {
                id: reader.read_u64::<LittleEndian>()?,
            },
            TAG_DELETE_SNAPSHOT => Self::DeleteSnapshot {
                id: reader.read_u64::<LittleEndian>()?,
            },
            TAG_PAUSE => Self::Pause,
            TAG_RESUME => Self::Resume,
            TAG_REVERSE => Self::Reverse,
            TAG_LOCK => Self::Lock,
            TAG_UNLOCK => Self::Unlock,
            TAG_QUIT => Self::Quit,
            tag => {
                let mut payload = Vec::new();
                reader.read_to_end(&mut payload)?;
                tracing::debug!("Decoded unsupported command tag {tag:#04x}");
                Self::Unsupported { tag, payload }
            }
        })
    }
}

impl Encode for Event {
    fn encode<W: Write>(&self, writer: &mut W) -> CodecResult<()> {
        writer.write_u64::<LittleEndian>(self.tick)?;
        match &self.kind {
            EventKind::RunUntil { stop_tick, samples } => {
                writer.write_u8(TAG_RUN_UNTIL)?;
                writer.write_u64::<LittleEndian>(*stop_tick)?;
                write_samples(writer, samples)
            }
            // Every other kind has the same fields as the command it echoes.
            _ => self.replay_command().encode(writer),
        }
    }
}

impl Decode for Event {
    fn decode<R: Read>(reader: &mut R) -> CodecResult<Self> {
        let tick = reader.read_u64::<LittleEndian>()?;
        let tag = reader.read_u8()?;
        let kind = match tag {
            TAG_RESET => EventKind::Reset,
            TAG_KEY_PRESS => EventKind::KeyPress {
                code: reader.read_u8()?,
                down: read_bool(reader)?,
            },
            TAG_LOAD_DISC => EventKind::LoadDisc {
                drive: reader.read_u8()?,
                image: read_bytes(reader)?,
            },
            TAG_LOAD_TAPE => EventKind::LoadTape {
                image: read_bytes(reader)?,
            },
            TAG_RUN_UNTIL => EventKind::RunUntil {
                stop_tick: reader.read_u64::<LittleEndian>()?,
                samples: read_samples(reader)?,
            },
            TAG_SWITCH_VERSION => EventKind::SwitchVersion {
                version: reader.read_u8()?,
            },
            TAG_LOAD_SNAPSHOT => EventKind::LoadSnapshot {
                blob: read_bytes(reader)?,
            },
            TAG_CREATE_SNAPSHOT => EventKind::CreateSnapshot {
                id: reader.read_u64::<LittleEndian>()?,
            },
            TAG_REVERT_TO_SNAPSHOT => EventKind::RevertToSnapshot {
                id: reader.read_u64::<LittleEndian>()?,
            },
            TAG_DELETE_SNAPSHOT => EventKind::DeleteSnapshot {
                id: reader.read_u64::<LittleEndian>()?,
            },
            TAG_PAUSE => EventKind::Pause,
            TAG_RESUME => EventKind::Resume,
            TAG_REVERSE => EventKind::Reverse,
            TAG_LOCK => EventKind::Lock,
            TAG_UNLOCK => EventKind::Unlock,
            other => return Err(CodecError::UnknownEventTag(other)),
        };
        Ok(Self { tick, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_layout() {
        let bytes = Command::KeyPress {
            code: 42,
            down: true,
        }
        .to_bytes()
        .unwrap();
        assert_eq!(bytes, vec![TAG_KEY_PRESS, 42, 1]);

        let bytes = Command::RunUntil { stop_tick: 0x0102 }.to_bytes().unwrap();
        assert_eq!(bytes, vec![TAG_RUN_UNTIL, 0x02, 0x01, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_command_decode() {
        let command = Command::LoadDisc {
            drive: 1,
            image: vec![0xde, 0xad],
        };
        let decoded = Command::from_bytes(&command.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, command);
    }

    #[test]
    fn test_unknown_command_tag_is_preserved() {
        let decoded = Command::from_bytes(&[0x42, 1, 2, 3]).unwrap();
        assert_eq!(
            decoded,
            Command::Unsupported {
                tag: 0x42,
                payload: vec![1, 2, 3]
            }
        );
        // Re-encoding yields the original bytes so the command can be relayed.
        assert_eq!(decoded.to_bytes().unwrap(), vec![0x42, 1, 2, 3]);
    }

    #[test]
    fn test_event_with_samples() {
        let event = Event::new(
            19_999,
            EventKind::RunUntil {
                stop_tick: 20_000,
                samples: vec![0, 0x8000, 0xffff],
            },
        );
        let bytes = event.to_bytes().unwrap();
        assert_eq!(&bytes[..8], &19_999u64.to_le_bytes());
        assert_eq!(bytes[8], TAG_RUN_UNTIL);
        assert_eq!(Event::from_bytes(&bytes).unwrap(), event);
    }

    #[test]
    fn test_unknown_event_tag_fails() {
        let mut bytes = 5u64.to_le_bytes().to_vec();
        bytes.push(0x7f);
        assert!(matches!(
            Event::from_bytes(&bytes),
            Err(CodecError::UnknownEventTag(0x7f))
        ));
    }

    #[test]
    fn test_truncated_input_fails() {
        let bytes = Command::LoadTape {
            image: vec![1; 10],
        }
        .to_bytes()
        .unwrap();
        assert!(matches!(
            Command::from_bytes(&bytes[..bytes.len() - 1]),
            Err(CodecError::Io(_))
        ));
    }

    #[test]
    fn test_encode_refuses_what_decode_rejects() {
        assert_eq!(length_prefix(3, MAX_PAYLOAD_LEN).unwrap(), 3);
        assert_eq!(
            length_prefix(MAX_PAYLOAD_LEN as usize, MAX_PAYLOAD_LEN).unwrap(),
            MAX_PAYLOAD_LEN
        );
        assert!(matches!(
            length_prefix(MAX_PAYLOAD_LEN as usize + 1, MAX_PAYLOAD_LEN),
            Err(CodecError::PayloadTooLong { len, .. }) if len == MAX_PAYLOAD_LEN + 1
        ));
        assert!(matches!(
            length_prefix(usize::MAX, MAX_PAYLOAD_LEN),
            Err(CodecError::PayloadTooLong { len: u32::MAX, .. })
        ));
    }

    #[test]
    fn test_invalid_bool() {
        assert!(matches!(
            Command::from_bytes(&[TAG_KEY_PRESS, 1, 2]),
            Err(CodecError::InvalidBool(2))
        ));
    }
}
