//! On-disk record format.
//!
//! # File Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  header: b"RWNDBLB1" (8 bytes)                                    │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  record*                                                          │
//! └──────────────────────────────────────────────────────────────────┘
//!
//! record := 0x00                                     null
//!         | 0x01 len:u32 bytes[len]                  raw
//!         | 0x02 base:u64 len:u32 delta[len]         diff against `base`
//!         | 0x03 len:u32 zlib[len]                   compressed
//!         | tag(>=0x10) len:u32 payload[len]         frame (outer layers)
//! ```
//!
//! All integers are little-endian. A diff's `base` is the absolute offset
//! of an earlier record, so chains always point backwards and cannot cycle.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{BlobError, BlobResult};

/// Magic bytes at the start of every store file.
pub const HEADER: &[u8; 8] = b"RWNDBLB1";

/// Offset of the first record.
pub const FIRST_RECORD: u64 = HEADER.len() as u64;

pub const TAG_NULL: u8 = 0x00;
pub const TAG_RAW: u8 = 0x01;
pub const TAG_DIFF: u8 = 0x02;
pub const TAG_COMPRESSED: u8 = 0x03;

/// Lowest tag available to frames written by outer layers.
pub const FIRST_FRAME_TAG: u8 = 0x10;

/// Encoding of a blob record, as seen without reading its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    Null,
    Raw,
    Diff { base: u64 },
    Compressed,
}

/// Fixed-size part of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordHeader {
    Blob { kind: BlobKind, payload_len: u32 },
    Frame { tag: u8, payload_len: u32 },
}

impl RecordHeader {
    pub(crate) const fn payload_len(self) -> u32 {
        match self {
            Self::Blob { payload_len, .. } | Self::Frame { payload_len, .. } => payload_len,
        }
    }
}

/// Map an unexpected EOF to a truncation error at `offset`.
pub(crate) fn truncated_at(offset: u64) -> impl Fn(io::Error) -> BlobError {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            BlobError::Truncated { offset }
        } else {
            BlobError::Io(e)
        }
    }
}

/// Read the header of the record starting at `offset`.
pub(crate) fn read_header<R: Read>(reader: &mut R, offset: u64) -> BlobResult<RecordHeader> {
    let eof = truncated_at(offset);
    let tag = reader.read_u8().map_err(&eof)?;
    Ok(match tag {
        TAG_NULL => RecordHeader::Blob {
            kind: BlobKind::Null,
            payload_len: 0,
        },
        TAG_RAW => RecordHeader::Blob {
            kind: BlobKind::Raw,
            payload_len: reader.read_u32::<LittleEndian>().map_err(&eof)?,
        },
        TAG_DIFF => {
            let base = reader.read_u64::<LittleEndian>().map_err(&eof)?;
            if base >= offset || base < FIRST_RECORD {
                return Err(BlobError::Corrupt {
                    offset,
                    reason: format!("diff base {base} does not precede the record"),
                });
            }
            RecordHeader::Blob {
                kind: BlobKind::Diff { base },
                payload_len: reader.read_u32::<LittleEndian>().map_err(&eof)?,
            }
        }
        TAG_COMPRESSED => RecordHeader::Blob {
            kind: BlobKind::Compressed,
            payload_len: reader.read_u32::<LittleEndian>().map_err(&eof)?,
        },
        tag if tag >= FIRST_FRAME_TAG => RecordHeader::Frame {
            tag,
            payload_len: reader.read_u32::<LittleEndian>().map_err(&eof)?,
        },
        tag => return Err(BlobError::UnknownTag { offset, tag }),
    })
}

/// Serialize a blob record into `out`.
pub(crate) fn encode_blob(out: &mut Vec<u8>, kind: BlobKind, payload: &[u8]) -> BlobResult<()> {
    let len = payload_len(payload)?;
    match kind {
        BlobKind::Null => out.write_u8(TAG_NULL)?,
        BlobKind::Raw => {
            out.write_u8(TAG_RAW)?;
            out.write_u32::<LittleEndian>(len)?;
        }
        BlobKind::Diff { base } => {
            out.write_u8(TAG_DIFF)?;
            out.write_u64::<LittleEndian>(base)?;
            out.write_u32::<LittleEndian>(len)?;
        }
        BlobKind::Compressed => {
            out.write_u8(TAG_COMPRESSED)?;
            out.write_u32::<LittleEndian>(len)?;
        }
    }
    out.write_all(payload)?;
    Ok(())
}

/// Serialize a frame record into `out`.
pub(crate) fn encode_frame(out: &mut Vec<u8>, tag: u8, payload: &[u8]) -> BlobResult<()> {
    if tag < FIRST_FRAME_TAG {
        return Err(BlobError::InvalidFrameTag(tag));
    }
    out.write_u8(tag)?;
    out.write_u32::<LittleEndian>(payload_len(payload)?)?;
    out.write_all(payload)?;
    Ok(())
}

fn payload_len(payload: &[u8]) -> BlobResult<u32> {
    u32::try_from(payload.len()).map_err(|_| {
        BlobError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "payload larger than 4 GiB",
        ))
    })
}

/// Total encoded size of a record with the given header.
pub(crate) const fn record_len(header: RecordHeader) -> u64 {
    let fixed = match header {
        RecordHeader::Blob {
            kind: BlobKind::Null,
            ..
        } => 1,
        RecordHeader::Blob {
            kind: BlobKind::Diff { .. },
            ..
        } => 1 + 8 + 4,
        RecordHeader::Blob { .. } | RecordHeader::Frame { .. } => 1 + 4,
    };
    fixed + header.payload_len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_layout() {
        let mut out = Vec::new();
        encode_blob(&mut out, BlobKind::Diff { base: 8 }, &[0xaa, 0xbb]).unwrap();
        assert_eq!(
            out,
            vec![TAG_DIFF, 8, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 0xaa, 0xbb]
        );

        let header = read_header(&mut out.as_slice(), 100).unwrap();
        assert_eq!(
            header,
            RecordHeader::Blob {
                kind: BlobKind::Diff { base: 8 },
                payload_len: 2
            }
        );
        assert_eq!(record_len(header), out.len() as u64);
    }

    #[test]
    fn test_diff_must_point_backwards() {
        let mut out = Vec::new();
        encode_blob(&mut out, BlobKind::Diff { base: 50 }, &[]).unwrap();
        assert!(matches!(
            read_header(&mut out.as_slice(), 50),
            Err(BlobError::Corrupt { offset: 50, .. })
        ));
    }

    #[test]
    fn test_unknown_tag() {
        assert!(matches!(
            read_header(&mut [0x07u8].as_slice(), 9),
            Err(BlobError::UnknownTag { offset: 9, tag: 0x07 })
        ));
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(
            read_header(&mut [TAG_RAW, 1].as_slice(), 12),
            Err(BlobError::Truncated { offset: 12 })
        ));
    }

    #[test]
    fn test_frame_tag_range() {
        let mut out = Vec::new();
        assert!(matches!(
            encode_frame(&mut out, TAG_COMPRESSED, b""),
            Err(BlobError::InvalidFrameTag(TAG_COMPRESSED))
        ));
        encode_frame(&mut out, 0x10, b"abc").unwrap();
        assert_eq!(out, vec![0x10, 3, 0, 0, 0, b'a', b'b', b'c']);
    }
}
