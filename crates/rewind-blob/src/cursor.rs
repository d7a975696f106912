//! Sequential scan over the records of a store file.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::record::{RecordHeader, read_header, record_len, truncated_at};
use crate::{Blob, BlobError, BlobResult};

/// A frame written by an outer layer through
/// [`BlobStore::append_frame`](crate::BlobStore::append_frame).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub offset: u64,
    pub tag: u8,
    pub payload: Vec<u8>,
}

/// Forward-only reader with its own file handle.
///
/// The cursor captures the file length when opened; records appended after
/// that are not visible to it.
pub struct RecordCursor {
    reader: BufReader<File>,
    position: u64,
    len: u64,
}

impl RecordCursor {
    pub(crate) fn open(path: &Path, offset: u64) -> BlobResult<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        reader.seek_relative(i64::try_from(offset).map_err(|_| BlobError::Corrupt {
            offset,
            reason: "offset out of range".to_owned(),
        })?)?;
        Ok(Self {
            reader,
            position: offset,
            len,
        })
    }

    /// Offset of the next record.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Whether every record has been consumed.
    #[must_use]
    pub const fn is_at_end(&self) -> bool {
        self.position >= self.len
    }

    /// Tag of the next record, or `None` at the end of the file.
    pub fn peek_tag(&mut self) -> BlobResult<Option<u8>> {
        if self.is_at_end() {
            return Ok(None);
        }
        let buf = self.reader.fill_buf()?;
        Ok(buf.first().copied())
    }

    fn next_header(&mut self) -> BlobResult<RecordHeader> {
        let offset = self.position;
        let header = read_header(&mut self.reader, offset)?;
        if offset + record_len(header) > self.len {
            return Err(BlobError::Truncated { offset });
        }
        Ok(header)
    }

    /// Read the next record, which must be a frame.
    ///
    /// On error the cursor position is left at the start of the bad record,
    /// so callers can truncate there.
    pub fn read_frame(&mut self) -> BlobResult<Frame> {
        let offset = self.position;
        let header = self.next_header()?;
        let RecordHeader::Frame { tag, payload_len } = header else {
            return Err(BlobError::Corrupt {
                offset,
                reason: "expected a frame, found a blob".to_owned(),
            });
        };

        let mut payload = vec![0u8; payload_len as usize];
        self.reader
            .read_exact(&mut payload)
            .map_err(truncated_at(offset))?;
        self.position += record_len(header);
        Ok(Frame {
            offset,
            tag,
            payload,
        })
    }

    /// Step over the next record, which must be a blob, without reading its
    /// payload. The returned handle can be resolved with
    /// [`BlobStore::read`](crate::BlobStore::read).
    pub fn skip_blob(&mut self) -> BlobResult<Blob> {
        let offset = self.position;
        let header = self.next_header()?;
        let payload_len = match header {
            RecordHeader::Blob { payload_len, .. } => payload_len,
            RecordHeader::Frame { tag, .. } => return Err(BlobError::NotABlob { offset, tag }),
        };

        self.reader.seek_relative(i64::from(payload_len))?;
        self.position += record_len(header);
        Ok(Blob::at(offset))
    }
}

impl std::fmt::Debug for RecordCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCursor")
            .field("position", &self.position)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::{BlobStore, StoreConfig};

    use super::*;

    #[test]
    fn test_scan_frames_and_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::create(dir.path().join("scan.bin"), StoreConfig::default()).unwrap();

        let first = store.append_frame(0x10, b"one").unwrap();
        let blob = store.write_compressed(&[7u8; 4096]).unwrap();
        store.write_null().unwrap();
        store.append_frame(0x11, b"two").unwrap();

        let mut cursor = store.records().unwrap();
        assert_eq!(cursor.position(), first);
        assert_eq!(cursor.peek_tag().unwrap(), Some(0x10));

        let frame = cursor.read_frame().unwrap();
        assert_eq!((frame.tag, frame.payload.as_slice()), (0x10, &b"one"[..]));

        assert_eq!(cursor.skip_blob().unwrap(), blob);
        assert_eq!(cursor.peek_tag().unwrap(), Some(0x00));
        cursor.skip_blob().unwrap();
        assert_eq!(cursor.read_frame().unwrap().payload, b"two");

        assert!(cursor.is_at_end());
        assert_eq!(cursor.peek_tag().unwrap(), None);
        assert_eq!(store.read(blob).unwrap(), vec![7u8; 4096]);
    }

    #[test]
    fn test_kind_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::create(dir.path().join("mix.bin"), StoreConfig::default()).unwrap();
        store.write_raw(b"blob").unwrap();
        store.append_frame(0x12, b"frame").unwrap();

        let mut cursor = store.records().unwrap();
        assert!(matches!(cursor.read_frame(), Err(BlobError::Corrupt { .. })));

        let mut cursor = store.records().unwrap();
        cursor.skip_blob().unwrap();
        assert!(matches!(
            cursor.skip_blob(),
            Err(BlobError::NotABlob { tag: 0x12, .. })
        ));
    }

    #[test]
    fn test_torn_tail_reports_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torn.bin");
        let store = BlobStore::create(&path, StoreConfig::default()).unwrap();
        store.append_frame(0x10, b"complete").unwrap();
        let torn = store.append_frame(0x10, b"will be cut").unwrap();
        store.truncate(store.len() - 3).unwrap();

        let mut cursor = store.records().unwrap();
        cursor.read_frame().unwrap();
        assert!(matches!(
            cursor.read_frame(),
            Err(BlobError::Truncated { offset }) if offset == torn
        ));
        assert_eq!(cursor.position(), torn);
    }
}
