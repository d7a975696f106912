//! The blob store: an append-only file of tagged records.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use parking_lot::Mutex;

use crate::record::{
    self, BlobKind, FIRST_RECORD, HEADER, RecordHeader, encode_blob, encode_frame, read_header,
    truncated_at,
};
use crate::replace::{Recovery, recover};
use crate::{BlobError, BlobResult, DeltaCodec, RecordCursor, StoreConfig, XorDelta};

/// Handle to a stored payload.
///
/// A blob is only the offset of its record. It never holds the payload, so
/// handles are cheap to copy and keep around after a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Blob {
    offset: u64,
}

impl Blob {
    /// Wrap a known record offset.
    #[must_use]
    pub const fn at(offset: u64) -> Self {
        Self { offset }
    }

    /// Offset of the blob's record in the store file.
    #[must_use]
    pub const fn offset(self) -> u64 {
        self.offset
    }
}

struct StoreFile {
    file: File,
    /// Logical end of the file; records are always appended here.
    len: u64,
}

impl StoreFile {
    fn append(&mut self, bytes: &[u8]) -> BlobResult<u64> {
        let offset = self.len;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        self.len += bytes.len() as u64;
        Ok(offset)
    }

    fn header_at(&mut self, offset: u64) -> BlobResult<RecordHeader> {
        if offset < FIRST_RECORD || offset >= self.len {
            return Err(BlobError::Corrupt {
                offset,
                reason: "offset outside the file".to_owned(),
            });
        }
        self.file.seek(SeekFrom::Start(offset))?;
        read_header(&mut self.file, offset)
    }

    /// Read the payload that follows a header just read at `offset`.
    fn payload(&mut self, offset: u64, header: RecordHeader) -> BlobResult<Vec<u8>> {
        if offset + record::record_len(header) > self.len {
            return Err(BlobError::Truncated { offset });
        }
        let mut payload = vec![0u8; header.payload_len() as usize];
        self.file
            .read_exact(&mut payload)
            .map_err(truncated_at(offset))?;
        Ok(payload)
    }
}

/// A decoded diff chain: the base payload plus the deltas stacked on it,
/// oldest first.
struct Chain {
    base_offset: u64,
    base: Vec<u8>,
    deltas: Vec<(u64, Vec<u8>)>,
}

/// Append-only store of null, raw, diff and compressed records.
///
/// The store has a single writer. Reads go through the same internal lock,
/// or through a [`RecordCursor`] which owns its own file handle.
pub struct BlobStore {
    path: PathBuf,
    file: Mutex<StoreFile>,
    codec: Box<dyn DeltaCodec>,
    config: StoreConfig,
}

impl BlobStore {
    /// Open an existing store, or create it if missing.
    ///
    /// An interrupted compaction is recovered first (see [`recover`]).
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> BlobResult<Self> {
        let path = path.as_ref();
        match recover(path)? {
            Recovery::Clean => {}
            recovery => tracing::warn!(
                "Recovered interrupted compaction of {}: {recovery:?}",
                path.display()
            ),
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();

        if len == 0 {
            file.write_all(HEADER)?;
            file.flush()?;
            tracing::debug!("Created blob store {}", path.display());
        } else {
            let mut header = [0u8; HEADER.len()];
            file.read_exact(&mut header)
                .map_err(|_| BlobError::BadHeader)?;
            if &header != HEADER {
                return Err(BlobError::BadHeader);
            }
            tracing::debug!("Opened blob store {} ({len} bytes)", path.display());
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(StoreFile {
                file,
                len: len.max(FIRST_RECORD),
            }),
            codec: Box::new(XorDelta::new(config.compression_level)),
            config,
        })
    }

    /// Create a fresh, empty store, replacing any file at `path`.
    pub fn create(path: impl AsRef<Path>, config: StoreConfig) -> BlobResult<Self> {
        let path = path.as_ref();
        {
            let mut file = File::create(path)?;
            file.write_all(HEADER)?;
            file.flush()?;
        }
        Self::open(path, config)
    }

    /// Replace the delta codec used for diff records.
    ///
    /// Files must be read with the codec they were written with.
    #[must_use]
    pub fn with_codec(mut self, codec: impl DeltaCodec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn config(&self) -> StoreConfig {
        self.config
    }

    /// Logical length of the file in bytes, header included.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.file.lock().len
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() <= FIRST_RECORD
    }

    // ==================== Writes ====================

    fn append_blob(&self, kind: BlobKind, payload: &[u8]) -> BlobResult<Blob> {
        let mut bytes = Vec::with_capacity(payload.len() + 13);
        encode_blob(&mut bytes, kind, payload)?;
        let offset = self.file.lock().append(&bytes)?;
        tracing::trace!(
            "Wrote {kind:?} blob at {offset} ({} bytes)",
            bytes.len()
        );
        Ok(Blob::at(offset))
    }

    /// Write an empty payload.
    pub fn write_null(&self) -> BlobResult<Blob> {
        self.append_blob(BlobKind::Null, &[])
    }

    /// Write `bytes` uncompressed.
    pub fn write_raw(&self, bytes: &[u8]) -> BlobResult<Blob> {
        if bytes.is_empty() {
            return self.write_null();
        }
        self.append_blob(BlobKind::Raw, bytes)
    }

    /// Write `bytes` deflated.
    pub fn write_compressed(&self, bytes: &[u8]) -> BlobResult<Blob> {
        if bytes.is_empty() {
            return self.write_null();
        }
        let compressed = self.compress(bytes)?;
        self.append_blob(BlobKind::Compressed, &compressed)
    }

    /// Write `bytes` using whichever encoding is smallest.
    ///
    /// `candidate_base` and the blobs its diff chain leads back to (up to
    /// [`StoreConfig::max_chain_candidates`] of them) are each tried as a
    /// diff base. The smallest delta is compared with plain compression and
    /// the smaller record is written. Without a candidate the payload is
    /// always compressed.
    pub fn write_smallest(&self, bytes: &[u8], candidate_base: Option<Blob>) -> BlobResult<Blob> {
        if bytes.is_empty() {
            return self.write_null();
        }

        let compressed = self.compress(bytes)?;
        let Some(candidate_base) = candidate_base else {
            return self.append_blob(BlobKind::Compressed, &compressed);
        };

        let mut best: Option<(u64, Vec<u8>)> = None;
        for (offset, candidate) in self.chain_candidates(candidate_base)? {
            let delta = self.codec.diff(&candidate, bytes)?;
            if best.as_ref().is_none_or(|(_, smallest)| delta.len() < smallest.len()) {
                best = Some((offset, delta));
            }
        }

        match best {
            // A diff record carries 8 more header bytes than a compressed one.
            Some((base, delta)) if delta.len() + 8 < compressed.len() => {
                self.append_blob(BlobKind::Diff { base }, &delta)
            }
            _ => self.append_blob(BlobKind::Compressed, &compressed),
        }
    }

    /// Append a frame owned by an outer layer. `tag` must be at least
    /// [`FIRST_FRAME_TAG`](crate::FIRST_FRAME_TAG). Returns the frame's offset.
    pub fn append_frame(&self, tag: u8, payload: &[u8]) -> BlobResult<u64> {
        let mut bytes = Vec::with_capacity(payload.len() + 5);
        encode_frame(&mut bytes, tag, payload)?;
        self.file.lock().append(&bytes)
    }

    fn compress(&self, bytes: &[u8]) -> BlobResult<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(
            Vec::with_capacity(bytes.len() / 2),
            Compression::new(self.config.compression_level),
        );
        encoder.write_all(bytes)?;
        Ok(encoder.finish()?)
    }

    // ==================== Reads ====================

    /// Reconstruct the payload of `blob`.
    ///
    /// Diff chains are resolved iteratively: base offsets are collected
    /// walking backwards, then deltas are applied forward from the first
    /// non-diff record.
    pub fn read(&self, blob: Blob) -> BlobResult<Vec<u8>> {
        let chain = self.collect_chain(blob.offset)?;
        let mut bytes = chain.base;
        for (_, delta) in &chain.deltas {
            bytes = self.codec.undiff(&bytes, delta)?;
        }
        Ok(bytes)
    }

    /// Encoding of the record behind `blob`, without reading its payload.
    pub fn kind(&self, blob: Blob) -> BlobResult<BlobKind> {
        match self.file.lock().header_at(blob.offset)? {
            RecordHeader::Blob { kind, .. } => Ok(kind),
            RecordHeader::Frame { tag, .. } => Err(BlobError::NotABlob {
                offset: blob.offset,
                tag,
            }),
        }
    }

    /// Number of diff records between `blob` and the first non-diff record.
    pub fn chain_depth(&self, blob: Blob) -> BlobResult<usize> {
        let mut depth = 0;
        let mut offset = blob.offset;
        while let BlobKind::Diff { base } = self.kind(Blob::at(offset))? {
            depth += 1;
            offset = base;
        }
        Ok(depth)
    }

    /// Walk the chain starting at `offset` back to its first non-diff
    /// record.
    fn collect_chain(&self, offset: u64) -> BlobResult<Chain> {
        let mut file = self.file.lock();
        let mut deltas = Vec::new();
        let mut offset = offset;
        loop {
            let header = file.header_at(offset)?;
            let kind = match header {
                RecordHeader::Blob { kind, .. } => kind,
                RecordHeader::Frame { tag, .. } => {
                    return Err(BlobError::NotABlob { offset, tag });
                }
            };
            let payload = file.payload(offset, header)?;
            let base = match kind {
                BlobKind::Null => Vec::new(),
                BlobKind::Raw => payload,
                BlobKind::Compressed => decompress(offset, &payload)?,
                BlobKind::Diff { base } => {
                    deltas.push((offset, payload));
                    offset = base;
                    continue;
                }
            };
            deltas.reverse();
            return Ok(Chain {
                base_offset: offset,
                base,
                deltas,
            });
        }
    }

    /// Reconstruct the blobs of the chain ending at `head` and return the
    /// `max_chain_candidates` nearest to `head` as `(offset, payload)`,
    /// nearest first.
    fn chain_candidates(&self, head: Blob) -> BlobResult<Vec<(u64, Vec<u8>)>> {
        let chain = self.collect_chain(head.offset)?;
        let keep = self.config.max_chain_candidates.max(1);

        let mut candidates = Vec::with_capacity(chain.deltas.len() + 1);
        candidates.push((chain.base_offset, chain.base));
        for (offset, delta) in &chain.deltas {
            let previous = &candidates[candidates.len() - 1].1;
            let bytes = self.codec.undiff(previous, delta)?;
            candidates.push((*offset, bytes));
            if candidates.len() > keep {
                candidates.remove(0);
            }
        }
        candidates.reverse();
        Ok(candidates)
    }

    /// Open a cursor positioned at `offset`, with its own file handle.
    pub fn cursor(&self, offset: u64) -> BlobResult<RecordCursor> {
        // Make sure buffered writes are visible to the new handle.
        self.file.lock().file.flush()?;
        RecordCursor::open(&self.path, offset)
    }

    /// Cursor positioned at the first record.
    pub fn records(&self) -> BlobResult<RecordCursor> {
        self.cursor(FIRST_RECORD)
    }

    // ==================== Maintenance ====================

    /// Drop every record at or after `offset`.
    ///
    /// Used to cut a torn tail after a crash. Blobs at or after `offset`
    /// become dangling.
    pub fn truncate(&self, offset: u64) -> BlobResult<()> {
        let offset = offset.max(FIRST_RECORD);
        let mut file = self.file.lock();
        if offset < file.len {
            tracing::warn!(
                "Truncating {} from {} to {offset} bytes",
                self.path.display(),
                file.len
            );
            file.file.set_len(offset)?;
            file.len = offset;
        }
        Ok(())
    }

    /// Flush and fsync the file.
    pub fn sync(&self) -> BlobResult<()> {
        let mut file = self.file.lock();
        file.file.flush()?;
        file.file.sync_data()?;
        Ok(())
    }
}

impl std::fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStore")
            .field("path", &self.path)
            .field("len", &self.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn decompress(offset: u64, compressed: &[u8]) -> BlobResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| BlobError::Corrupt {
            offset,
            reason: format!("bad compressed payload: {e}"),
        })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::create(dir.path().join("blobs.bin"), StoreConfig::default()).unwrap();
        (dir, store)
    }

    /// 16 KiB of state; each generation changes one more byte than the last.
    fn snapshot(generation: u8) -> Vec<u8> {
        let mut bytes: Vec<u8> = (0..16 * 1024).map(|i| (i * 7 % 251) as u8).collect();
        for i in 0..generation as usize {
            bytes[i * 97 + 13] ^= 0x5a;
        }
        bytes
    }

    #[test]
    fn test_round_trip_every_encoding() {
        let (_dir, store) = store();
        let payload = b"the quick brown fox".to_vec();

        let null = store.write_null().unwrap();
        let raw = store.write_raw(&payload).unwrap();
        let compressed = store.write_compressed(&payload).unwrap();
        let base = store.write_compressed(&snapshot(0)).unwrap();
        let diff = store.write_smallest(&snapshot(1), Some(base)).unwrap();

        assert_eq!(store.read(null).unwrap(), Vec::<u8>::new());
        assert_eq!(store.read(raw).unwrap(), payload);
        assert_eq!(store.read(compressed).unwrap(), payload);
        assert_eq!(store.read(diff).unwrap(), snapshot(1));

        assert_eq!(store.kind(null).unwrap(), BlobKind::Null);
        assert_eq!(store.kind(raw).unwrap(), BlobKind::Raw);
        assert_eq!(store.kind(compressed).unwrap(), BlobKind::Compressed);
        assert!(matches!(store.kind(diff).unwrap(), BlobKind::Diff { .. }));
    }

    #[test]
    fn test_empty_payload_is_null() {
        let (_dir, store) = store();
        let blob = store.write_smallest(&[], None).unwrap();
        assert_eq!(store.kind(blob).unwrap(), BlobKind::Null);
        assert!(store.read(blob).unwrap().is_empty());
        assert_eq!(store.kind(store.write_raw(&[]).unwrap()).unwrap(), BlobKind::Null);
    }

    #[test]
    fn test_no_candidate_compresses() {
        let (_dir, store) = store();
        let blob = store.write_smallest(&snapshot(3), None).unwrap();
        assert_eq!(store.kind(blob).unwrap(), BlobKind::Compressed);
    }

    #[test]
    fn test_diff_chain_reconstructs() {
        let (_dir, store) = store();
        let mut previous = store.write_smallest(&snapshot(0), None).unwrap();
        let mut blobs = vec![previous];
        for generation in 1..20 {
            previous = store
                .write_smallest(&snapshot(generation), Some(previous))
                .unwrap();
            blobs.push(previous);
        }

        assert!(store.chain_depth(previous).unwrap() > 1);
        for (generation, blob) in blobs.into_iter().enumerate() {
            assert_eq!(store.read(blob).unwrap(), snapshot(generation as u8));
        }
    }

    #[test]
    fn test_unrelated_payload_prefers_compression() {
        let (_dir, store) = store();
        let base = store.write_smallest(&snapshot(0), None).unwrap();
        let unrelated = vec![0u8; 16 * 1024];
        let blob = store.write_smallest(&unrelated, Some(base)).unwrap();
        assert_eq!(store.kind(blob).unwrap(), BlobKind::Compressed);
        assert_eq!(store.read(blob).unwrap(), unrelated);
    }

    #[test]
    fn test_reopen_reads_existing_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blobs.bin");
        let blob = {
            let store = BlobStore::create(&path, StoreConfig::default()).unwrap();
            let blob = store.write_compressed(b"persist me").unwrap();
            store.sync().unwrap();
            blob
        };

        let store = BlobStore::open(&path, StoreConfig::default()).unwrap();
        assert_eq!(store.read(blob).unwrap(), b"persist me");
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.bin");
        std::fs::write(&path, b"definitely not a store").unwrap();
        assert!(matches!(
            BlobStore::open(&path, StoreConfig::default()),
            Err(BlobError::BadHeader)
        ));
    }

    #[test]
    fn test_frame_is_not_a_blob() {
        let (_dir, store) = store();
        let offset = store.append_frame(0x20, b"journal").unwrap();
        assert!(matches!(
            store.read(Blob::at(offset)),
            Err(BlobError::NotABlob { tag: 0x20, .. })
        ));
    }

    #[test]
    fn test_truncated_payload_detected() {
        let (_dir, store) = store();
        let blob = store.write_raw(&[1, 2, 3, 4, 5]).unwrap();
        store.truncate(store.len() - 2).unwrap();
        assert!(matches!(
            store.read(blob),
            Err(BlobError::Truncated { .. })
        ));
    }
}
