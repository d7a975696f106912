//! Binary delta primitive used for diff records.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::{BlobError, BlobResult};

/// Computes and applies binary deltas.
///
/// `undiff(old, diff(old, new))` must equal `new` for every pair of inputs,
/// and both directions must be deterministic.
pub trait DeltaCodec: Send + Sync {
    fn diff(&self, old: &[u8], new: &[u8]) -> BlobResult<Vec<u8>>;

    fn undiff(&self, old: &[u8], delta: &[u8]) -> BlobResult<Vec<u8>>;
}

/// XOR-then-deflate delta.
///
/// The new payload is XORed against the old one (zero-padded) and the result
/// deflated. Machine snapshots taken a few frames apart differ in a small
/// fraction of bytes, so the XOR is mostly zeros and compresses to almost
/// nothing.
///
/// ```text
/// delta := new_len:u32 zlib(new XOR old)
/// ```
#[derive(Debug, Clone, Copy)]
pub struct XorDelta {
    level: Compression,
}

impl XorDelta {
    #[must_use]
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for XorDelta {
    fn default() -> Self {
        Self::new(6)
    }
}

fn xor_into(out: &mut [u8], other: &[u8]) {
    for (byte, other) in out.iter_mut().zip(other) {
        *byte ^= other;
    }
}

impl DeltaCodec for XorDelta {
    fn diff(&self, old: &[u8], new: &[u8]) -> BlobResult<Vec<u8>> {
        let new_len = u32::try_from(new.len())
            .map_err(|_| BlobError::Delta(format!("payload of {} bytes", new.len())))?;
        let mut xored = new.to_vec();
        xor_into(&mut xored, old);

        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(new_len)?;
        let mut encoder = ZlibEncoder::new(out, self.level);
        encoder.write_all(&xored)?;
        Ok(encoder.finish()?)
    }

    fn undiff(&self, old: &[u8], delta: &[u8]) -> BlobResult<Vec<u8>> {
        let mut reader = delta;
        let new_len = reader
            .read_u32::<LittleEndian>()
            .map_err(|_| BlobError::Delta("missing length".to_owned()))?;

        // The length comes from disk: size the buffer from the base and stop
        // inflating one byte past the declared length.
        let mut decoder = ZlibDecoder::new(reader).take(u64::from(new_len) + 1);
        let mut out = Vec::with_capacity((new_len as usize).min(old.len()));
        decoder
            .read_to_end(&mut out)
            .map_err(|e| BlobError::Delta(e.to_string()))?;
        if out.len() != new_len as usize {
            return Err(BlobError::Delta(format!(
                "length mismatch: expected {new_len}, got {}",
                out.len()
            )));
        }

        xor_into(&mut out, old);
        Ok(out)
    }
}
