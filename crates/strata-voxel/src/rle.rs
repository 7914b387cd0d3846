//! Run-length encoding for flat voxel arrays.
//!
//! The encoded form is a byte stream of `(count, value)` pairs with
//! `count` in `1..=255`. It is the at-rest format for compressed chunks,
//! the per-cell payload of region save files, and the wire payload of
//! region sync bundles.

use tracing::warn;

/// A single run: `count` consecutive copies of `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RleRun {
    /// Run length (1..=255).
    pub count: u8,
    /// The voxel value.
    pub value: u8,
}

/// Errors produced while decoding an RLE stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RleError {
    /// Stream length is not a whole number of pairs.
    #[error("RLE stream has odd length {0}")]
    OddLength(usize),
    /// A pair declared a zero-length run.
    #[error("zero-length run at pair {0}")]
    ZeroRun(usize),
    /// Decoded length does not match expected length.
    #[error("RLE length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Expected number of voxels.
        expected: usize,
        /// Actual number of decoded voxels.
        actual: usize,
    },
}

/// Splits a voxel slice into runs of at most 255.
pub fn rle_runs(voxels: &[u8]) -> Vec<RleRun> {
    let mut runs = Vec::new();
    let mut i = 0;
    while i < voxels.len() {
        let value = voxels[i];
        let mut count: u8 = 1;
        loop {
            let idx = i + count as usize;
            if idx >= voxels.len() || voxels[idx] != value || count == u8::MAX {
                break;
            }
            count += 1;
        }
        runs.push(RleRun { count, value });
        i += count as usize;
    }
    runs
}

/// Encodes voxels into the `(count, value)` byte stream.
///
/// An empty input produces an empty output.
pub fn rle_encode(voxels: &[u8]) -> Vec<u8> {
    if voxels.is_empty() {
        warn!("RLE encode called with no voxels");
        return Vec::new();
    }
    let runs = rle_runs(voxels);
    let mut out = Vec::with_capacity(runs.len() * 2);
    for run in runs {
        out.push(run.count);
        out.push(run.value);
    }
    out
}

/// Number of voxels an encoded stream expands to, without allocating.
pub fn rle_decoded_len(encoded: &[u8]) -> Result<usize, RleError> {
    if encoded.len() % 2 != 0 {
        return Err(RleError::OddLength(encoded.len()));
    }
    encoded
        .chunks_exact(2)
        .enumerate()
        .try_fold(0usize, |acc, (i, pair)| match pair[0] {
            0 => Err(RleError::ZeroRun(i)),
            n => Ok(acc + n as usize),
        })
}

/// Decodes a `(count, value)` byte stream.
pub fn rle_decode(encoded: &[u8]) -> Result<Vec<u8>, RleError> {
    let total = rle_decoded_len(encoded)?;
    let mut out = Vec::with_capacity(total);
    for pair in encoded.chunks_exact(2) {
        out.extend(std::iter::repeat_n(pair[1], pair[0] as usize));
    }
    Ok(out)
}

/// Decodes and checks the result has exactly `expected_len` voxels.
pub fn rle_decode_exact(encoded: &[u8], expected_len: usize) -> Result<Vec<u8>, RleError> {
    let out = rle_decode(encoded)?;
    if out.len() != expected_len {
        return Err(RleError::LengthMismatch {
            expected: expected_len,
            actual: out.len(),
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
