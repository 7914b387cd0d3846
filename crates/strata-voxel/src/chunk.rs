//! Per-chunk voxel storage, lifecycle flags, and replication identity.
//!
//! [`Chunk`] owns a padded voxel array that may be held run-length encoded
//! while nobody needs to edit it. Every read or write path expands it first.

use tracing::{error, warn};

use crate::grid::{ChunkCell, GridSpec};
use crate::naming::chunk_name;
use crate::rle::{RleError, rle_decode_exact, rle_encode};

/// Flag bit: the construction pipeline has delivered voxels and mesh.
pub const GENERATION_FINISHED: u8 = 0b0000_0001;
/// Flag bit: a collision shape has been built from the mesh.
pub const COLLISION_GENERATED: u8 = 0b0000_0010;
/// Flag bit: the server no longer needs this chunk's identity.
pub const SAFE_TO_DESTROY: u8 = 0b0000_0100;
/// Flag bit: the chunk carries a network identity.
pub const REPLICATED: u8 = 0b0000_1000;
/// Flag bit: the chunk is hidden instead of destroyed.
pub const HIDDEN: u8 = 0b0001_0000;
/// Flag bit: destroy as soon as the chunk is marked safe.
pub const DESTROY_WHEN_UNNEEDED: u8 = 0b0010_0000;

// ---------------------------------------------------------------------------
// ChunkVoxels
// ---------------------------------------------------------------------------

/// Voxel payload of a chunk.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum ChunkVoxels {
    /// No voxel data.
    #[default]
    Empty,
    /// Flat padded array.
    Expanded(Vec<u8>),
    /// RLE byte stream of the padded array.
    Compressed(Vec<u8>),
}

impl ChunkVoxels {
    /// Whether the payload is run-length encoded.
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Compressed(_))
    }

    /// Whether there is no voxel data at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Expanded(v) | Self::Compressed(v) => v.is_empty(),
        }
    }

    /// Expands in place. A no-op on expanded or empty payloads.
    pub fn decompress(&mut self, expected_len: usize) -> Result<(), RleError> {
        if let Self::Compressed(encoded) = self {
            let voxels = rle_decode_exact(encoded, expected_len)?;
            *self = Self::Expanded(voxels);
        }
        Ok(())
    }

    /// Encodes in place. A no-op on compressed or empty payloads.
    pub fn compress(&mut self) {
        if let Self::Expanded(voxels) = self {
            if voxels.is_empty() {
                *self = Self::Empty;
                return;
            }
            let encoded = rle_encode(voxels);
            *self = Self::Compressed(encoded);
        }
    }

    /// The expanded array, if the payload is expanded.
    pub fn as_slice(&self) -> Option<&[u8]> {
        match self {
            Self::Expanded(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable expanded array, if the payload is expanded.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match self {
            Self::Expanded(v) => Some(v),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// A live chunk's voxel state and replication identity.
#[derive(Clone, Debug)]
pub struct Chunk {
    cell: ChunkCell,
    voxels: ChunkVoxels,
    flags: u8,
    name: String,
    version: u64,
}

impl Chunk {
    /// A chunk at `cell` holding `voxels`, named with spawn count 0.
    pub fn new(cell: ChunkCell, voxels: ChunkVoxels) -> Self {
        Self {
            cell,
            voxels,
            flags: SAFE_TO_DESTROY,
            name: chunk_name(cell, 0),
            version: 0,
        }
    }

    /// The chunk's grid cell.
    pub fn cell(&self) -> ChunkCell {
        self.cell
    }

    /// The current replicated name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the chunk.
    pub fn set_name(&mut self, name: String) {
        self.name = name;
    }

    /// The voxel payload.
    pub fn voxels(&self) -> &ChunkVoxels {
        &self.voxels
    }

    /// Replaces the voxel payload.
    pub fn replace_voxels(&mut self, voxels: ChunkVoxels) {
        self.voxels = voxels;
        self.version += 1;
    }

    /// Expands the voxels if they are compressed. Returns `false` and logs
    /// when the payload is corrupt.
    pub fn ensure_decompressed(&mut self, spec: &GridSpec) -> bool {
        match self.voxels.decompress(spec.padded_len()) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to decompress voxels for chunk {}: {e}", self.cell);
                false
            }
        }
    }

    /// Compresses the voxels for storage.
    pub fn compress(&mut self) {
        self.voxels.compress();
    }

    /// Voxel at a flat padded index. Expands the payload first.
    pub fn get(&mut self, spec: &GridSpec, index: usize) -> Option<u8> {
        if !self.ensure_decompressed(spec) {
            return None;
        }
        self.voxels.as_slice()?.get(index).copied()
    }

    /// Sets the voxel at a flat padded index. Expands the payload first.
    ///
    /// Returns `false` when the chunk has no voxels or the index is out of
    /// range.
    pub fn set(&mut self, spec: &GridSpec, index: usize, value: u8) -> bool {
        if !self.ensure_decompressed(spec) {
            return false;
        }
        let Some(voxels) = self.voxels.as_mut_slice() else {
            warn!("Chunk {} has no voxels to edit", self.cell);
            return false;
        };
        match voxels.get_mut(index) {
            Some(slot) => {
                *slot = value;
                self.version += 1;
                true
            }
            None => {
                warn!("Voxel index {index} out of range for chunk {}", self.cell);
                false
            }
        }
    }

    /// Number of voxel mutations applied.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Current flag bits.
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Returns `true` if every bit in `flag` is set.
    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag == flag
    }

    /// Sets flag bits.
    pub fn set_flag(&mut self, flag: u8) {
        self.flags |= flag;
    }

    /// Clears flag bits.
    pub fn clear_flag(&mut self, flag: u8) {
        self.flags &= !flag;
    }

    /// Sets or clears flag bits.
    pub fn assign_flag(&mut self, flag: u8, on: bool) {
        if on {
            self.set_flag(flag);
        } else {
            self.clear_flag(flag);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> GridSpec {
        GridSpec::new(100.0, 4)
    }

    fn filled(value: u8) -> Vec<u8> {
        vec![value; spec().padded_len()]
    }

    #[test]
    fn test_compress_and_decompress() {
        let mut voxels = ChunkVoxels::Expanded(filled(4));
        voxels.compress();
        assert!(voxels.is_compressed());
        assert_eq!(voxels, ChunkVoxels::Compressed(vec![216, 4]));
        voxels.decompress(216).expect("decompress");
        assert_eq!(voxels.as_slice(), Some(&filled(4)[..]));
    }

    #[test]
    fn test_decompress_rejects_wrong_length() {
        let mut voxels = ChunkVoxels::Compressed(vec![10, 4]);
        assert!(voxels.decompress(216).is_err());
        assert!(voxels.is_compressed());
    }

    #[test]
    fn test_set_expands_compressed_chunk() {
        let g = spec();
        let mut chunk = Chunk::new(ChunkCell::new(0, 0, 0), ChunkVoxels::Expanded(filled(0)));
        chunk.compress();
        assert!(chunk.voxels().is_compressed());

        assert!(chunk.set(&g, 5, 2));
        assert!(!chunk.voxels().is_compressed());
        assert_eq!(chunk.get(&g, 5), Some(2));
        assert_eq!(chunk.version(), 1);
    }

    #[test]
    fn test_set_out_of_range_fails() {
        let g = spec();
        let mut chunk = Chunk::new(ChunkCell::new(0, 0, 0), ChunkVoxels::Expanded(filled(0)));
        assert!(!chunk.set(&g, 9999, 1));
        assert_eq!(chunk.get(&g, 9999), None);

        let mut empty = Chunk::new(ChunkCell::new(0, 0, 0), ChunkVoxels::Empty);
        assert!(!empty.set(&g, 0, 1));
    }

    #[test]
    fn test_flags() {
        let mut chunk = Chunk::new(ChunkCell::new(1, 2, 3), ChunkVoxels::Empty);
        assert!(chunk.has(SAFE_TO_DESTROY));
        assert!(!chunk.has(REPLICATED));
        chunk.set_flag(REPLICATED | HIDDEN);
        assert!(chunk.has(REPLICATED | HIDDEN));
        chunk.assign_flag(HIDDEN, false);
        assert!(!chunk.has(HIDDEN));
        assert_eq!(chunk.name(), "X1_Y2_Z3_N0");
    }
}
