//! Sparse per-chunk records of player edits that override procedural
//! generation.
//!
//! An overlay is a full-length padded voxel array in which
//! [`UNMODIFIED`] marks "keep the generated value". Overlays are created
//! lazily on first edit and grouped by region, the unit of persistence and
//! network sync.

use rustc_hash::FxHashMap;
use tracing::error;

use crate::grid::{ChunkCell, GridSpec, RegionCoord};
use crate::rle::{RleError, rle_decode_exact, rle_encode};

/// Sentinel for an overlay entry that does not override generation.
pub const UNMODIFIED: u8 = u8::MAX;

/// Errors raised when an overlay does not fit the chunk layout.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OverlayError {
    /// Overlay length differs from the padded chunk length.
    #[error("overlay has {actual} entries, expected {expected}")]
    LengthMismatch {
        /// Padded chunk length.
        expected: usize,
        /// Overlay length.
        actual: usize,
    },
    /// The RLE payload could not be decoded.
    #[error("overlay payload is malformed: {0}")]
    Rle(#[from] RleError),
}

// ---------------------------------------------------------------------------
// ModifiedVoxelOverlay
// ---------------------------------------------------------------------------

/// Edit overrides for a single chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifiedVoxelOverlay {
    values: Vec<u8>,
}

impl ModifiedVoxelOverlay {
    /// An overlay of `len` entries with nothing modified.
    pub fn new(len: usize) -> Self {
        Self {
            values: vec![UNMODIFIED; len],
        }
    }

    /// Wraps raw overlay values, checking the length.
    pub fn from_values(values: Vec<u8>, expected_len: usize) -> Result<Self, OverlayError> {
        if values.len() != expected_len {
            return Err(OverlayError::LengthMismatch {
                expected: expected_len,
                actual: values.len(),
            });
        }
        Ok(Self { values })
    }

    /// Decodes an RLE payload into an overlay of `expected_len` entries.
    pub fn from_rle(encoded: &[u8], expected_len: usize) -> Result<Self, OverlayError> {
        let values = rle_decode_exact(encoded, expected_len)?;
        Ok(Self { values })
    }

    /// RLE payload for persistence and transfer.
    pub fn to_rle(&self) -> Vec<u8> {
        rle_encode(&self.values)
    }

    /// Records `value` at `index`. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize, value: u8) -> bool {
        match self.values.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// The override at `index`, or `None` when generation wins.
    pub fn get(&self, index: usize) -> Option<u8> {
        self.values.get(index).copied().filter(|v| *v != UNMODIFIED)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the overlay has no entries at all.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of entries that override generation.
    pub fn modified_count(&self) -> usize {
        self.values.iter().filter(|v| **v != UNMODIFIED).count()
    }

    /// Raw values, sentinel included.
    pub fn values(&self) -> &[u8] {
        &self.values
    }

    /// Overwrites every modified position in `voxels`.
    ///
    /// Returns the number of voxels replaced.
    pub fn apply_to(&self, voxels: &mut [u8]) -> Result<usize, OverlayError> {
        if voxels.len() != self.values.len() {
            return Err(OverlayError::LengthMismatch {
                expected: voxels.len(),
                actual: self.values.len(),
            });
        }
        let mut applied = 0;
        for (voxel, value) in voxels.iter_mut().zip(&self.values) {
            if *value != UNMODIFIED {
                *voxel = *value;
                applied += 1;
            }
        }
        Ok(applied)
    }
}

// ---------------------------------------------------------------------------
// OverlayStore
// ---------------------------------------------------------------------------

/// Every loaded overlay, grouped by region.
#[derive(Debug, Clone)]
pub struct OverlayStore {
    spec: GridSpec,
    region_size: i32,
    regions: FxHashMap<RegionCoord, FxHashMap<ChunkCell, ModifiedVoxelOverlay>>,
}

impl OverlayStore {
    /// Creates an empty store for chunks of `spec`, grouped into regions of
    /// `region_size` columns per side.
    pub fn new(spec: GridSpec, region_size: i32) -> Self {
        Self {
            spec,
            region_size,
            regions: FxHashMap::default(),
        }
    }

    /// Region holding `cell`.
    pub fn region_of(&self, cell: ChunkCell) -> RegionCoord {
        self.spec.region_of_column(cell.column(), self.region_size)
    }

    /// The overlay for `cell`, if it has ever been edited.
    pub fn get(&self, cell: ChunkCell) -> Option<&ModifiedVoxelOverlay> {
        self.regions.get(&self.region_of(cell))?.get(&cell)
    }

    /// The overlay for `cell`, created sentinel-filled on first use.
    pub fn get_or_create(&mut self, cell: ChunkCell) -> &mut ModifiedVoxelOverlay {
        let region = self.region_of(cell);
        let len = self.spec.padded_len();
        self.regions
            .entry(region)
            .or_default()
            .entry(cell)
            .or_insert_with(|| ModifiedVoxelOverlay::new(len))
    }

    /// Records a single edit.
    pub fn record(&mut self, cell: ChunkCell, index: usize, value: u8) -> RegionCoord {
        let region = self.region_of(cell);
        self.get_or_create(cell).set(index, value);
        region
    }

    /// Inserts or replaces the overlay for `cell`.
    pub fn insert(&mut self, cell: ChunkCell, overlay: ModifiedVoxelOverlay) -> Result<(), OverlayError> {
        let expected = self.spec.padded_len();
        if overlay.len() != expected {
            error!(
                "Overlay for cell {cell} has {} entries, expected {expected}",
                overlay.len()
            );
            return Err(OverlayError::LengthMismatch {
                expected,
                actual: overlay.len(),
            });
        }
        let region = self.region_of(cell);
        self.regions.entry(region).or_default().insert(cell, overlay);
        Ok(())
    }

    /// Decodes and inserts an RLE overlay.
    pub fn insert_encoded(&mut self, cell: ChunkCell, encoded: &[u8]) -> Result<(), OverlayError> {
        let overlay = ModifiedVoxelOverlay::from_rle(encoded, self.spec.padded_len())?;
        self.insert(cell, overlay)
    }

    /// Applies the overlay for `cell` to freshly generated voxels.
    ///
    /// A wrong-length overlay is logged and skipped.
    pub fn apply(&self, cell: ChunkCell, voxels: &mut [u8]) -> usize {
        let Some(overlay) = self.get(cell) else {
            return 0;
        };
        match overlay.apply_to(voxels) {
            Ok(applied) => applied,
            Err(e) => {
                error!("Skipping overlay for cell {cell}: {e}");
                0
            }
        }
    }

    /// Whether any overlay exists for `region`.
    pub fn has_region(&self, region: RegionCoord) -> bool {
        self.regions.contains_key(&region)
    }

    /// Cells with overlays in `region`, sorted.
    pub fn cells_in_region(&self, region: RegionCoord) -> Vec<ChunkCell> {
        let mut cells: Vec<ChunkCell> = self
            .regions
            .get(&region)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default();
        cells.sort();
        cells
    }

    /// RLE-encoded copy of every overlay in `region`, sorted by cell.
    pub fn snapshot_region(&self, region: RegionCoord) -> Option<Vec<(ChunkCell, Vec<u8>)>> {
        let cells = self.regions.get(&region)?;
        let mut out: Vec<(ChunkCell, Vec<u8>)> = cells
            .iter()
            .map(|(cell, overlay)| (*cell, overlay.to_rle()))
            .collect();
        out.sort_by_key(|(cell, _)| *cell);
        Some(out)
    }

    /// Drops every overlay in `region`.
    pub fn remove_region(&mut self, region: RegionCoord) -> bool {
        self.regions.remove(&region).is_some()
    }

    /// Regions currently held in memory.
    pub fn regions(&self) -> impl Iterator<Item = RegionCoord> + '_ {
        self.regions.keys().copied()
    }

    /// Total number of cell overlays.
    pub fn overlay_count(&self) -> usize {
        self.regions.values().map(|m| m.len()).sum()
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

    #[test]
    fn test_new_overlay_is_unmodified() {
        let overlay = ModifiedVoxelOverlay::new(216);
        assert_eq!(overlay.len(), 216);
        assert_eq!(overlay.modified_count(), 0);
        assert_eq!(overlay.get(10), None);
    }

    #[test]
    fn test_apply_only_overrides_modified_positions() {
        let mut overlay = ModifiedVoxelOverlay::new(8);
        overlay.set(1, 0);
        overlay.set(6, 3);
        let mut voxels = vec![4u8; 8];
        assert_eq!(overlay.apply_to(&mut voxels), Ok(2));
        assert_eq!(voxels, vec![4, 0, 4, 4, 4, 4, 3, 4]);
    }

    #[test]
    fn test_apply_rejects_wrong_length() {
        let overlay = ModifiedVoxelOverlay::new(8);
        let mut voxels = vec![0u8; 9];
        assert!(matches!(
            overlay.apply_to(&mut voxels),
            Err(OverlayError::LengthMismatch { expected: 9, actual: 8 })
        ));
    }

    #[test]
    fn test_rle_payload_roundtrip() {
        let mut overlay = ModifiedVoxelOverlay::new(216);
        overlay.set(100, 2);
        let encoded = overlay.to_rle();
        let decoded = ModifiedVoxelOverlay::from_rle(&encoded, 216).expect("decode");
        assert_eq!(decoded, overlay);
        assert!(ModifiedVoxelOverlay::from_rle(&encoded, 215).is_err());
    }

    #[test]
    fn test_store_groups_by_region() {
        let mut store = OverlayStore::new(spec(), 2);
        let a = ChunkCell::new(0, 0, 0);
        let b = ChunkCell::new(0, 0, 1);
        let c = ChunkCell::new(5, 0, 0);

        store.record(a, 3, 1);
        store.record(b, 4, 0);
        store.record(c, 5, 2);

        let ra = store.region_of(a);
        assert_eq!(store.cells_in_region(ra), vec![a, b]);
        assert_ne!(store.region_of(c), ra);
        assert_eq!(store.overlay_count(), 3);

        assert!(store.remove_region(ra));
        assert!(store.get(a).is_none());
        assert!(store.get(c).is_some());
    }

    #[test]
    fn test_store_rejects_wrong_length_insert() {
        let mut store = OverlayStore::new(spec(), 50);
        let result = store.insert(ChunkCell::new(0, 0, 0), ModifiedVoxelOverlay::new(10));
        assert!(result.is_err());
        assert_eq!(store.overlay_count(), 0);
    }

    #[test]
    fn test_snapshot_region_encodes_each_cell() {
        let mut store = OverlayStore::new(spec(), 50);
        let cell = ChunkCell::new(1, 1, 0);
        store.record(cell, 0, 4);
        let region = store.region_of(cell);
        let snapshot = store.snapshot_region(region).expect("region present");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, cell);
        assert_eq!(snapshot[0].1, vec![1, 4, 215, UNMODIFIED]);
        assert!(store.snapshot_region(RegionCoord::new(9, 9)).is_none());
    }
}
