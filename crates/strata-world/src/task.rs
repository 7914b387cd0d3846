//! Work handed from chunk workers to the main thread.

use strata_voxel::{Cell2D, RegionCoord};

use crate::construction::ChunkConstructionData;

/// A change only the main thread may apply.
#[derive(Debug)]
pub enum MainThreadTask {
    /// Spawn a generated chunk, or refresh the one already at its cell.
    SpawnChunk(ChunkConstructionData),
    /// A column left every player's range.
    DestroyColumn { column: Cell2D, z_indices: Vec<i32> },
    /// A column left the local player's view but is still needed.
    HideColumn { column: Cell2D },
    /// A hidden column came back into the local player's view.
    UnhideColumn { column: Cell2D },
    /// A region's saved edits are now in memory.
    RegionLoaded(RegionCoord),
    /// A column was generated again to add missing chunks. Only cells with
    /// no live chunk are spawned.
    RegenerateColumn {
        column: Cell2D,
        chunks: Vec<ChunkConstructionData>,
    },
}
