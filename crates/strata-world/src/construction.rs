//! Turns a column heightmap into finished chunk data on a worker thread.

use parking_lot::Mutex;
use strata_mesh::ChunkMeshData;
use strata_terrain::{GenerationPolicy, Heightmap, Uniformity, classify};
use strata_voxel::{Cell2D, ChunkCell, ChunkVoxels, OverlayStore};
use tracing::trace;

/// A generated chunk on its way to the main thread. Moved, never shared.
#[derive(Debug)]
pub struct ChunkConstructionData {
    pub cell: ChunkCell,
    pub voxels: ChunkVoxels,
    pub mesh: ChunkMeshData,
    /// Whether the chunk sits inside a player's collision radius.
    pub needs_collision: bool,
}

/// Builds every chunk of `column` listed in `z_indices`.
///
/// Chunks with no visible surface are skipped unless they hold edits or are
/// listed in `forced`. Voxels are stored compressed when `compress` is set.
pub fn build_column(
    policy: &dyn GenerationPolicy,
    heightmap: &Heightmap,
    column: Cell2D,
    z_indices: &[i32],
    forced: &[i32],
    overlays: &Mutex<OverlayStore>,
    compress: bool,
) -> Vec<ChunkConstructionData> {
    let mut out = Vec::with_capacity(z_indices.len());

    for &z in z_indices {
        let cell = column.with_z(z);
        let mut voxels = policy.generate_voxels(heightmap, cell);

        let edited = {
            let store = overlays.lock();
            store.apply(cell, &mut voxels);
            store.get(cell).is_some()
        };

        if !edited && !forced.contains(&z) && classify(&voxels) != Uniformity::Mixed {
            trace!("Skipping uniform chunk {cell}");
            continue;
        }

        let mesh = policy.generate_mesh(&voxels);
        let mut voxels = ChunkVoxels::Expanded(voxels);
        if compress {
            voxels.compress();
        }
        out.push(ChunkConstructionData {
            cell,
            voxels,
            mesh,
            needs_collision: !compress,
        });
    }

    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    use strata_terrain::{DefaultPolicy, HeightmapParams};
    use strata_voxel::{AIR, GridSpec, STONE, VoxelDefinitions};

    fn setup() -> (DefaultPolicy, GridSpec, Heightmap) {
        let spec = GridSpec::new(100.0, 4);
        let policy = DefaultPolicy::new(
            HeightmapParams::default(),
            spec,
            Arc::new(VoxelDefinitions::terrain_defaults()),
        );
        let hm = policy
            .generate_heightmap(Cell2D::new(0, 0), &AtomicBool::new(true))
            .unwrap();
        (policy, spec, hm)
    }

    #[test]
    fn test_uniform_chunks_are_skipped() {
        let (policy, spec, hm) = setup();
        let overlays = Mutex::new(OverlayStore::new(spec, 4));
        let top = *hm.z_indices().end();
        let zs = [top + 3, *hm.z_indices().start() - 3];
        let built = build_column(&policy, &hm, Cell2D::new(0, 0), &zs, &[], &overlays, false);
        assert!(built.is_empty());
    }

    #[test]
    fn test_forced_and_edited_chunks_are_built() {
        let (policy, spec, hm) = setup();
        let overlays = Mutex::new(OverlayStore::new(spec, 4));
        let sky = *hm.z_indices().end() + 3;
        let buried = *hm.z_indices().start() - 3;
        let col = Cell2D::new(0, 0);
        let idx = spec.padded_index(1, 1, 1).unwrap();
        overlays.lock().record(col.with_z(sky), idx, STONE);

        let built = build_column(&policy, &hm, col, &[sky, buried], &[buried], &overlays, false);
        assert_eq!(built.len(), 2);

        let placed = &built[0];
        assert_eq!(placed.cell, col.with_z(sky));
        assert_eq!(placed.voxels.as_slice().map(|v| v[idx]), Some(STONE));
        assert!(!placed.mesh.is_empty());
        assert!(placed.needs_collision);

        let solid = &built[1];
        assert!(solid.voxels.as_slice().is_some_and(|v| v.iter().all(|x| *x != AIR)));
        assert!(solid.mesh.is_empty());
    }

    #[test]
    fn test_compressed_output() {
        let (policy, spec, hm) = setup();
        let overlays = Mutex::new(OverlayStore::new(spec, 4));
        let zs: Vec<i32> = hm.z_indices().collect();
        let built = build_column(&policy, &hm, Cell2D::new(0, 0), &zs, &[], &overlays, true);
        assert!(!built.is_empty());
        for data in &built {
            assert!(data.voxels.is_compressed());
            assert!(!data.needs_collision);
            let mut voxels = data.voxels.clone();
            voxels.decompress(spec.padded_len()).unwrap();
            assert_eq!(voxels.as_slice().map(<[u8]>::len), Some(spec.padded_len()));
        }
    }
}
