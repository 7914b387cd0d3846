//! Pluggable generation steps.
//!
//! Workers never call the noise or mesher directly; they go through a
//! [`GenerationPolicy`] so a game can swap in its own terrain shape or
//! meshing without touching the streaming pipeline.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use strata_mesh::{ChunkMeshData, build_chunk_mesh};
use strata_voxel::{Cell2D, ChunkCell, GridSpec, VoxelDefinitions};

use crate::heightmap::{Heightmap, HeightmapGenerator, HeightmapParams};
use crate::voxel_fill::fill_procedural;

/// The three per-column generation steps.
pub trait GenerationPolicy: Send + Sync {
    /// Grid every step works on.
    fn spec(&self) -> &GridSpec;

    /// Padded heightmap of a column. `None` when cancelled.
    fn generate_heightmap(&self, column: Cell2D, running: &AtomicBool) -> Option<Heightmap>;

    /// Procedural voxels of one chunk, before overlays.
    fn generate_voxels(&self, heightmap: &Heightmap, cell: ChunkCell) -> Vec<u8>;

    /// Mesh of a padded voxel array.
    fn generate_mesh(&self, voxels: &[u8]) -> ChunkMeshData;
}

/// Biome heightmaps, layered fill, and face-culled meshing.
pub struct DefaultPolicy {
    generator: HeightmapGenerator,
    definitions: Arc<VoxelDefinitions>,
}

impl DefaultPolicy {
    /// Creates the default policy.
    pub fn new(params: HeightmapParams, spec: GridSpec, definitions: Arc<VoxelDefinitions>) -> Self {
        Self {
            generator: HeightmapGenerator::new(params, spec),
            definitions,
        }
    }

    /// Voxel definitions used for meshing.
    pub fn definitions(&self) -> &VoxelDefinitions {
        &self.definitions
    }
}

impl GenerationPolicy for DefaultPolicy {
    fn spec(&self) -> &GridSpec {
        self.generator.spec()
    }

    fn generate_heightmap(&self, column: Cell2D, running: &AtomicBool) -> Option<Heightmap> {
        self.generator.generate(column, running)
    }

    fn generate_voxels(&self, heightmap: &Heightmap, cell: ChunkCell) -> Vec<u8> {
        fill_procedural(heightmap, self.generator.spec(), cell.z)
    }

    fn generate_mesh(&self, voxels: &[u8]) -> ChunkMeshData {
        build_chunk_mesh(voxels, self.generator.spec(), &self.definitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_generates_surface_mesh() {
        let spec = GridSpec::new(100.0, 8);
        let policy = DefaultPolicy::new(
            HeightmapParams::default(),
            spec,
            Arc::new(VoxelDefinitions::terrain_defaults()),
        );
        let running = AtomicBool::new(true);
        let heightmap = policy
            .generate_heightmap(Cell2D::new(0, 0), &running)
            .expect("heightmap");

        let mut meshed = 0;
        for z in heightmap.z_indices() {
            let voxels = policy.generate_voxels(&heightmap, Cell2D::new(0, 0).with_z(z));
            assert_eq!(voxels.len(), spec.padded_len());
            if !policy.generate_mesh(&voxels).is_empty() {
                meshed += 1;
            }
        }
        assert!(meshed >= 1);
    }

    #[test]
    fn test_policy_is_object_safe() {
        let policy: Arc<dyn GenerationPolicy> = Arc::new(DefaultPolicy::new(
            HeightmapParams::default(),
            GridSpec::new(100.0, 4),
            Arc::new(VoxelDefinitions::default()),
        ));
        assert_eq!(policy.spec().voxel_count, 4);
    }
}
