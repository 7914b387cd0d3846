//! Worlds and registries for unit tests.

use std::sync::Arc;

use strata_config::{NetMode, TerrainSettings};
use strata_mesh::ChunkMeshData;
use strata_terrain::{DefaultPolicy, GenerationPolicy, HeightmapParams};
use strata_voxel::{AIR, ChunkCell, ChunkVoxels, STONE, VoxelDefinitions};
use strata_world::{ChunkConstructionData, ChunkRegistry, RegionPersistence, SpawnOutcome, WorldShared};

/// Four voxels per chunk edge, collision radius 1.
pub fn settings() -> TerrainSettings {
    TerrainSettings {
        voxel_count: 4,
        collision_radius: 1,
        ..Default::default()
    }
}

pub fn shared(mode: NetMode) -> Arc<WorldShared> {
    Arc::new(WorldShared::new(settings(), mode, 8, 3, RegionPersistence::disabled()))
}

pub fn registry(shared: &Arc<WorldShared>) -> ChunkRegistry {
    let policy: Arc<dyn GenerationPolicy> = Arc::new(DefaultPolicy::new(
        HeightmapParams::default(),
        shared.spec,
        Arc::new(VoxelDefinitions::terrain_defaults()),
    ));
    ChunkRegistry::new(shared.clone(), policy, 8, 1)
}

/// Spawns a half stone, half air chunk at `cell`.
pub fn spawn(registry: &mut ChunkRegistry, shared: &WorldShared, cell: ChunkCell) {
    shared.columns.merge(cell.column(), [cell.z]);
    let spec = shared.spec;
    let voxels = (0..spec.padded_len())
        .map(|i| if spec.padded_coords(i)[2] < 2 { STONE } else { AIR })
        .collect();
    let outcome = registry.spawn(ChunkConstructionData {
        cell,
        voxels: ChunkVoxels::Expanded(voxels),
        mesh: ChunkMeshData::new(),
        needs_collision: true,
    });
    assert_eq!(outcome, SpawnOutcome::Spawned);
}
