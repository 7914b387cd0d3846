//! Carves a padded chunk voxel array out of a column heightmap.
//!
//! Layers from the top: grass one voxel below the surface, [`DIRT_DEPTH`]
//! voxels of dirt, then stone. Everything at or above the surface is air.

use strata_voxel::{AIR, DIRT, GRASS, GridSpec, ModifiedVoxelOverlay, STONE};
use tracing::error;

use crate::heightmap::Heightmap;

/// Voxels of dirt between the grass layer and stone.
pub const DIRT_DEPTH: i32 = 2;

/// Whether a voxel array has any visible surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Uniformity {
    /// Mixed air and solid voxels.
    Mixed,
    /// Every voxel is air.
    AllAir,
    /// Every voxel is solid.
    AllSolid,
}

/// Palette value for the voxel at absolute voxel height `voxel_z` in a column
/// whose surface height is `height`.
pub fn surface_voxel(voxel_z: i32, height: i32) -> u8 {
    if voxel_z >= height {
        AIR
    } else if voxel_z == height - 1 {
        GRASS
    } else if voxel_z < height - 1 - DIRT_DEPTH {
        STONE
    } else {
        DIRT
    }
}

/// Procedural voxels of the chunk at Z index `chunk_z` in the heightmap's
/// column, in [`GridSpec::padded_index`] order.
pub fn fill_procedural(heightmap: &Heightmap, spec: &GridSpec, chunk_z: i32) -> Vec<u8> {
    let vc = spec.voxel_count;
    let base_z = chunk_z * vc;
    let mut voxels = Vec::with_capacity(spec.padded_len());

    for x in -1..=vc {
        for y in -1..=vc {
            let height = heightmap.height_at(x, y);
            for z in -1..=vc {
                voxels.push(surface_voxel(z + base_z, height));
            }
        }
    }

    debug_assert_eq!(voxels.len(), spec.padded_len());
    voxels
}

/// Classifies a voxel array by whether it mixes air and solid voxels.
pub fn classify(voxels: &[u8]) -> Uniformity {
    let air = voxels.iter().filter(|v| **v == AIR).count();
    if air == voxels.len() {
        Uniformity::AllAir
    } else if air == 0 {
        Uniformity::AllSolid
    } else {
        Uniformity::Mixed
    }
}

/// Procedural voxels with the chunk's edit overlay applied.
///
/// Returns `None` when the result has no surface to mesh: all air or all
/// solid.
pub fn fill_chunk_voxels(
    heightmap: &Heightmap,
    spec: &GridSpec,
    chunk_z: i32,
    overlay: Option<&ModifiedVoxelOverlay>,
) -> Option<Vec<u8>> {
    let mut voxels = fill_procedural(heightmap, spec, chunk_z);
    if let Some(overlay) = overlay
        && let Err(e) = overlay.apply_to(&mut voxels)
    {
        error!("Ignoring overlay for chunk Z {chunk_z}: {e}");
    }
    match classify(&voxels) {
        Uniformity::Mixed => Some(voxels),
        Uniformity::AllAir | Uniformity::AllSolid => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
