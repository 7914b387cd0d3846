//! Voxel storage primitives: chunk grid math, run-length encoding, edit
//! overlays, voxel definitions, and deterministic chunk naming.

pub mod chunk;
pub mod definitions;
pub mod grid;
pub mod naming;
pub mod overlay;
pub mod rle;

pub use chunk::{
    COLLISION_GENERATED, Chunk, ChunkVoxels, DESTROY_WHEN_UNNEEDED, GENERATION_FINISHED, HIDDEN,
    REPLICATED, SAFE_TO_DESTROY,
};
pub use definitions::{
    AIR, CollisionResponse, DIRT, DefinitionError, GRASS, STONE, VoxelDefinition, VoxelDefinitions,
};
pub use grid::{Cell2D, ChunkCell, GridSpec, RegionCoord, grid_snap, round_to_i32};
pub use naming::{chunk_name, parse_chunk_name};
pub use overlay::{ModifiedVoxelOverlay, OverlayError, OverlayStore, UNMODIFIED};
pub use rle::{RleError, RleRun, rle_decode, rle_decode_exact, rle_decoded_len, rle_encode};
