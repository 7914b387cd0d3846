//! Procedural terrain: biome-blended heightmaps, voxel fill, and the spiral
//! search that decides which column a worker generates next.

pub mod biome;
pub mod heightmap;
pub mod policy;
pub mod spiral;
pub mod voxel_fill;

pub use biome::{BIOME_THRESHOLDS, Biome, BiomeBlend, BiomeWeight};
pub use heightmap::{
    Heightmap, HeightmapGenerator, HeightmapParams, MISSING_SAMPLE_HEIGHT, chunk_z_for_height,
};
pub use policy::{DefaultPolicy, GenerationPolicy};
pub use spiral::{CellSearch, RingState, SpiralSearch, circumference_in_chunks, ring_offset};
pub use voxel_fill::{
    DIRT_DEPTH, Uniformity, classify, fill_chunk_voxels, fill_procedural, surface_voxel,
};
