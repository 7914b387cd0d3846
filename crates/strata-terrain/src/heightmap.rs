//! Biome-blended heightmap generation over seeded simplex noise.
//!
//! A heightmap covers one chunk column plus a one-sample border on each
//! side, so neighbouring columns agree on the voxels they share. Samples are
//! surface heights in voxel units relative to the chunk grid's Z origin.

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};

use glam::DVec2;
use noise::{NoiseFn, Simplex};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use strata_voxel::{Cell2D, GridSpec, grid_snap, round_to_i32};
use tracing::debug;

use crate::biome::{Biome, BiomeBlend};

/// Height assumed for a column whose sample is missing.
pub const MISSING_SAMPLE_HEIGHT: i32 = 25;

/// Noise parameters shared by every column of a world.
#[derive(Clone, Debug, PartialEq)]
pub struct HeightmapParams {
    /// World seed. Equal seeds produce identical terrain.
    pub seed: i32,
    /// Scales every biome's contribution to the final height.
    pub height_multiplier: f64,
    /// Frequency of the biome noise relative to the terrain noise.
    pub biome_scale: f64,
    /// Frequency of the terrain noise per voxel.
    pub terrain_scale: f64,
}

impl Default for HeightmapParams {
    fn default() -> Self {
        Self {
            seed: 0,
            height_multiplier: 0.3,
            biome_scale: 0.04,
            terrain_scale: 0.0075,
        }
    }
}

// ---------------------------------------------------------------------------
// Noise layers
// ---------------------------------------------------------------------------

/// Fractal Brownian motion over one simplex generator, normalised to
/// roughly `[-1, 1]`.
struct FbmLayer {
    noise: Simplex,
    octaves: u32,
    lacunarity: f64,
    persistence: f64,
}

impl FbmLayer {
    fn new(seed: u32, octaves: u32, persistence: f64) -> Self {
        Self {
            noise: Simplex::new(seed),
            octaves,
            lacunarity: 2.0,
            persistence,
        }
    }

    fn sample(&self, x: f64, y: f64) -> f64 {
        let mut total = 0.0;
        let mut norm = 0.0;
        let mut frequency = 1.0;
        let mut amplitude = 1.0;

        for _ in 0..self.octaves {
            total += self.noise.get([x * frequency, y * frequency]) * amplitude;
            norm += amplitude;
            frequency *= self.lacunarity;
            amplitude *= self.persistence;
        }

        if norm > 0.0 { total / norm } else { 0.0 }
    }
}

fn octaves_for(biome: Biome) -> (u32, f64) {
    match biome {
        Biome::Flat => (1, 0.5),
        Biome::Forest | Biome::Plains => (3, 0.5),
        Biome::Hills => (4, 0.5),
        Biome::Mountains => (5, 0.45),
    }
}

// ---------------------------------------------------------------------------
// Heightmap
// ---------------------------------------------------------------------------

/// Surface heights of one padded column and the chunk Z range they span.
#[derive(Clone, Debug, PartialEq)]
pub struct Heightmap {
    spec: GridSpec,
    heights: Vec<i16>,
    z_indices: RangeInclusive<i32>,
}

impl Heightmap {
    /// Wraps precomputed samples laid out by [`GridSpec::heightmap_index`].
    pub fn from_heights(spec: GridSpec, heights: Vec<i16>) -> Self {
        let low = heights.iter().copied().min().map_or(MISSING_SAMPLE_HEIGHT, i32::from);
        let high = heights.iter().copied().max().map_or(MISSING_SAMPLE_HEIGHT, i32::from);
        let z_indices = chunk_z_for_height(&spec, low)..=chunk_z_for_height(&spec, high);
        Self {
            spec,
            heights,
            z_indices,
        }
    }

    /// Surface height at padded column coordinates.
    ///
    /// Falls back to [`MISSING_SAMPLE_HEIGHT`] when the sample is absent.
    pub fn height_at(&self, x: i32, y: i32) -> i32 {
        self.spec
            .heightmap_index(x, y)
            .and_then(|i| self.heights.get(i))
            .map_or(MISSING_SAMPLE_HEIGHT, |h| i32::from(*h))
    }

    /// Raw samples.
    pub fn heights(&self) -> &[i16] {
        &self.heights
    }

    /// Chunk Z indices from the lowest to the highest surface chunk.
    pub fn z_indices(&self) -> RangeInclusive<i32> {
        self.z_indices.clone()
    }

    /// Grid the samples were generated for.
    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }
}

/// Chunk Z index whose voxels hold the surface at height `height`.
pub fn chunk_z_for_height(spec: &GridSpec, height: i32) -> i32 {
    let vs = spec.voxel_size;
    let cs = spec.chunk_size();
    let surface = f64::from(height) * vs - vs - grid_snap(cs / 2.0, vs);
    round_to_i32(grid_snap(surface, cs) / cs)
}

// ---------------------------------------------------------------------------
// HeightmapGenerator
// ---------------------------------------------------------------------------

/// Generates column heightmaps for one world.
///
/// Every noise generator is seeded from a ChaCha stream over the world seed,
/// so construction is deterministic and each biome gets independent noise.
pub struct HeightmapGenerator {
    params: HeightmapParams,
    spec: GridSpec,
    biome_noise: FbmLayer,
    terrain_noise: Vec<FbmLayer>,
}

impl HeightmapGenerator {
    /// Creates a generator for columns of `spec`.
    pub fn new(params: HeightmapParams, spec: GridSpec) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed as u32 as u64);
        let biome_noise = FbmLayer::new(rng.next_u32(), 2, 0.5);
        let terrain_noise = Biome::ALL
            .iter()
            .map(|biome| {
                let (octaves, persistence) = octaves_for(*biome);
                FbmLayer::new(rng.next_u32(), octaves, persistence)
            })
            .collect();
        Self {
            params,
            spec,
            biome_noise,
            terrain_noise,
        }
    }

    /// Parameters in use.
    pub fn params(&self) -> &HeightmapParams {
        &self.params
    }

    /// Grid in use.
    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }

    /// Biome blend at a point given in voxel units.
    pub fn biome_at(&self, voxel_xy: DVec2) -> BiomeBlend {
        let freq = self.params.terrain_scale * self.params.biome_scale;
        BiomeBlend::from_noise(self.biome_noise.sample(voxel_xy.x * freq, voxel_xy.y * freq))
    }

    /// Surface height at a point given in voxel units.
    pub fn sample_height(&self, voxel_xy: DVec2) -> i16 {
        let freq = self.params.terrain_scale;
        let vs = self.spec.voxel_size;
        let mut height: i32 = 0;

        for weight in self.biome_at(voxel_xy).weights() {
            let amplitude = weight.biome.amplitude();
            if amplitude == 0.0 || weight.weight == 0.0 {
                continue;
            }
            let Some(layer) = self.terrain_noise.get(weight.biome.index()) else {
                continue;
            };
            let n = layer.sample(voxel_xy.x * freq, voxel_xy.y * freq);
            height += (n * amplitude * weight.weight * vs * self.params.height_multiplier) as i32;
        }

        let height = (f64::from(height) - f64::from(self.spec.voxel_count) / 2.0) as i32;
        height.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
    }

    /// Generates the padded heightmap of `column`.
    ///
    /// Returns `None` as soon as `running` is cleared.
    pub fn generate(&self, column: Cell2D, running: &AtomicBool) -> Option<Heightmap> {
        let vc = self.spec.voxel_count;
        let start = self.spec.column_location(column) / self.spec.voxel_size - DVec2::ONE;
        let mut heights = vec![0i16; self.spec.heightmap_len()];

        for x in -1..=vc {
            for y in -1..=vc {
                if !running.load(Ordering::Relaxed) {
                    debug!("Heightmap for column {column} cancelled");
                    return None;
                }
                let Some(index) = self.spec.heightmap_index(x, y) else {
                    continue;
                };
                let point = start + DVec2::new(f64::from(x + 1), f64::from(y + 1));
                heights[index] = self.sample_height(point);
            }
        }

        Some(Heightmap::from_heights(self.spec, heights))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
