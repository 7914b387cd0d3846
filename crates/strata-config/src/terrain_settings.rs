//! Per-world terrain parameters and their fixed binary layout.
//!
//! Layout (little-endian, 36 bytes): seed `i32`, height multiplier `f32`,
//! biome noise scale `f32`, terrain noise scale `f32`, foliage noise scale
//! `f32`, chunk deletion buffer `i32`, collision radius `i32`, voxel size
//! `f32`, voxel count `i32`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name of the settings inside a save directory.
pub const SETTINGS_FILE_NAME: &str = "TerrainSettings.dat";

/// Encoded size of [`TerrainSettings`].
pub const TERRAIN_SETTINGS_LEN: usize = 36;

/// Everything needed to regenerate a world bit-for-bit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TerrainSettings {
    /// World seed.
    pub seed: i32,
    /// Scales every biome's height contribution.
    pub height_multiplier: f32,
    /// Biome noise frequency relative to terrain noise.
    pub biome_noise_scale: f32,
    /// Terrain noise frequency per voxel.
    pub terrain_noise_scale: f32,
    /// Foliage noise frequency. Stored for save compatibility.
    pub foliage_noise_scale: f32,
    /// Chunks beyond the generation radius kept before deletion.
    pub chunk_deletion_buffer: i32,
    /// Radius in chunks that gets collision and replication.
    pub collision_radius: i32,
    /// World units per voxel edge.
    pub voxel_size: f32,
    /// Voxels per chunk edge.
    pub voxel_count: i32,
}

impl Default for TerrainSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            height_multiplier: 0.3,
            biome_noise_scale: 0.04,
            terrain_noise_scale: 0.0075,
            foliage_noise_scale: 0.002,
            chunk_deletion_buffer: 2,
            collision_radius: 5,
            voxel_size: 100.0,
            voxel_count: 32,
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl Reader<'_> {
    fn take(&mut self) -> [u8; 4] {
        let mut word = [0u8; 4];
        let (head, rest) = self.bytes.split_at(4);
        word.copy_from_slice(head);
        self.bytes = rest;
        word
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }
}

impl TerrainSettings {
    /// World units per chunk edge.
    pub fn chunk_size(&self) -> f64 {
        f64::from(self.voxel_size) * f64::from(self.voxel_count)
    }

    /// Encodes the fixed binary layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TERRAIN_SETTINGS_LEN);
        out.extend_from_slice(&self.seed.to_le_bytes());
        out.extend_from_slice(&self.height_multiplier.to_le_bytes());
        out.extend_from_slice(&self.biome_noise_scale.to_le_bytes());
        out.extend_from_slice(&self.terrain_noise_scale.to_le_bytes());
        out.extend_from_slice(&self.foliage_noise_scale.to_le_bytes());
        out.extend_from_slice(&self.chunk_deletion_buffer.to_le_bytes());
        out.extend_from_slice(&self.collision_radius.to_le_bytes());
        out.extend_from_slice(&self.voxel_size.to_le_bytes());
        out.extend_from_slice(&self.voxel_count.to_le_bytes());
        out
    }

    /// Decodes the fixed binary layout. Trailing bytes are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        if bytes.len() < TERRAIN_SETTINGS_LEN {
            return Err(ConfigError::SettingsTooShort {
                expected: TERRAIN_SETTINGS_LEN,
                actual: bytes.len(),
            });
        }
        let mut r = Reader { bytes };
        Ok(Self {
            seed: r.i32(),
            height_multiplier: r.f32(),
            biome_noise_scale: r.f32(),
            terrain_noise_scale: r.f32(),
            foliage_noise_scale: r.f32(),
            chunk_deletion_buffer: r.i32(),
            collision_radius: r.i32(),
            voxel_size: r.f32(),
            voxel_count: r.i32(),
        })
    }

    /// Reads `TerrainSettings.dat` from a save directory.
    pub fn load(save_dir: &Path) -> Result<Self, ConfigError> {
        let path = save_dir.join(SETTINGS_FILE_NAME);
        let bytes = std::fs::read(&path).map_err(ConfigError::read(&path))?;
        let settings = Self::from_bytes(&bytes)?;
        log::info!("Loaded terrain settings from {}", path.display());
        Ok(settings)
    }

    /// Writes `TerrainSettings.dat` into a save directory.
    pub fn save(&self, save_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(save_dir).map_err(ConfigError::write(save_dir))?;
        let path = save_dir.join(SETTINGS_FILE_NAME);
        std::fs::write(&path, self.to_bytes()).map_err(ConfigError::write(&path))
    }

    /// Loads the settings of a save, writing defaults when none exist.
    pub fn load_or_create(save_dir: &Path) -> Result<Self, ConfigError> {
        if save_dir.join(SETTINGS_FILE_NAME).exists() {
            Self::load(save_dir)
        } else {
            let settings = Self::default();
            settings.save(save_dir)?;
            log::info!("Created default terrain settings in {}", save_dir.display());
            Ok(settings)
        }
    }
}
