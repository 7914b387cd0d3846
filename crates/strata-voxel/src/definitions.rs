//! Voxel definition table: maps palette indices to per-type behaviour.
//!
//! Palette index 0 is always air so that zero-filled voxel memory is empty
//! space. The mesher and the edit gateway only ever ask this table whether a
//! value is air or translucent; materials and icons belong to the renderer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Palette index of air.
pub const AIR: u8 = 0;
/// Palette index of the surface layer.
pub const GRASS: u8 = 1;
/// Palette index of the sub-surface layer.
pub const DIRT: u8 = 2;
/// Palette index of deep terrain.
pub const STONE: u8 = 4;

/// How a voxel responds to physical collision queries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollisionResponse {
    /// Blocks movement.
    #[default]
    Block,
    /// Reports overlaps without blocking.
    Overlap,
    /// Ignored by collision entirely.
    Ignore,
}

/// Behaviour of one palette index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoxelDefinition {
    /// Human-readable name (e.g. "stone").
    pub name: String,
    /// Treated as empty space regardless of every other field.
    pub is_air: bool,
    /// Neighbouring voxels render faces toward this one.
    pub is_translucent: bool,
    /// Collision behaviour.
    pub collision: CollisionResponse,
}

impl VoxelDefinition {
    /// A solid, opaque, blocking voxel.
    pub fn solid(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_air: false,
            is_translucent: false,
            collision: CollisionResponse::Block,
        }
    }

    /// An air voxel.
    pub fn air(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_air: true,
            is_translucent: true,
            collision: CollisionResponse::Ignore,
        }
    }
}

/// Errors raised while building a definition table.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// A definition with the same name already exists.
    #[error("duplicate voxel definition name: {0}")]
    DuplicateName(String),
    /// All 255 usable palette slots are taken (255 is reserved).
    #[error("voxel definition table is full")]
    TableFull,
}

/// Dense table indexed by palette value.
#[derive(Clone, Debug)]
pub struct VoxelDefinitions {
    defs: Vec<VoxelDefinition>,
    by_name: HashMap<String, u8>,
}

impl VoxelDefinitions {
    /// A table containing only air at index 0.
    pub fn new() -> Self {
        let mut by_name = HashMap::new();
        by_name.insert("air".to_string(), AIR);
        Self {
            defs: vec![VoxelDefinition::air("air")],
            by_name,
        }
    }

    /// The built-in terrain palette: air, grass, dirt, an unused air slot,
    /// and stone.
    pub fn terrain_defaults() -> Self {
        let mut table = Self::new();
        for def in [
            VoxelDefinition::solid("grass"),
            VoxelDefinition::solid("dirt"),
            VoxelDefinition::air("unused"),
            VoxelDefinition::solid("stone"),
        ] {
            // Names are distinct and the table is far from full.
            let _ = table.register(def);
        }
        table
    }

    /// Appends a definition and returns its palette index.
    pub fn register(&mut self, def: VoxelDefinition) -> Result<u8, DefinitionError> {
        if self.by_name.contains_key(&def.name) {
            return Err(DefinitionError::DuplicateName(def.name));
        }
        if self.defs.len() >= u8::MAX as usize {
            return Err(DefinitionError::TableFull);
        }
        let index = self.defs.len() as u8;
        self.by_name.insert(def.name.clone(), index);
        self.defs.push(def);
        Ok(index)
    }

    /// The definition for `value`, if registered.
    pub fn get(&self, value: u8) -> Option<&VoxelDefinition> {
        self.defs.get(value as usize)
    }

    /// Palette index for a named definition.
    pub fn lookup_by_name(&self, name: &str) -> Option<u8> {
        self.by_name.get(name).copied()
    }

    /// Number of definitions, air included.
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Returns `true` if only air is registered.
    pub fn is_empty(&self) -> bool {
        self.defs.len() <= 1
    }

    /// Whether `value` is air. Unknown values are solid.
    pub fn is_air(&self, value: u8) -> bool {
        self.get(value).is_some_and(|d| d.is_air)
    }

    /// Whether `value` is translucent. Unknown values are opaque.
    pub fn is_translucent(&self, value: u8) -> bool {
        self.get(value).is_some_and(|d| d.is_translucent)
    }

    /// Whether a solid voxel shows the face it shares with `neighbor`.
    pub fn exposes_neighbor_face(&self, neighbor: u8) -> bool {
        self.is_air(neighbor) || self.is_translucent(neighbor)
    }

    /// Whether `value` blocks collision.
    pub fn blocks_collision(&self, value: u8) -> bool {
        self.get(value)
            .is_some_and(|d| !d.is_air && d.collision == CollisionResponse::Block)
    }
}

impl Default for VoxelDefinitions {
    fn default() -> Self {
        Self::terrain_defaults()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_air_is_index_zero() {
        let table = VoxelDefinitions::new();
        assert!(table.is_air(AIR));
        assert!(table.is_empty());
        assert_eq!(table.lookup_by_name("air"), Some(AIR));
    }

    #[test]
    fn test_terrain_defaults_match_generated_palette() {
        let table = VoxelDefinitions::terrain_defaults();
        assert_eq!(table.lookup_by_name("grass"), Some(GRASS));
        assert_eq!(table.lookup_by_name("dirt"), Some(DIRT));
        assert_eq!(table.lookup_by_name("stone"), Some(STONE));
        assert!(!table.is_air(STONE));
        assert!(table.is_air(3));
    }

    #[test]
    fn test_translucent_neighbor_exposes_face() {
        let mut table = VoxelDefinitions::terrain_defaults();
        let glass = table
            .register(VoxelDefinition {
                name: "glass".to_string(),
                is_air: false,
                is_translucent: true,
                collision: CollisionResponse::Block,
            })
            .expect("register glass");

        assert!(table.exposes_neighbor_face(AIR));
        assert!(table.exposes_neighbor_face(glass));
        assert!(!table.exposes_neighbor_face(STONE));
        assert!(!table.is_air(glass));
        assert!(table.blocks_collision(glass));
    }

    #[test]
    fn test_unknown_values_are_opaque_solid() {
        let table = VoxelDefinitions::terrain_defaults();
        assert!(!table.is_air(200));
        assert!(!table.exposes_neighbor_face(200));
        assert!(!table.blocks_collision(200));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut table = VoxelDefinitions::new();
        let err = table.register(VoxelDefinition::solid("air")).unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateName(name) if name == "air"));
    }
}
