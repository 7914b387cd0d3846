//! Face-culling mesher over padded chunk voxel arrays.
//!
//! Only interior voxels `[0, voxel_count)` emit geometry. The one-voxel
//! border is read for neighbour tests so faces on chunk boundaries cull
//! against the adjacent chunk without touching it.

use strata_voxel::{GridSpec, VoxelDefinitions};
use tracing::error;

use crate::chunk_mesh::ChunkMeshData;
use crate::face_direction::FaceDirection;

/// Builds the mesh of one padded voxel array.
///
/// A face is emitted for every non-air voxel whose neighbour across that face
/// is air or translucent. Vertex positions are relative to the chunk centre.
pub fn build_chunk_mesh(voxels: &[u8], spec: &GridSpec, definitions: &VoxelDefinitions) -> ChunkMeshData {
    let mut mesh = ChunkMeshData::new();
    if voxels.is_empty() {
        error!("Tried to mesh a chunk with no voxels");
        return mesh;
    }

    let vc = spec.voxel_count;
    let vs = spec.voxel_size as f32;
    let half = spec.chunk_size() as f32 / 2.0;

    for x in 0..vc {
        for y in 0..vc {
            for z in 0..vc {
                let Some(value) = spec.padded_index(x, y, z).and_then(|i| voxels.get(i).copied()) else {
                    continue;
                };
                if definitions.is_air(value) {
                    continue;
                }

                let center = [
                    x as f32 * vs - half,
                    y as f32 * vs - half,
                    z as f32 * vs - half,
                ];

                for face in FaceDirection::ALL {
                    let o = face.offset();
                    let neighbor = spec
                        .padded_index(x + o.x, y + o.y, z + o.z)
                        .and_then(|i| voxels.get(i).copied());
                    let Some(neighbor) = neighbor else {
                        continue;
                    };
                    if definitions.exposes_neighbor_face(neighbor) {
                        mesh.push_face(value, face, center, vs);
                    }
                }
            }
        }
    }

    mesh
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use strata_voxel::{AIR, CollisionResponse, DIRT, GRASS, STONE, VoxelDefinition};

    fn spec() -> GridSpec {
        GridSpec::new(100.0, 4)
    }

    fn empty() -> Vec<u8> {
        vec![AIR; spec().padded_len()]
    }

    fn set(voxels: &mut [u8], x: i32, y: i32, z: i32, value: u8) {
        let i = spec().padded_index(x, y, z).expect("in range");
        voxels[i] = value;
    }

    #[test]
    fn test_single_voxel_emits_six_faces() {
        let mut voxels = empty();
        set(&mut voxels, 1, 1, 1, STONE);
        let mesh = build_chunk_mesh(&voxels, &spec(), &VoxelDefinitions::terrain_defaults());
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.triangle_count(), 12);
        assert_eq!(mesh.voxel_sections(), vec![STONE]);
        for face in FaceDirection::ALL {
            assert_eq!(mesh.count_faces(face), 1);
        }
    }

    #[test]
    fn test_shared_face_is_culled() {
        let mut voxels = empty();
        set(&mut voxels, 1, 1, 1, STONE);
        set(&mut voxels, 1, 1, 2, DIRT);
        let mesh = build_chunk_mesh(&voxels, &spec(), &VoxelDefinitions::terrain_defaults());
        assert_eq!(mesh.vertices.len(), 40);
        assert_eq!(mesh.voxel_sections(), vec![STONE, DIRT]);
        assert_eq!(mesh.count_faces(FaceDirection::Up), 1);
        assert_eq!(mesh.count_faces(FaceDirection::Down), 1);
    }

    #[test]
    fn test_border_voxels_cull_but_do_not_emit() {
        let mut voxels = empty();
        set(&mut voxels, 0, 0, 0, GRASS);
        set(&mut voxels, -1, 0, 0, STONE);
        set(&mut voxels, 4, 0, 0, STONE);
        let mesh = build_chunk_mesh(&voxels, &spec(), &VoxelDefinitions::terrain_defaults());
        assert_eq!(mesh.count_faces(FaceDirection::Back), 0);
        assert_eq!(mesh.vertices.len(), 20);
        assert_eq!(mesh.voxel_sections(), vec![GRASS]);
    }

    #[test]
    fn test_translucent_neighbor_exposes_face() {
        let mut defs = VoxelDefinitions::terrain_defaults();
        let glass = defs
            .register(VoxelDefinition {
                name: "glass".to_string(),
                is_air: false,
                is_translucent: true,
                collision: CollisionResponse::Block,
            })
            .expect("register");
        let mut voxels = empty();
        set(&mut voxels, 1, 1, 1, STONE);
        set(&mut voxels, 1, 1, 2, glass);
        let mesh = build_chunk_mesh(&voxels, &spec(), &defs);
        assert_eq!(mesh.count_faces(FaceDirection::Up), 2);
    }

    #[test]
    fn test_vertex_positions_centred_on_chunk() {
        let mut voxels = empty();
        set(&mut voxels, 0, 0, 0, STONE);
        let mesh = build_chunk_mesh(&voxels, &spec(), &VoxelDefinitions::terrain_defaults());
        let min = mesh
            .vertices
            .iter()
            .map(|v| v.position[0])
            .fold(f32::MAX, f32::min);
        assert_eq!(min, -250.0);
    }

    #[test]
    fn test_all_air_and_empty_input() {
        let defs = VoxelDefinitions::terrain_defaults();
        assert!(build_chunk_mesh(&empty(), &spec(), &defs).is_empty());
        assert!(build_chunk_mesh(&[], &spec(), &defs).is_empty());
    }
}
