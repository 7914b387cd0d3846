//! Mesh buffers produced for one chunk, split into one section per voxel
//! value so each section can carry its own material.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

use crate::face_direction::FaceDirection;

/// A single vertex in a chunk mesh. Laid out for direct upload.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    /// Position relative to the chunk centre, in world units.
    pub position: [f32; 3],
    /// Face normal.
    pub normal: [f32; 3],
    /// Face tangent.
    pub tangent: [f32; 3],
    /// Texture coordinates.
    pub uv: [f32; 2],
    /// RGBA colour. Red carries the face index.
    pub color: [u8; 4],
}

const_assert_eq!(std::mem::size_of::<MeshVertex>(), 48);

/// Triangles of one voxel value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshSection {
    /// Voxel value the section is drawn with.
    pub voxel: u8,
    /// Triangle list, three vertex indices per triangle.
    pub indices: Vec<u32>,
}

impl MeshSection {
    /// Number of triangles.
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Mesh of one chunk.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkMeshData {
    /// Shared vertex buffer.
    pub vertices: Vec<MeshVertex>,
    /// One section per voxel value, in first-seen order.
    pub sections: Vec<MeshSection>,
}

impl ChunkMeshData {
    /// Creates an empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no face was emitted.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Voxel values with a section, in section order.
    pub fn voxel_sections(&self) -> Vec<u8> {
        self.sections.iter().map(|s| s.voxel).collect()
    }

    /// Total triangles across all sections.
    pub fn triangle_count(&self) -> usize {
        self.sections.iter().map(MeshSection::triangle_count).sum()
    }

    /// Index of the section for `voxel`, appending one on first use.
    fn section_for(&mut self, voxel: u8) -> usize {
        if let Some(i) = self.sections.iter().position(|s| s.voxel == voxel) {
            return i;
        }
        self.sections.push(MeshSection {
            voxel,
            indices: Vec::new(),
        });
        self.sections.len() - 1
    }

    /// Appends one quad for `face` of a voxel centred at `center`, scaled by
    /// `voxel_size`.
    pub fn push_face(&mut self, voxel: u8, face: FaceDirection, center: [f32; 3], voxel_size: f32) {
        let section = self.section_for(voxel);
        let normal = face.normal().to_array();
        let tangent = face.tangent().to_array();
        let color = [face.index() as u8, 0, 0, 0];
        let base = self.vertices.len() as u32;

        for (i, corner) in face.corners().iter().enumerate() {
            let offset = *corner * voxel_size;
            self.vertices.push(MeshVertex {
                position: [
                    center[0] + offset.x,
                    center[1] + offset.y,
                    center[2] + offset.z,
                ],
                normal,
                tangent,
                uv: face.uv(i).to_array(),
                color,
            });
        }

        self.sections[section]
            .indices
            .extend_from_slice(&[base, base + 3, base + 2, base + 2, base + 1, base]);
    }

    /// Counts the quads emitted for a face direction.
    pub fn count_faces(&self, face: FaceDirection) -> usize {
        self.vertices
            .iter()
            .filter(|v| v.color[0] == face.index() as u8)
            .count()
            / 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_mesh() {
        let mesh = ChunkMeshData::new();
        assert!(mesh.is_empty());
        assert_eq!(mesh.triangle_count(), 0);
        assert!(mesh.voxel_sections().is_empty());
    }

    #[test]
    fn test_push_face_winding() {
        let mut mesh = ChunkMeshData::new();
        mesh.push_face(4, FaceDirection::Up, [0.0; 3], 100.0);
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.sections[0].indices, vec![0, 3, 2, 2, 1, 0]);
        assert_eq!(mesh.vertices[0].position, [-50.0, 50.0, 50.0]);
        assert_eq!(mesh.vertices[0].color, [0, 0, 0, 0]);
    }

    #[test]
    fn test_sections_in_first_seen_order() {
        let mut mesh = ChunkMeshData::new();
        mesh.push_face(2, FaceDirection::Up, [0.0; 3], 1.0);
        mesh.push_face(1, FaceDirection::Left, [0.0; 3], 1.0);
        mesh.push_face(2, FaceDirection::Down, [0.0; 3], 1.0);
        assert_eq!(mesh.voxel_sections(), vec![2, 1]);
        assert_eq!(mesh.sections[0].triangle_count(), 4);
        assert_eq!(mesh.count_faces(FaceDirection::Left), 1);
    }

    #[test]
    fn test_vertex_is_pod() {
        let vertex = MeshVertex::zeroed();
        let bytes: &[u8] = bytemuck::bytes_of(&vertex);
        assert_eq!(bytes.len(), 48);
    }
}
