//! Face-culled voxel meshing: face directions, mesh buffers grouped by voxel
//! value, and the chunk mesher.

pub mod chunk_mesh;
pub mod face_direction;
pub mod mesher;

pub use chunk_mesh::{ChunkMeshData, MeshSection, MeshVertex};
pub use face_direction::FaceDirection;
pub use mesher::build_chunk_mesh;
