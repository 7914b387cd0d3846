//! Terrain replication: wire messages, region streaming, chunk identity
//! replication and server-authoritative voxel edits.

pub mod chunk_names;
pub mod messages;
pub mod region_sync;
pub mod session;
pub mod voxel_edit;

#[cfg(test)]
mod test_support;

pub use chunk_names::{
    ChunkNameReplicator, NameApplyReport, NameBuild, NameReplication, apply_chunk_name_data,
};
pub use messages::{
    ChunkNameData, Message, MessageError, PROTOCOL_VERSION, PlayerChunkLocations, VoxelEditBroadcast,
    VoxelEditRejection, VoxelEditRequest, deserialize_message, serialize_message,
};
pub use region_sync::{
    BundleScheduler, RegionAccumulator, RegionDataBundle, RegionEntry, ScheduledBundle,
    implement_region_data, region_entries, split_region_bundles,
};
pub use session::{ClientSession, Outbound, ServerSession};
pub use voxel_edit::{
    EditOutcome, EditRejection, EditRequest, NoOccupancy, OccupancyQuery, ServerEditReply,
    VoxelEditGateway,
};
