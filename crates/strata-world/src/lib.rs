//! World streaming: background chunk workers, the main-thread chunk
//! registry, region persistence and the terrain manager tying them together.

pub mod construction;
pub mod manager;
pub mod persistence;
pub mod registry;
pub mod regions;
pub mod shared;
pub mod task;
pub mod worker;

pub use construction::{ChunkConstructionData, build_column};
pub use manager::{
    TerrainManager, TickResult, TrackedPlayer, WorldError, WorldEvent, WorldStats, heightmap_params,
};
pub use persistence::{RegionFile, RegionFileError, RegionPersistence, SaveDirectory, SaveError};
pub use registry::{
    ChunkRegistry, EditReport, LiveChunk, NameOutcome, RemovalDecision, ReplicationChange,
    SpawnOutcome, VOXEL_NOT_FOUND, VoxelLookupError,
};
pub use regions::{RegionTracker, RegionUpdate};
pub use shared::{
    ColumnRegistry, HeightmapClaims, PlayerId, RegionBook, TrackedLocation, TrackedLocations,
    TrackedSnapshot, WorldShared,
};
pub use task::MainThreadTask;
pub use worker::{ChunkWorker, StepOutcome, WorkerPool, WorkerTiming, auto_worker_count};
