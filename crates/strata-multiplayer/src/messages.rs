//! Terrain wire messages and their serialization.
//!
//! Every message is serialized with [`postcard`] behind a protocol version
//! byte. The transport carrying the bytes is not part of this crate.

use glam::DVec3;
use serde::{Deserialize, Serialize};
use strata_config::TerrainSettings;
use strata_voxel::{Cell2D, ChunkCell};

use crate::region_sync::RegionDataBundle;

/// Current wire-protocol version. Prepended to every serialized message.
pub const PROTOCOL_VERSION: u8 = 1;

// ---------------------------------------------------------------------------
// Top-level enum
// ---------------------------------------------------------------------------

/// Top-level terrain message. The enum discriminant is the type tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Message {
    // --- Join ---
    /// Server pushes the world's settings to a joining client.
    TerrainSettings(TerrainSettings),
    /// Client has its world running and wants chunk identities.
    ReadyForReplication,

    // --- World ---
    /// One bundle of a region's edited voxels.
    RegionData(RegionDataBundle),
    /// Replicated chunk identities around a center cell.
    ChunkNameData(ChunkNameData),
    /// The column every tracked player stands in.
    PlayerChunkLocations(PlayerChunkLocations),

    // --- Edits ---
    /// Client asks the server to apply an edit.
    ServerSetVoxel(VoxelEditRequest),
    /// Server tells other clients about an accepted edit.
    ClientSetVoxel(VoxelEditBroadcast),
    /// Server tells the originator its edit was refused.
    FailedSetVoxel(VoxelEditRejection),
}

impl Message {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TerrainSettings(_) => "TerrainSettings",
            Self::ReadyForReplication => "ReadyForReplication",
            Self::RegionData(_) => "RegionData",
            Self::ChunkNameData(_) => "ChunkNameData",
            Self::PlayerChunkLocations(_) => "PlayerChunkLocations",
            Self::ServerSetVoxel(_) => "ServerSetVoxel",
            Self::ClientSetVoxel(_) => "ClientSetVoxel",
            Self::FailedSetVoxel(_) => "FailedSetVoxel",
        }
    }
}

// ---------------------------------------------------------------------------
// Payload structs
// ---------------------------------------------------------------------------

/// Spawn counts of replicated chunks, as parallel lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkNameData {
    /// Cell the search was centered on.
    pub center: ChunkCell,
    pub cells: Vec<ChunkCell>,
    pub counts: Vec<i32>,
}

impl ChunkNameData {
    pub fn new(center: ChunkCell) -> Self {
        Self {
            center,
            ..Default::default()
        }
    }

    pub fn push(&mut self, cell: ChunkCell, count: i32) {
        self.cells.push(cell);
        self.counts.push(count);
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// `(cell, count)` pairs. Extra entries in the longer list are ignored.
    pub fn pairs(&self) -> impl Iterator<Item = (ChunkCell, i32)> + '_ {
        self.cells.iter().copied().zip(self.counts.iter().copied())
    }
}

/// Columns of all tracked players.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerChunkLocations {
    pub columns: Vec<Cell2D>,
}

/// A client's edit as sent to the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VoxelEditRequest {
    /// World location of the voxel.
    pub location: [f64; 3],
    pub cell: ChunkCell,
    pub value: u8,
    /// Player whose component issued the edit.
    pub origin: u32,
}

/// An accepted edit re-broadcast by the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VoxelEditBroadcast {
    pub location: [f64; 3],
    pub value: u8,
    pub cell: ChunkCell,
}

/// A refused edit, carrying the server's value at the location.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VoxelEditRejection {
    pub location: [f64; 3],
    /// Authoritative value, or -1 when the server had no chunk there.
    pub previous: i32,
}

/// World location of an edit payload.
pub fn location_of(location: [f64; 3]) -> DVec3 {
    DVec3::from_array(location)
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur when decoding a message.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The payload was empty (no version byte).
    #[error("empty payload")]
    EmptyPayload,

    /// The protocol version byte does not match [`PROTOCOL_VERSION`].
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Postcard serialization or deserialization failed.
    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

/// Serialize a [`Message`] into a versioned binary payload.
///
/// Wire format: `[version: u8] [postcard-encoded Message]`
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>, MessageError> {
    let body = postcard::to_allocvec(msg)?;
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Deserialize a versioned binary payload into a [`Message`].
pub fn deserialize_message(data: &[u8]) -> Result<Message, MessageError> {
    let (&version, body) = data.split_first().ok_or(MessageError::EmptyPayload)?;
    if version != PROTOCOL_VERSION {
        return Err(MessageError::UnsupportedVersion(version));
    }
    Ok(postcard::from_bytes(body)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
