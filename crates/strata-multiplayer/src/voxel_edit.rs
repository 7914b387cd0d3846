//! Voxel edits across the network: client prediction, server validation,
//! broadcast and rollback.
//!
//! A client applies its edit immediately and forwards it to the server. The
//! server checks there is room for a placed voxel, applies the edit and
//! re-broadcasts it to every other client. A refused edit is answered with
//! the server's actual value so the originator can roll back.

use glam::DVec3;
use strata_config::NetMode;
use strata_voxel::{ChunkCell, VoxelDefinitions};
use strata_world::{ChunkRegistry, EditReport, PlayerId, VOXEL_NOT_FOUND, VoxelLookupError};
use tracing::{debug, warn};

use crate::messages::{
    Message, VoxelEditBroadcast, VoxelEditRejection, VoxelEditRequest, location_of,
};

// ---------------------------------------------------------------------------
// OccupancyQuery
// ---------------------------------------------------------------------------

/// Answers whether a physical body overlaps a voxel.
pub trait OccupancyQuery {
    /// Whether anything occupies the cube of edge `voxel_size` centred at
    /// `location`.
    fn is_occupied(&self, location: DVec3, voxel_size: f64) -> bool;
}

/// A world with nothing in it but terrain.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOccupancy;

impl OccupancyQuery for NoOccupancy {
    fn is_occupied(&self, _location: DVec3, _voxel_size: f64) -> bool {
        false
    }
}

impl<F: Fn(DVec3, f64) -> bool> OccupancyQuery for F {
    fn is_occupied(&self, location: DVec3, voxel_size: f64) -> bool {
        self(location, voxel_size)
    }
}

// ---------------------------------------------------------------------------
// Requests and outcomes
// ---------------------------------------------------------------------------

/// A single voxel edit and who asked for it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EditRequest {
    pub location: DVec3,
    pub cell: ChunkCell,
    pub value: u8,
    pub origin: PlayerId,
}

impl EditRequest {
    pub fn to_message(&self) -> Message {
        Message::ServerSetVoxel(VoxelEditRequest {
            location: self.location.to_array(),
            cell: self.cell,
            value: self.value,
            origin: self.origin.0,
        })
    }

    pub fn from_message(msg: &VoxelEditRequest) -> Self {
        Self {
            location: location_of(msg.location),
            cell: msg.cell,
            value: msg.value,
            origin: PlayerId(msg.origin),
        }
    }

    fn broadcast(&self) -> Message {
        Message::ClientSetVoxel(VoxelEditBroadcast {
            location: self.location.to_array(),
            value: self.value,
            cell: self.cell,
        })
    }
}

/// Why an edit was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EditRejection {
    /// Something stands where the voxel would be placed.
    #[error("no room to place a voxel there")]
    Occupied,
    #[error(transparent)]
    Lookup(#[from] VoxelLookupError),
}

/// Result of an edit issued by this process.
#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    /// Applied locally. `send` goes to the server from a client, or to every
    /// remote client from a listen host.
    Applied { previous: u8, send: Option<Message> },
    Rejected(EditRejection),
}

/// The server's answer to a client's edit.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEditReply {
    Broadcast { recipients: Vec<PlayerId>, message: Message },
    Reject { to: PlayerId, message: Message },
}

// ---------------------------------------------------------------------------
// VoxelEditGateway
// ---------------------------------------------------------------------------

/// Routes edits according to this process's network role.
#[derive(Debug, Clone, Copy)]
pub struct VoxelEditGateway {
    mode: NetMode,
    /// The player rendered by this process, if any.
    local_player: Option<PlayerId>,
}

impl VoxelEditGateway {
    pub fn new(mode: NetMode, local_player: Option<PlayerId>) -> Self {
        Self { mode, local_player }
    }

    pub fn mode(&self) -> NetMode {
        self.mode
    }

    /// Applies an edit if a placed voxel has room. Returns the old value.
    pub fn set_voxel_if_room(
        &self,
        registry: &mut ChunkRegistry,
        definitions: &VoxelDefinitions,
        request: &EditRequest,
        occupancy: &dyn OccupancyQuery,
    ) -> Result<u8, EditRejection> {
        let voxel_size = registry.shared().spec.voxel_size;
        if !definitions.is_air(request.value) && occupancy.is_occupied(request.location, voxel_size) {
            return Err(EditRejection::Occupied);
        }
        let report = registry.set_voxel(request.location, request.value, request.cell, true, true)?;
        Ok(report.previous)
    }

    /// An edit made by this process's own player.
    pub fn attempt_edit(
        &self,
        registry: &mut ChunkRegistry,
        definitions: &VoxelDefinitions,
        location: DVec3,
        value: u8,
        occupancy: &dyn OccupancyQuery,
    ) -> EditOutcome {
        let cell = registry.shared().spec.cell_from_location(location);
        let request = EditRequest {
            location,
            cell,
            value,
            origin: self.local_player.unwrap_or(PlayerId(0)),
        };
        let previous = match self.set_voxel_if_room(registry, definitions, &request, occupancy) {
            Ok(previous) => previous,
            Err(rejection) => {
                debug!("Edit at {location} refused locally: {rejection}");
                return EditOutcome::Rejected(rejection);
            }
        };
        let send = match self.mode {
            NetMode::Client => Some(request.to_message()),
            NetMode::ListenServer => Some(request.broadcast()),
            NetMode::Standalone | NetMode::DedicatedServer => None,
        };
        EditOutcome::Applied { previous, send }
    }

    /// Validates and applies a client's edit on the server.
    ///
    /// Accepted edits go to every connected player except the originator
    /// and the listen host, which both applied it already.
    pub fn handle_server_edit(
        &self,
        registry: &mut ChunkRegistry,
        definitions: &VoxelDefinitions,
        request: &EditRequest,
        occupancy: &dyn OccupancyQuery,
        connected: &[PlayerId],
    ) -> ServerEditReply {
        match self.set_voxel_if_room(registry, definitions, request, occupancy) {
            Ok(_) => {
                let recipients = connected
                    .iter()
                    .copied()
                    .filter(|p| *p != request.origin && Some(*p) != self.local_player)
                    .collect();
                ServerEditReply::Broadcast {
                    recipients,
                    message: request.broadcast(),
                }
            }
            Err(rejection) => {
                warn!(
                    "Refused edit from {} at {}: {rejection}",
                    request.origin, request.location
                );
                let previous = registry
                    .get_voxel(request.location, request.cell)
                    .map(i32::from)
                    .unwrap_or(VOXEL_NOT_FOUND);
                ServerEditReply::Reject {
                    to: request.origin,
                    message: Message::FailedSetVoxel(VoxelEditRejection {
                        location: request.location.to_array(),
                        previous,
                    }),
                }
            }
        }
    }

    /// Applies an edit broadcast by the server.
    ///
    /// Without a local chunk the edit is still recorded so the chunk picks
    /// it up when it is generated.
    pub fn apply_broadcast(
        &self,
        registry: &mut ChunkRegistry,
        broadcast: &VoxelEditBroadcast,
    ) -> Option<EditReport> {
        let location = location_of(broadcast.location);
        match registry.set_voxel(location, broadcast.value, broadcast.cell, true, true) {
            Ok(report) => Some(report),
            Err(VoxelLookupError::ChunkMissing(cell)) => {
                let shared = registry.shared();
                match shared.spec.voxel_index_for_location(cell, location) {
                    Some((index, _)) => {
                        shared.overlays.lock().record(cell, index, broadcast.value);
                        shared.columns.add_modified(cell);
                        debug!("Recorded edit for absent chunk {cell}");
                    }
                    None => warn!("Broadcast edit at {location} is outside chunk {cell}"),
                }
                None
            }
            Err(e) => {
                warn!("Could not apply broadcast edit at {location}: {e}");
                None
            }
        }
    }

    /// Rolls a refused edit back to the server's value.
    pub fn apply_rejection(&self, registry: &mut ChunkRegistry, rejection: &VoxelEditRejection) -> bool {
        let location = location_of(rejection.location);
        let Ok(previous) = u8::try_from(rejection.previous) else {
            warn!("Server had no voxel at {location}; nothing to roll back");
            return false;
        };
        let cell = registry.shared().spec.cell_from_location(location);
        match registry.set_voxel(location, previous, cell, true, false) {
            Ok(_) => {
                debug!("Rolled back edit at {location} to {previous}");
                true
            }
            Err(e) => {
                warn!("Could not roll back edit at {location}: {e}");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
