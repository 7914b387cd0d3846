//! Server and client sessions around a [`TerrainManager`].
//!
//! A session owns the replication state of one process. Each tick it runs
//! the manager, turns the world's events into messages and hands them back
//! to the caller, which owns the transport.

use std::collections::BTreeSet;
use std::time::Instant;

use glam::DVec3;
use strata_config::{EngineConfig, NetMode};
use strata_voxel::ChunkCell;
use strata_world::{PlayerId, TerrainManager, WorldError, WorldEvent};
use tracing::{debug, info, warn};

use crate::chunk_names::{ChunkNameReplicator, NameReplication, apply_chunk_name_data};
use crate::messages::{Message, PlayerChunkLocations};
use crate::region_sync::{
    BundleScheduler, RegionAccumulator, implement_region_data, region_entries, split_region_bundles,
};
use crate::voxel_edit::{EditOutcome, EditRequest, OccupancyQuery, ServerEditReply, VoxelEditGateway};

/// A message for one player, to be delivered at `deliver_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: PlayerId,
    pub message: Message,
    pub deliver_at: Instant,
}

// ---------------------------------------------------------------------------
// ServerSession
// ---------------------------------------------------------------------------

/// Replication state of a dedicated or listen server.
pub struct ServerSession {
    replicator: ChunkNameReplicator,
    scheduler: BundleScheduler,
    gateway: VoxelEditGateway,
    max_bundle_bytes: usize,
    /// The listen host's own player.
    host: Option<PlayerId>,
    /// Remote players.
    connected: BTreeSet<PlayerId>,
    /// Centers whose names wait for missing columns.
    name_retries: Vec<ChunkCell>,
    outbox: Vec<Outbound>,
}

impl ServerSession {
    pub fn new(config: &EngineConfig, host: Option<PlayerId>) -> Self {
        let network = &config.network;
        Self {
            replicator: ChunkNameReplicator::from_config(network),
            scheduler: BundleScheduler::from_config(network),
            gateway: VoxelEditGateway::new(network.mode, host),
            max_bundle_bytes: network.max_region_bundle_bytes,
            host,
            connected: BTreeSet::new(),
            name_retries: Vec::new(),
            outbox: Vec::new(),
        }
    }

    /// Remote players, sorted.
    pub fn connected(&self) -> Vec<PlayerId> {
        self.connected.iter().copied().collect()
    }

    /// Bundles still waiting for their delivery time.
    pub fn pending_bundles(&self) -> usize {
        self.scheduler.pending_len()
    }

    /// Starts tracking the listen host's own player.
    pub fn add_host(&mut self, manager: &mut TerrainManager) {
        if let Some(host) = self.host {
            manager.add_tracked_player(host, true);
        }
    }

    /// A remote player joined. It is admitted once its position is known.
    pub fn connect(&mut self, manager: &mut TerrainManager, player: PlayerId) {
        if !self.connected.insert(player) {
            warn!("{player} is already connected");
            return;
        }
        info!("{player} connected");
        manager.add_tracked_player(player, false);
        self.replicator.add_player(player);
    }

    pub fn disconnect(&mut self, manager: &mut TerrainManager, player: PlayerId) {
        if !self.connected.remove(&player) {
            return;
        }
        info!("{player} disconnected");
        manager.remove_tracked_player(player);
        self.replicator.remove_player(player);
        let dropped = self.scheduler.cancel_player(player);
        if dropped > 0 {
            debug!("Dropped {dropped} region bundles queued for {player}");
        }
        self.outbox.retain(|o| o.to != player);
    }

    /// Handles a message received from a remote player.
    pub fn handle_message(
        &mut self,
        manager: &mut TerrainManager,
        from: PlayerId,
        message: Message,
        occupancy: &dyn OccupancyQuery,
        now: Instant,
    ) {
        if !self.connected.contains(&from) {
            warn!("Ignoring {} from unknown {from}", message.kind());
            return;
        }
        match message {
            Message::ReadyForReplication => {
                debug!("{from} is ready for replication");
                self.replicator.mark_ready(from);
                if let Some(center) = player_cell(manager, from) {
                    self.replicate_names(manager, center, true, now);
                }
            }
            Message::ServerSetVoxel(request) => {
                let mut request = EditRequest::from_message(&request);
                if request.origin != from {
                    warn!("{from} sent an edit on behalf of {}", request.origin);
                    request.origin = from;
                }
                let definitions = manager.definitions().clone();
                let connected = self.connected();
                let Some(registry) = manager.registry_mut() else {
                    warn!("Edit from {from} before the world started");
                    return;
                };
                let reply =
                    self.gateway
                        .handle_server_edit(registry, &definitions, &request, occupancy, &connected);
                self.push_reply(reply, now);
            }
            other => warn!("Unexpected {} from {from}", other.kind()),
        }
    }

    /// An edit made by the listen host's own player.
    pub fn host_edit(
        &mut self,
        manager: &mut TerrainManager,
        location: DVec3,
        value: u8,
        occupancy: &dyn OccupancyQuery,
        now: Instant,
    ) -> Result<EditOutcome, WorldError> {
        let definitions = manager.definitions().clone();
        let registry = manager.registry_mut().ok_or(WorldError::NotInitialized)?;
        let outcome = self
            .gateway
            .attempt_edit(registry, &definitions, location, value, occupancy);
        if let EditOutcome::Applied {
            send: Some(message),
            ..
        } = &outcome
        {
            for player in &self.connected {
                self.outbox.push(Outbound {
                    to: *player,
                    message: message.clone(),
                    deliver_at: now,
                });
            }
        }
        Ok(outcome)
    }

    /// Runs one server frame and returns everything to send.
    pub fn tick(&mut self, manager: &mut TerrainManager, now: Instant) -> Vec<Outbound> {
        // --- Step 1: Tick the world ---
        manager.tick(now);
        let events = manager.drain_events();

        // --- Step 2: Forget identities replaced this frame ---
        for event in &events {
            if let WorldEvent::ChunkReplicated { cell, .. } = event {
                self.replicator.invalidate(*cell);
            }
        }

        // --- Step 3: React to world events ---
        for event in events {
            match event {
                WorldEvent::PlayerAdmitted { player, local: false } => {
                    if let Some(settings) = manager.settings() {
                        self.push(player, Message::TerrainSettings(settings), now);
                    }
                }
                WorldEvent::PlayerDropped { player } => {
                    warn!("{player} never reported a position");
                    self.connected.remove(&player);
                    self.replicator.remove_player(player);
                }
                WorldEvent::PlayerMoved { player, .. } => {
                    if let Some(center) = player_cell(manager, player) {
                        self.replicate_names(manager, center, false, now);
                    }
                }
                WorldEvent::PlayerColumnsChanged { columns } => {
                    let locations = PlayerChunkLocations {
                        columns: columns.into_iter().map(|(_, c)| c).collect(),
                    };
                    for player in self.connected() {
                        self.push(player, Message::PlayerChunkLocations(locations.clone()), now);
                    }
                }
                WorldEvent::SendRegion { player, region } => {
                    if !self.connected.contains(&player) {
                        continue;
                    }
                    let Some(shared) = manager.shared() else {
                        continue;
                    };
                    let bundles =
                        split_region_bundles(region, region_entries(shared, region), self.max_bundle_bytes);
                    let count = self.scheduler.schedule(player, bundles, now);
                    debug!("Region {region} queued for {player} in {count} bundles");
                }
                _ => {}
            }
        }

        // --- Step 4: Retry names that waited for chunks ---
        for center in std::mem::take(&mut self.name_retries) {
            self.replicate_names(manager, center, true, now);
        }

        // --- Step 5: Release due region bundles ---
        for scheduled in self.scheduler.take_due(now) {
            self.outbox.push(Outbound {
                to: scheduled.player,
                message: Message::RegionData(scheduled.bundle),
                deliver_at: scheduled.deliver_at,
            });
        }

        std::mem::take(&mut self.outbox)
    }

    fn push(&mut self, to: PlayerId, message: Message, now: Instant) {
        self.outbox.push(Outbound {
            to,
            message,
            deliver_at: now,
        });
    }

    fn push_reply(&mut self, reply: ServerEditReply, now: Instant) {
        match reply {
            ServerEditReply::Broadcast { recipients, message } => {
                for player in recipients {
                    self.push(player, message.clone(), now);
                }
            }
            ServerEditReply::Reject { to, message } => self.push(to, message, now),
        }
    }

    fn replicate_names(&mut self, manager: &mut TerrainManager, center: ChunkCell, ensure: bool, now: Instant) {
        let recipients: Vec<PlayerId> = self
            .replicator
            .ready_players()
            .into_iter()
            .filter(|p| self.connected.contains(p))
            .collect();
        let Some(shared) = manager.shared().cloned() else {
            return;
        };
        let Some(registry) = manager.registry_mut() else {
            return;
        };
        match self
            .replicator
            .replicate_chunk_names(registry, &shared, center, ensure, &recipients)
        {
            NameReplication::Sent(sends) => {
                for (player, data) in sends {
                    self.push(player, Message::ChunkNameData(data), now);
                }
            }
            NameReplication::Retry => {
                if !self.name_retries.contains(&center) {
                    self.name_retries.push(center);
                }
            }
            NameReplication::GaveUp => {}
        }
    }
}

/// Cell a tracked player stands in.
fn player_cell(manager: &TerrainManager, player: PlayerId) -> Option<ChunkCell> {
    let location = manager.player(player)?.location?;
    Some(manager.shared()?.spec.cell_from_location(location))
}

// ---------------------------------------------------------------------------
// ClientSession
// ---------------------------------------------------------------------------

/// Replication state of a remote client.
pub struct ClientSession {
    player: PlayerId,
    accumulator: RegionAccumulator,
    gateway: VoxelEditGateway,
    ready_sent: bool,
    outbox: Vec<Message>,
}

impl ClientSession {
    pub fn new(player: PlayerId) -> Self {
        Self {
            player,
            accumulator: RegionAccumulator::new(),
            gateway: VoxelEditGateway::new(NetMode::Client, Some(player)),
            ready_sent: false,
            outbox: Vec::new(),
        }
    }

    pub fn player(&self) -> PlayerId {
        self.player
    }

    /// Whether the ready handshake went out.
    pub fn is_ready(&self) -> bool {
        self.ready_sent
    }

    /// Handles a message from the server.
    pub fn handle_message(&mut self, manager: &mut TerrainManager, message: Message) -> Result<(), WorldError> {
        match message {
            Message::TerrainSettings(settings) => {
                info!("Received terrain settings (seed {})", settings.seed);
                manager.initialize(settings)?;
                if manager.player(self.player).is_none() && !manager.is_pending(self.player) {
                    manager.add_tracked_player(self.player, true);
                }
                self.ready_sent = false;
            }
            Message::RegionData(bundle) => {
                if let Some(complete) = self.accumulator.receive(bundle) {
                    let shared = manager.shared().ok_or(WorldError::NotInitialized)?;
                    implement_region_data(shared, &complete);
                }
            }
            Message::ChunkNameData(data) => {
                let registry = manager.registry_mut().ok_or(WorldError::NotInitialized)?;
                let report = apply_chunk_name_data(registry, &data);
                debug!("Applied chunk names: {report:?}");
            }
            Message::PlayerChunkLocations(locations) => {
                manager.set_remote_columns(locations.columns);
            }
            Message::ClientSetVoxel(broadcast) => {
                let registry = manager.registry_mut().ok_or(WorldError::NotInitialized)?;
                self.gateway.apply_broadcast(registry, &broadcast);
            }
            Message::FailedSetVoxel(rejection) => {
                let registry = manager.registry_mut().ok_or(WorldError::NotInitialized)?;
                self.gateway.apply_rejection(registry, &rejection);
            }
            other => warn!("Unexpected {} from the server", other.kind()),
        }
        Ok(())
    }

    /// An edit by this client's player, predicted locally.
    pub fn attempt_edit(
        &mut self,
        manager: &mut TerrainManager,
        location: DVec3,
        value: u8,
        occupancy: &dyn OccupancyQuery,
    ) -> Result<EditOutcome, WorldError> {
        let definitions = manager.definitions().clone();
        let registry = manager.registry_mut().ok_or(WorldError::NotInitialized)?;
        let outcome = self
            .gateway
            .attempt_edit(registry, &definitions, location, value, occupancy);
        if let EditOutcome::Applied {
            send: Some(message),
            ..
        } = &outcome
        {
            self.outbox.push(message.clone());
        }
        Ok(outcome)
    }

    /// Runs one client frame and returns everything to send to the server.
    pub fn tick(&mut self, manager: &mut TerrainManager, now: Instant) -> Vec<Message> {
        manager.tick(now);
        for event in manager.drain_events() {
            if let WorldEvent::PlayerDropped { player } = event {
                warn!("{player} was dropped before reporting a position");
            }
        }
        if !self.ready_sent && manager.is_initialized() && !manager.is_player_frozen(self.player) {
            info!("Ready for replication");
            self.ready_sent = true;
            self.outbox.push(Message::ReadyForReplication);
        }
        std::mem::take(&mut self.outbox)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
