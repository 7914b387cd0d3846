//! The terrain manager: the main-thread face of a world.
//!
//! [`TerrainManager::tick`] is called once per frame. It admits pending
//! players, publishes their locations to the workers, applies everything
//! the workers handed over, spreads chunk destruction over frames and runs
//! the autosave timer. Everything other systems need to react to is
//! reported as a [`WorldEvent`] and collected with
//! [`TerrainManager::drain_events`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::DVec3;
use rustc_hash::FxHashMap;
use strata_config::{EngineConfig, NetMode, TerrainSettings};
use strata_terrain::{DefaultPolicy, GenerationPolicy, HeightmapParams, SpiralSearch};
use strata_voxel::{Cell2D, ChunkCell, RegionCoord, VoxelDefinitions};
use tracing::{debug, error, info, warn};

use crate::persistence::{RegionPersistence, SaveDirectory, SaveError};
use crate::registry::{ChunkRegistry, EditReport, ReplicationChange, SpawnOutcome, VoxelLookupError};
use crate::regions::RegionTracker;
use crate::shared::{PlayerId, TrackedLocation, WorldShared};
use crate::task::MainThreadTask;
use crate::worker::{WorkerPool, WorkerTiming, auto_worker_count};

/// Errors surfaced by [`TerrainManager`].
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("terrain has not been initialized")]
    NotInitialized,
    #[error("failed to start chunk workers: {0}")]
    Workers(#[from] std::io::Error),
    #[error(transparent)]
    Lookup(#[from] VoxelLookupError),
    #[error(transparent)]
    Save(#[from] SaveError),
}

/// Something other systems may need to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    PlayerAdmitted { player: PlayerId, local: bool },
    /// The player never reported a position and was given up on.
    PlayerDropped { player: PlayerId },
    ChunkSpawned { cell: ChunkCell },
    ChunkDestroyed { cell: ChunkCell },
    /// A chunk got a new network identity (server).
    ChunkReplicated { cell: ChunkCell, count: i32 },
    /// A player entered a new chunk column.
    PlayerMoved { player: PlayerId, column: Cell2D },
    /// The column of every tracked player, after any of them changed.
    PlayerColumnsChanged { columns: Vec<(PlayerId, Cell2D)> },
    /// A region a remote player needs is in memory and should be sent.
    SendRegion { player: PlayerId, region: RegionCoord },
    RegionLoaded { region: RegionCoord },
}

/// A player the workers generate around.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedPlayer {
    pub location: Option<DVec3>,
    /// Rendered by this process.
    pub local: bool,
    /// Set once any chunk exists in the player's column.
    pub has_chunk_at_spawn: bool,
}

#[derive(Debug, Clone, Copy)]
struct PendingPlayer {
    id: PlayerId,
    local: bool,
    location: Option<DVec3>,
    retries: u32,
}

/// Counters for debug overlays and the server log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorldStats {
    pub loaded_chunks: usize,
    pub hidden_chunks: usize,
    pub queued_for_destroy: usize,
    pub generated_columns: usize,
    pub loaded_regions: usize,
    pub pending_load_regions: usize,
    pub pending_save_regions: usize,
    pub worker_count: usize,
    pub tracked_players: usize,
}

/// Result of a single [`TerrainManager::tick`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickResult {
    /// Worker hand-offs applied.
    pub tasks: usize,
    pub spawned: usize,
    pub destroyed: usize,
    /// Edited cells written by the autosave, if it ran.
    pub autosaved: Option<usize>,
}

struct World {
    shared: Arc<WorldShared>,
    registry: ChunkRegistry,
    pool: WorkerPool,
    tracker: RegionTracker,
}

/// Owns the world of this process and the players generating it.
pub struct TerrainManager {
    config: EngineConfig,
    definitions: Arc<VoxelDefinitions>,
    world: Option<World>,
    players: BTreeMap<PlayerId, TrackedPlayer>,
    pending: Vec<PendingPlayer>,
    last_columns: FxHashMap<PlayerId, Cell2D>,
    locations_dirty: bool,
    events: Vec<WorldEvent>,
    last_autosave: Instant,
}

/// Noise parameters for a world's settings.
pub fn heightmap_params(settings: &TerrainSettings) -> HeightmapParams {
    HeightmapParams {
        seed: settings.seed,
        height_multiplier: f64::from(settings.height_multiplier),
        biome_scale: f64::from(settings.biome_noise_scale),
        terrain_scale: f64::from(settings.terrain_noise_scale),
    }
}

impl TerrainManager {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_definitions(config, Arc::new(VoxelDefinitions::terrain_defaults()))
    }

    pub fn with_definitions(config: EngineConfig, definitions: Arc<VoxelDefinitions>) -> Self {
        Self {
            config,
            definitions,
            world: None,
            players: BTreeMap::new(),
            pending: Vec::new(),
            last_columns: FxHashMap::default(),
            locations_dirty: false,
            events: Vec::new(),
            last_autosave: Instant::now(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn mode(&self) -> NetMode {
        self.config.network.mode
    }

    pub fn definitions(&self) -> &Arc<VoxelDefinitions> {
        &self.definitions
    }

    pub fn is_initialized(&self) -> bool {
        self.world.is_some()
    }

    /// Settings of the running world.
    pub fn settings(&self) -> Option<TerrainSettings> {
        self.world.as_ref().map(|w| w.shared.settings)
    }

    pub fn shared(&self) -> Option<&Arc<WorldShared>> {
        self.world.as_ref().map(|w| &w.shared)
    }

    pub fn registry(&self) -> Option<&ChunkRegistry> {
        self.world.as_ref().map(|w| &w.registry)
    }

    pub fn registry_mut(&mut self) -> Option<&mut ChunkRegistry> {
        self.world.as_mut().map(|w| &mut w.registry)
    }

    fn world_mut(&mut self) -> Result<&mut World, WorldError> {
        self.world.as_mut().ok_or(WorldError::NotInitialized)
    }

    fn save_directory(&self) -> SaveDirectory {
        SaveDirectory::new(self.config.persistence.resolved_save_root())
    }

    fn region_persistence(&self) -> Result<RegionPersistence, WorldError> {
        let name = &self.config.persistence.save_name;
        if !self.mode().has_authority() || name.is_empty() {
            return Ok(RegionPersistence::disabled());
        }
        Ok(RegionPersistence::new(self.save_directory().save_path(name)?))
    }

    /// Starts a world with `settings`, replacing any running one.
    pub fn initialize(&mut self, settings: TerrainSettings) -> Result<(), WorldError> {
        if self.world.is_some() {
            self.shutdown();
        }

        let persistence = self.region_persistence()?;
        let streaming = &self.config.streaming;
        let shared = Arc::new(WorldShared::new(
            settings,
            self.mode(),
            streaming.region_size_in_chunks,
            self.config.generation.generation_radius,
            persistence,
        ));
        let policy: Arc<dyn GenerationPolicy> = Arc::new(DefaultPolicy::new(
            heightmap_params(&settings),
            shared.spec,
            self.definitions.clone(),
        ));

        let pool = WorkerPool::spawn(
            shared.clone(),
            policy.clone(),
            auto_worker_count(&self.config),
            WorkerTiming::from_config(&self.config.generation),
        )?;
        let registry = ChunkRegistry::new(
            shared.clone(),
            policy,
            streaming.chunks_to_destroy_per_frame,
            streaming.adjacent_voxel_buffer,
        );
        let tracker = RegionTracker::new(streaming.region_buffer_size);

        info!(
            "Terrain initialized: seed {}, chunk size {}, radius {}, mode {:?}",
            settings.seed,
            shared.spec.chunk_size(),
            shared.generation_radius(),
            self.mode()
        );
        self.world = Some(World {
            shared,
            registry,
            pool,
            tracker,
        });
        self.last_columns.clear();
        self.last_autosave = Instant::now();
        self.locations_dirty = true;
        Ok(())
    }

    // --- Players ---

    /// Starts tracking a player. It is admitted once it has a location.
    pub fn add_tracked_player(&mut self, id: PlayerId, local: bool) {
        if self.players.contains_key(&id) || self.pending.iter().any(|p| p.id == id) {
            warn!("{id} is already tracked");
            return;
        }
        self.pending.push(PendingPlayer {
            id,
            local,
            location: None,
            retries: 0,
        });
    }

    pub fn remove_tracked_player(&mut self, id: PlayerId) -> bool {
        self.pending.retain(|p| p.id != id);
        if self.players.remove(&id).is_none() {
            return false;
        }
        self.last_columns.remove(&id);
        if let Some(world) = self.world.as_mut() {
            world.tracker.remove_player(&world.shared, id);
        }
        self.locations_dirty = true;
        true
    }

    pub fn update_player_location(&mut self, id: PlayerId, location: DVec3) {
        if let Some(player) = self.players.get_mut(&id) {
            if player.location != Some(location) {
                player.location = Some(location);
                self.locations_dirty = true;
            }
        } else if let Some(pending) = self.pending.iter_mut().find(|p| p.id == id) {
            pending.location = Some(location);
        } else {
            debug!("Ignoring location of untracked {id}");
        }
    }

    pub fn player(&self, id: PlayerId) -> Option<&TrackedPlayer> {
        self.players.get(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = (PlayerId, &TrackedPlayer)> {
        self.players.iter().map(|(id, p)| (*id, p))
    }

    pub fn is_pending(&self, id: PlayerId) -> bool {
        self.pending.iter().any(|p| p.id == id)
    }

    /// Whether the player must not move yet: it is not admitted or no chunk
    /// exists under it.
    pub fn is_player_frozen(&self, id: PlayerId) -> bool {
        self.players.get(&id).is_none_or(|p| !p.has_chunk_at_spawn)
    }

    /// Columns of every player as reported by the server.
    ///
    /// Workers use them for hide decisions. On a client they also release
    /// chunks no player is within `collision_radius + chunk_deletion_buffer`
    /// of, so hidden chunks the server no longer needs get destroyed.
    pub fn set_remote_columns(&mut self, columns: Vec<Cell2D>) {
        let Some(world) = self.world.as_mut() else {
            return;
        };
        if !world.shared.mode.is_server() {
            let settings = &world.shared.settings;
            let radius = settings.collision_radius + settings.chunk_deletion_buffer;
            world.registry.update_safe_to_destroy(&columns, radius);
        }
        world.shared.tracked.publish_remote_columns(columns);
    }

    // --- Tick ---

    /// Runs one frame of main-thread terrain work.
    pub fn tick(&mut self, now: Instant) -> TickResult {
        let mut result = TickResult::default();
        if self.world.is_none() {
            return result;
        }

        // --- Step 1: Admit pending players ---
        self.admit_pending();

        // --- Step 2: Publish locations, update regions, collision sweep ---
        if self.locations_dirty {
            self.locations_dirty = false;
            self.publish_locations();
        }

        let Some(world) = self.world.as_mut() else {
            return result;
        };

        // --- Step 3: Apply worker hand-offs ---
        for task in world.pool.drain_tasks() {
            result.tasks += 1;
            world.apply_task(task, &mut self.events, &mut result);
        }

        // --- Step 4: Spread destruction over frames ---
        for cell in world.registry.process_destroy_queue() {
            result.destroyed += 1;
            self.events.push(WorldEvent::ChunkDestroyed { cell });
        }

        // --- Step 5: Release players standing on terrain ---
        let spec = world.shared.spec;
        for player in self.players.values_mut() {
            if player.has_chunk_at_spawn {
                continue;
            }
            if let Some(location) = player.location {
                let column = spec.column_from_location(location.truncate());
                player.has_chunk_at_spawn = world.registry.column_has_chunk(column);
            }
        }

        // --- Step 6: Regions ready to send ---
        for (player, region) in world.tracker.take_ready_sends(&world.shared) {
            self.events.push(WorldEvent::SendRegion { player, region });
        }

        // --- Step 7: Autosave ---
        let interval = self.config.streaming.autosave_interval_secs;
        if interval > 0
            && self.mode().has_authority()
            && now.saturating_duration_since(self.last_autosave) >= Duration::from_secs(interval)
        {
            self.last_autosave = now;
            result.autosaved = Some(self.autosave());
        }

        result
    }

    fn admit_pending(&mut self) {
        let max_retries = self.config.network.max_player_retries;
        let mut still_pending = Vec::with_capacity(self.pending.len());
        for mut pending in std::mem::take(&mut self.pending) {
            if let Some(location) = pending.location {
                info!("Admitting {}", pending.id);
                self.players.insert(
                    pending.id,
                    TrackedPlayer {
                        location: Some(location),
                        local: pending.local,
                        has_chunk_at_spawn: false,
                    },
                );
                self.events.push(WorldEvent::PlayerAdmitted {
                    player: pending.id,
                    local: pending.local,
                });
                self.locations_dirty = true;
                continue;
            }
            pending.retries += 1;
            if pending.retries > max_retries {
                error!("{} never reported a location; dropping it", pending.id);
                self.events.push(WorldEvent::PlayerDropped { player: pending.id });
                continue;
            }
            still_pending.push(pending);
        }
        self.pending = still_pending;
    }

    fn publish_locations(&mut self) {
        let Some(world) = self.world.as_mut() else {
            return;
        };
        let spec = world.shared.spec;
        let is_server = world.shared.mode.is_server();
        let mut tracked = Vec::with_capacity(self.players.len());
        let mut moved = false;

        for (id, player) in &self.players {
            let Some(location) = player.location else {
                continue;
            };
            let location = location.truncate();
            tracked.push(TrackedLocation {
                player: *id,
                location,
                local: player.local,
            });
            let column = spec.column_from_location(location);
            if self.last_columns.insert(*id, column) != Some(column) {
                moved = true;
                world
                    .tracker
                    .update(&world.shared, *id, column, is_server && !player.local);
                self.events.push(WorldEvent::PlayerMoved { player: *id, column });
            }
        }

        world.collision_sweep(&tracked, &mut self.events);
        world.shared.tracked.publish(tracked);

        if moved {
            let mut columns: Vec<(PlayerId, Cell2D)> =
                self.last_columns.iter().map(|(p, c)| (*p, *c)).collect();
            columns.sort();
            self.events.push(WorldEvent::PlayerColumnsChanged { columns });
        }
    }

    /// Everything that happened since the last call.
    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.events)
    }

    // --- Voxels ---

    /// Sets the voxel at a world location, propagating across chunk borders
    /// and requesting chunks the edit needs.
    pub fn set_voxel(&mut self, location: DVec3, value: u8) -> Result<EditReport, WorldError> {
        let world = self.world_mut()?;
        let cell = world.shared.spec.cell_from_location(location);
        Ok(world.registry.set_voxel(location, value, cell, true, true)?)
    }

    /// Sets a voxel in an explicit cell.
    pub fn set_voxel_in(
        &mut self,
        location: DVec3,
        value: u8,
        cell: ChunkCell,
        propagate: bool,
        check_missing: bool,
    ) -> Result<EditReport, WorldError> {
        let world = self.world_mut()?;
        Ok(world
            .registry
            .set_voxel(location, value, cell, propagate, check_missing)?)
    }

    pub fn get_voxel(&mut self, location: DVec3) -> Result<u8, WorldError> {
        let world = self.world_mut()?;
        let cell = world.shared.spec.cell_from_location(location);
        Ok(world.registry.get_voxel(location, cell)?)
    }

    // --- Settings and saves ---

    /// Changes the generation radius, never below the collision radius.
    /// Returns the radius applied.
    pub fn set_generation_radius(&mut self, radius: i32) -> i32 {
        let applied = match &self.world {
            Some(world) => world.pool.set_generation_radius(radius),
            None => radius,
        };
        self.config.generation.generation_radius = applied;
        info!("Generation radius set to {applied}");
        applied
    }

    /// Selects the save that regions are loaded from and written to.
    pub fn set_save_name(&mut self, name: &str) -> Result<(), WorldError> {
        let dir = self.save_directory().save_path(name)?;
        self.config.persistence.save_name = name.to_string();
        if let Some(world) = &self.world {
            if world.shared.mode.has_authority() {
                world.shared.persistence.set_save_dir(Some(dir));
            }
        }
        Ok(())
    }

    pub fn create_world_save(
        &self,
        name: &str,
        settings: &TerrainSettings,
    ) -> Result<std::path::PathBuf, WorldError> {
        Ok(self.save_directory().create_world_save(name, settings)?)
    }

    pub fn delete_save(&self, name: &str) -> Result<(), WorldError> {
        Ok(self.save_directory().delete_save(name)?)
    }

    pub fn list_saves(&self) -> Vec<String> {
        self.save_directory().list_saves()
    }

    /// Writes every region with unsaved edits without evicting it.
    pub fn autosave(&self) -> usize {
        match &self.world {
            Some(world) if world.shared.mode.has_authority() => {
                world.shared.persistence.save_unsaved(&world.shared)
            }
            _ => 0,
        }
    }

    /// Stops the workers and writes every unsaved region.
    pub fn shutdown(&mut self) {
        let Some(mut world) = self.world.take() else {
            return;
        };
        world.pool.shutdown();
        if world.shared.mode.has_authority() {
            world.shared.persistence.save_unsaved(&world.shared);
        }
        self.last_columns.clear();
        for player in self.players.values_mut() {
            player.has_chunk_at_spawn = false;
        }
        info!("Terrain shut down");
    }

    pub fn stats(&self) -> WorldStats {
        let Some(world) = &self.world else {
            return WorldStats {
                tracked_players: self.players.len(),
                ..Default::default()
            };
        };
        let (loaded_regions, pending_load_regions, pending_save_regions) =
            world.shared.regions.counts();
        WorldStats {
            loaded_chunks: world.registry.len(),
            hidden_chunks: world.registry.hidden_count(),
            queued_for_destroy: world.registry.destroy_queue_len(),
            generated_columns: world.shared.columns.len(),
            loaded_regions,
            pending_load_regions,
            pending_save_regions,
            worker_count: world.pool.worker_count(),
            tracked_players: self.players.len(),
        }
    }
}

impl Drop for TerrainManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl World {
    fn apply_task(&mut self, task: MainThreadTask, events: &mut Vec<WorldEvent>, result: &mut TickResult) {
        match task {
            MainThreadTask::SpawnChunk(data) => {
                let cell = data.cell;
                let near_player = data.needs_collision;
                if self.registry.spawn(data) == SpawnOutcome::Spawned {
                    result.spawned += 1;
                    events.push(WorldEvent::ChunkSpawned { cell });
                    if near_player {
                        self.replicate(cell, events);
                    }
                }
            }
            MainThreadTask::DestroyColumn { column, z_indices } => {
                let mut cells: BTreeSet<ChunkCell> =
                    z_indices.into_iter().map(|z| column.with_z(z)).collect();
                cells.extend(self.registry.cells_in_column(column));
                for cell in cells {
                    self.registry.destroy_or_hide(cell);
                }
            }
            MainThreadTask::HideColumn { column } => {
                self.registry.hide_column(column);
            }
            MainThreadTask::UnhideColumn { column } => {
                self.registry.unhide_column(column);
            }
            MainThreadTask::RegionLoaded(region) => {
                events.push(WorldEvent::RegionLoaded { region });
            }
            MainThreadTask::RegenerateColumn { chunks, .. } => {
                for data in chunks {
                    let cell = data.cell;
                    if self.registry.contains(cell) {
                        continue;
                    }
                    let near_player = data.needs_collision;
                    if self.registry.spawn(data) == SpawnOutcome::Spawned {
                        result.spawned += 1;
                        events.push(WorldEvent::ChunkSpawned { cell });
                        if near_player {
                            self.replicate(cell, events);
                        }
                    }
                }
            }
        }
    }

    /// Builds collision for every chunk within the collision radius of a
    /// player, replicating them on a server.
    fn collision_sweep(&mut self, players: &[TrackedLocation], events: &mut Vec<WorldEvent>) {
        let search = SpiralSearch::new(self.shared.spec);
        let radius = self.shared.settings.collision_radius;
        let mut cells = BTreeSet::new();
        for player in players {
            let found = search.cells_in_radius(player.location, radius, |c| {
                self.shared.columns.z_indices(c)
            });
            cells.extend(found.found);
        }
        for cell in cells {
            if self.registry.enable_collision(cell) {
                self.replicate(cell, events);
            }
        }
    }

    fn replicate(&mut self, cell: ChunkCell, events: &mut Vec<WorldEvent>) {
        if !self.shared.mode.is_server() {
            return;
        }
        if let ReplicationChange::Enabled { count } = self.registry.enable_replication(cell) {
            events.push(WorldEvent::ChunkReplicated { cell, count });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use strata_voxel::{AIR, DESTROY_WHEN_UNNEEDED, HIDDEN, STONE};

    use crate::registry::NameOutcome;

    fn settings() -> TerrainSettings {
        TerrainSettings {
            voxel_count: 4,
            collision_radius: 1,
            chunk_deletion_buffer: 1,
            ..Default::default()
        }
    }

    fn config(mode: NetMode) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.network.mode = mode;
        config.generation.generation_radius = 2;
        config.generation.worker_threads = 1;
        config.generation.idle_sleep_ms = 2;
        config.generation.working_sleep_ms = 1;
        config.generation.spawn_throttle_cap_ms = 1;
        config.streaming.region_size_in_chunks = 8;
        config.streaming.region_buffer_size = 0;
        config.network.max_player_retries = 2;
        config
    }

    /// Ticks until `done` holds or 20 seconds pass.
    fn tick_until(manager: &mut TerrainManager, mut done: impl FnMut(&mut TerrainManager) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(20);
        while Instant::now() < deadline {
            manager.tick(Instant::now());
            if done(manager) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_calls_before_initialize_fail() {
        let mut manager = TerrainManager::new(config(NetMode::Standalone));
        assert!(matches!(
            manager.set_voxel(DVec3::ZERO, STONE),
            Err(WorldError::NotInitialized)
        ));
        assert!(matches!(
            manager.get_voxel(DVec3::ZERO),
            Err(WorldError::NotInitialized)
        ));
        assert_eq!(manager.tick(Instant::now()), TickResult::default());
        assert_eq!(manager.stats().worker_count, 0);
    }

    #[test]
    fn test_player_without_location_is_dropped() {
        let mut manager = TerrainManager::new(config(NetMode::Standalone));
        manager.initialize(settings()).unwrap();
        manager.add_tracked_player(PlayerId(4), true);
        for _ in 0..3 {
            manager.tick(Instant::now());
        }
        assert!(!manager.is_pending(PlayerId(4)));
        assert!(manager.is_player_frozen(PlayerId(4)));
        assert!(
            manager
                .drain_events()
                .contains(&WorldEvent::PlayerDropped { player: PlayerId(4) })
        );
    }

    #[test]
    fn test_player_is_admitted_and_unfrozen() {
        let mut manager = TerrainManager::new(config(NetMode::Standalone));
        manager.initialize(settings()).unwrap();
        manager.add_tracked_player(PlayerId(1), true);
        manager.update_player_location(PlayerId(1), DVec3::ZERO);
        assert!(manager.is_player_frozen(PlayerId(1)));

        assert!(tick_until(&mut manager, |m| !m.is_player_frozen(PlayerId(1))));
        let events = manager.drain_events();
        assert!(events.contains(&WorldEvent::PlayerAdmitted {
            player: PlayerId(1),
            local: true
        }));
        assert!(events.contains(&WorldEvent::PlayerMoved {
            player: PlayerId(1),
            column: Cell2D::new(0, 0)
        }));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, WorldEvent::ChunkSpawned { .. }))
        );

        let stats = manager.stats();
        assert!(stats.loaded_chunks > 0);
        assert_eq!(stats.worker_count, 1);
        assert_eq!(stats.tracked_players, 1);
    }

    #[test]
    fn test_set_and_get_voxel_through_manager() {
        let mut manager = TerrainManager::new(config(NetMode::Standalone));
        manager.initialize(settings()).unwrap();
        manager.add_tracked_player(PlayerId(1), true);
        manager.update_player_location(PlayerId(1), DVec3::ZERO);
        assert!(tick_until(&mut manager, |m| !m.is_player_frozen(PlayerId(1))));

        let cell = manager.registry().unwrap().cells().next().unwrap();
        let spec = manager.shared().unwrap().spec;
        let location = spec.voxel_world_location(cell, [1, 2, 2]);
        let before = manager.get_voxel(location).unwrap();
        let value = if before == AIR { STONE } else { AIR };

        let report = manager.set_voxel(location, value).unwrap();
        assert_eq!(report.previous, before);
        assert_eq!(manager.get_voxel(location).unwrap(), value);

        let far = DVec3::new(1.0e7, 0.0, 0.0);
        assert!(matches!(
            manager.get_voxel(far),
            Err(WorldError::Lookup(VoxelLookupError::ChunkMissing(_)))
        ));
    }

    #[test]
    fn test_generation_radius_never_below_collision_radius() {
        let mut manager = TerrainManager::new(config(NetMode::Standalone));
        assert_eq!(manager.set_generation_radius(0), 0);
        manager.initialize(settings()).unwrap();
        assert_eq!(manager.set_generation_radius(0), 1);
        assert_eq!(manager.set_generation_radius(6), 6);
        assert_eq!(manager.shared().unwrap().generation_radius(), 6);
    }

    #[test]
    fn test_server_replicates_chunks_near_players() {
        let mut manager = TerrainManager::new(config(NetMode::DedicatedServer));
        manager.initialize(settings()).unwrap();
        manager.add_tracked_player(PlayerId(2), false);
        manager.update_player_location(PlayerId(2), DVec3::ZERO);

        let mut replicated = Vec::new();
        let found = tick_until(&mut manager, |m| {
            replicated.extend(m.drain_events().into_iter().filter_map(|e| match e {
                WorldEvent::ChunkReplicated { cell, count } => Some((cell, count)),
                _ => None,
            }));
            !replicated.is_empty()
        });
        assert!(found);
        assert!(replicated.iter().all(|(_, count)| *count == 0));
        let (cell, _) = replicated[0];
        let registry = manager.registry().unwrap();
        assert_eq!(registry.spawn_count(cell), Some(0));
    }

    #[test]
    fn test_server_queues_region_send_for_remote_player() {
        let mut manager = TerrainManager::new(config(NetMode::DedicatedServer));
        manager.initialize(settings()).unwrap();
        manager.add_tracked_player(PlayerId(9), false);
        manager.update_player_location(PlayerId(9), DVec3::ZERO);

        let mut sends = Vec::new();
        assert!(tick_until(&mut manager, |m| {
            sends.extend(m.drain_events().into_iter().filter_map(|e| match e {
                WorldEvent::SendRegion { player, region } => Some((player, region)),
                _ => None,
            }));
            !sends.is_empty()
        }));
        assert_eq!(sends, vec![(PlayerId(9), RegionCoord::new(0, 0))]);
    }

    #[test]
    fn test_edits_survive_shutdown_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(NetMode::Standalone);
        config.persistence.save_root = Some(dir.path().to_path_buf());
        config.persistence.save_name = "world".to_string();

        let mut manager = TerrainManager::new(config);
        manager.create_world_save("world", &settings()).unwrap();
        assert_eq!(manager.list_saves(), vec!["world".to_string()]);
        assert!(matches!(
            manager.create_world_save("world", &settings()),
            Err(WorldError::Save(SaveError::AlreadyExists { .. }))
        ));

        manager.initialize(settings()).unwrap();
        manager.add_tracked_player(PlayerId(1), true);
        manager.update_player_location(PlayerId(1), DVec3::ZERO);
        assert!(tick_until(&mut manager, |m| !m.is_player_frozen(PlayerId(1))));

        let cell = manager.registry().unwrap().cells().next().unwrap();
        let spec = manager.shared().unwrap().spec;
        let location = spec.voxel_world_location(cell, [2, 2, 1]);
        let before = manager.get_voxel(location).unwrap();
        let value = if before == AIR { STONE } else { AIR };
        manager.set_voxel(location, value).unwrap();
        manager.shutdown();

        let region = spec.region_of_column(cell.column(), 8);
        let file = dir
            .path()
            .join("world")
            .join(crate::persistence::RegionFile::file_name(region));
        assert!(file.exists());

        manager.initialize(settings()).unwrap();
        assert!(tick_until(&mut manager, |m| m.get_voxel(location).ok() == Some(value)));

        manager.shutdown();
        manager.delete_save("world").unwrap();
        assert!(manager.list_saves().is_empty());
    }

    #[test]
    fn test_client_destroys_named_chunk_once_no_player_needs_it() {
        let mut manager = TerrainManager::new(config(NetMode::Client));
        manager.initialize(settings()).unwrap();
        let shared = Arc::clone(manager.shared().unwrap());
        for x in -3..=3 {
            for y in -3..=3 {
                shared.regions.mark_server_data(RegionCoord::new(x, y));
            }
        }
        let player = PlayerId(1);
        manager.add_tracked_player(player, true);
        manager.update_player_location(player, DVec3::ZERO);
        assert!(tick_until(&mut manager, |m| !m.is_player_frozen(player)));

        let cell = manager.registry().unwrap().cells_in_column(Cell2D::new(0, 0))[0];
        let registry = manager.registry_mut().unwrap();
        assert_eq!(registry.set_chunk_name(cell, 0), NameOutcome::Renamed);

        let far = 200.0 * shared.spec.chunk_size();
        manager.update_player_location(player, DVec3::new(far, far, 0.0));
        assert!(tick_until(&mut manager, |m| {
            m.registry()
                .and_then(|r| r.get(cell))
                .is_some_and(|live| live.chunk.has(DESTROY_WHEN_UNNEEDED))
        }));
        assert!(!shared.columns.contains(Cell2D::new(0, 0)));
        assert!(manager.registry().unwrap().get(cell).unwrap().chunk.has(HIDDEN));

        // The server still reports a player next to the chunk.
        manager.set_remote_columns(vec![Cell2D::new(1, 0)]);
        for _ in 0..10 {
            manager.tick(Instant::now());
        }
        assert!(manager.registry().unwrap().contains(cell));

        manager.set_remote_columns(vec![Cell2D::new(200, 200)]);
        assert!(tick_until(&mut manager, |m| !m.registry().unwrap().contains(cell)));
        assert!(
            manager
                .drain_events()
                .contains(&WorldEvent::ChunkDestroyed { cell })
        );
    }

    #[test]
    fn test_removed_player_is_no_longer_tracked() {
        let mut manager = TerrainManager::new(config(NetMode::Standalone));
        manager.initialize(settings()).unwrap();
        manager.add_tracked_player(PlayerId(1), true);
        manager.update_player_location(PlayerId(1), DVec3::ZERO);
        manager.tick(Instant::now());
        assert_eq!(manager.stats().tracked_players, 1);

        assert!(manager.remove_tracked_player(PlayerId(1)));
        assert!(!manager.remove_tracked_player(PlayerId(1)));
        assert!(manager.player(PlayerId(1)).is_none());
        assert_eq!(manager.stats().tracked_players, 0);
    }
}
