//! Background chunk workers.
//!
//! Each worker polls the tracked player locations, walks a spiral around
//! every player to find a column nobody has generated yet, builds that
//! column's chunks and hands them to the main thread. Every worker keeps
//! its own spiral ring state per player, so workers fan out around a player
//! independently and the column claims keep them off each other's columns.
//! Worker 0 also evicts columns that left every player's range and flushes
//! queued region loads and saves. Workers never touch live chunks;
//! everything goes through the [`MainThreadTask`] inbox drained by
//! [`WorkerPool::drain_tasks`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use glam::DVec2;
use rustc_hash::{FxHashMap, FxHashSet};
use strata_config::{EngineConfig, GenerationConfig, NetMode};
use strata_terrain::{GenerationPolicy, RingState, SpiralSearch};
use strata_voxel::{Cell2D, RegionCoord};
use tracing::{debug, error, info, trace};

use crate::construction::build_column;
use crate::shared::{PlayerId, TrackedLocation, TrackedSnapshot, WorldShared};
use crate::task::MainThreadTask;

/// Worker sleeps and pacing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerTiming {
    /// Sleep when there is nothing to generate.
    pub idle_sleep: Duration,
    /// Sleep after generating a column.
    pub working_sleep: Duration,
    /// Longest pause between two chunks of one column.
    pub spawn_throttle_cap: Duration,
}

impl WorkerTiming {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            idle_sleep: Duration::from_millis(config.idle_sleep_ms),
            working_sleep: Duration::from_millis(config.working_sleep_ms),
            spawn_throttle_cap: Duration::from_millis(config.spawn_throttle_cap_ms),
        }
    }
}

impl Default for WorkerTiming {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}

/// Worker threads to spawn on this machine.
pub fn auto_worker_count(config: &EngineConfig) -> usize {
    config.worker_count(num_cpus::get())
}

/// What one loop iteration achieved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing to do; sleep the idle interval.
    Idle,
    /// Generated something; sleep the working interval.
    Worked,
    /// Shutdown was requested.
    Stopped,
}

enum ColumnOutcome {
    Generated,
    Waiting,
    Exhausted,
    Stopped,
}

// ---------------------------------------------------------------------------
// ChunkWorker
// ---------------------------------------------------------------------------

/// One background generation loop.
pub struct ChunkWorker {
    index: usize,
    shared: Arc<WorldShared>,
    policy: Arc<dyn GenerationPolicy>,
    tasks: Sender<MainThreadTask>,
    running: Arc<AtomicBool>,
    timing: WorkerTiming,
    search: SpiralSearch,
    rings: FxHashMap<PlayerId, RingState>,
    last_grid: FxHashMap<PlayerId, DVec2>,
    radius_epoch: u64,
    hidden: FxHashSet<Cell2D>,
    next_player: usize,
}

impl ChunkWorker {
    pub fn new(
        index: usize,
        shared: Arc<WorldShared>,
        policy: Arc<dyn GenerationPolicy>,
        tasks: Sender<MainThreadTask>,
        running: Arc<AtomicBool>,
        timing: WorkerTiming,
    ) -> Self {
        let search = SpiralSearch::new(shared.spec);
        let radius_epoch = shared.radius_epoch();
        Self {
            index,
            shared,
            policy,
            tasks,
            running,
            timing,
            search,
            rings: FxHashMap::default(),
            last_grid: FxHashMap::default(),
            radius_epoch,
            hidden: FxHashSet::default(),
            next_player: 0,
        }
    }

    /// Loops until the running flag clears.
    pub fn run(mut self) {
        debug!("Chunk worker {} started", self.index);
        while self.running.load(Ordering::Relaxed) {
            let pause = match self.step() {
                StepOutcome::Idle => self.timing.idle_sleep,
                StepOutcome::Worked => self.timing.working_sleep,
                StepOutcome::Stopped => break,
            };
            std::thread::sleep(pause);
        }
        debug!("Chunk worker {} stopped", self.index);
    }

    /// One loop iteration.
    pub fn step(&mut self) -> StepOutcome {
        if !self.running.load(Ordering::Relaxed) {
            return StepOutcome::Stopped;
        }

        if let Some(column) = self.shared.take_regeneration() {
            return if self.regenerate(column) {
                StepOutcome::Worked
            } else {
                StepOutcome::Stopped
            };
        }

        let snapshot = self.shared.tracked.snapshot();
        if snapshot.players.is_empty() {
            return StepOutcome::Idle;
        }

        let radius = self.shared.generation_radius();
        let range_changed = self.sync_radius(radius);
        let moved = self.track_moves(&snapshot);

        if self.index == 0 {
            self.sweep(&snapshot, radius);
            if (moved || range_changed) && self.shared.mode != NetMode::Client {
                self.drain_regions();
            }
        }

        let count = snapshot.players.len();
        for i in 0..count {
            let slot = (self.next_player + i) % count;
            let player = snapshot.players[slot];
            match self.generate_next(&snapshot, &player, radius) {
                ColumnOutcome::Generated => {
                    self.next_player = (slot + 1) % count;
                    return StepOutcome::Worked;
                }
                ColumnOutcome::Waiting | ColumnOutcome::Exhausted => {}
                ColumnOutcome::Stopped => return StepOutcome::Stopped,
            }
        }
        StepOutcome::Idle
    }

    fn send(&self, task: MainThreadTask) {
        if self.tasks.send(task).is_err() {
            debug!("Main thread inbox closed; dropping task");
        }
    }

    fn sync_radius(&mut self, radius: i32) -> bool {
        let epoch = self.shared.radius_epoch();
        if epoch == self.radius_epoch {
            return false;
        }
        self.radius_epoch = epoch;
        for ring in self.rings.values_mut() {
            ring.clamp_to_radius(radius);
        }
        true
    }

    /// Rewinds the spiral of every player whose grid location changed.
    fn track_moves(&mut self, snapshot: &TrackedSnapshot) -> bool {
        let spec = self.shared.spec;
        let mut moved = false;
        for p in &snapshot.players {
            let grid = spec.chunk_grid_location(p.location);
            match self.last_grid.insert(p.player, grid) {
                Some(prev) if prev != grid => {
                    self.rings
                        .entry(p.player)
                        .or_default()
                        .apply_player_move(prev.distance(grid), spec.chunk_size());
                    moved = true;
                }
                Some(_) => {}
                None => moved = true,
            }
        }
        self.rings
            .retain(|id, _| snapshot.players.iter().any(|p| p.player == *id));
        self.last_grid
            .retain(|id, _| snapshot.players.iter().any(|p| p.player == *id));
        moved
    }

    /// Evicts columns nobody needs and, where chunks hide, hides or shows
    /// columns for the local player.
    fn sweep(&mut self, snapshot: &TrackedSnapshot, radius: i32) {
        let spec = self.shared.spec;
        let keep = radius + self.shared.settings.chunk_deletion_buffer;
        let local = if self.shared.mode.hides_chunks() {
            snapshot.local().copied()
        } else {
            None
        };

        for column in self.shared.columns.columns() {
            let at = spec.column_location(column);
            let needed = snapshot
                .players
                .iter()
                .any(|p| spec.in_range(p.location, at, keep))
                || snapshot
                    .remote_columns
                    .iter()
                    .any(|c| spec.in_range(spec.column_location(*c), at, keep));

            if !needed {
                if let Some(z_indices) = self.shared.columns.remove_column(column) {
                    self.shared.claims.release(column);
                    self.hidden.remove(&column);
                    trace!("Evicting column {column}");
                    self.send(MainThreadTask::DestroyColumn { column, z_indices });
                }
                continue;
            }

            let Some(local) = local else {
                continue;
            };
            if spec.in_range(local.location, at, radius) {
                if self.hidden.remove(&column) {
                    self.send(MainThreadTask::UnhideColumn { column });
                }
            } else if !spec.in_range(local.location, at, keep) && self.hidden.insert(column) {
                self.send(MainThreadTask::HideColumn { column });
            }
        }
    }

    /// Performs queued region loads and save-and-evicts.
    fn drain_regions(&self) {
        for region in self.shared.regions.take_pending_loads() {
            self.load(region);
        }
        let saved = self.shared.persistence.save_pending(&self.shared);
        if saved > 0 {
            debug!("Worker {} saved {saved} cells of unneeded regions", self.index);
        }
    }

    fn load(&self, region: RegionCoord) {
        let was_loaded = self.shared.regions.is_loaded(region);
        self.shared.persistence.load_region(&self.shared, region);
        if !was_loaded && self.shared.regions.is_loaded(region) {
            self.send(MainThreadTask::RegionLoaded(region));
        }
    }

    /// Whether columns of `region` may be generated. Loads it on demand
    /// where this process owns the saves.
    fn region_ready(&self, region: RegionCoord) -> bool {
        if self.shared.mode == NetMode::Client {
            return self.shared.regions.has_server_data(region);
        }
        if !self.shared.regions.is_loaded(region) {
            self.load(region);
        }
        self.shared.regions.is_loaded(region)
    }

    fn generate_next(
        &mut self,
        snapshot: &TrackedSnapshot,
        player: &TrackedLocation,
        radius: i32,
    ) -> ColumnOutcome {
        let shared = self.shared.clone();
        let report_existing = shared.mode.hides_chunks() && player.local;
        let mut state = self.rings.get(&player.player).copied().unwrap_or_default();
        let mut existing = Vec::new();

        let found = self.search.next_needed_column(
            &mut state,
            player.location,
            radius,
            |c| shared.claims.claim(c),
            |c| {
                if report_existing {
                    existing.push(c);
                }
            },
        );

        for column in existing {
            if self.hidden.remove(&column) {
                self.send(MainThreadTask::UnhideColumn { column });
            }
        }

        let Some(column) = found else {
            self.rings.insert(player.player, state);
            return ColumnOutcome::Exhausted;
        };

        if !self.region_ready(shared.region_of(column)) {
            shared.claims.release(column);
            state.angle_index = (state.angle_index - 1).max(0);
            self.rings.insert(player.player, state);
            return ColumnOutcome::Waiting;
        }
        self.rings.insert(player.player, state);

        if self.generate_column(column, snapshot) {
            ColumnOutcome::Generated
        } else {
            ColumnOutcome::Stopped
        }
    }

    fn in_collision_range(&self, column: Cell2D, snapshot: &TrackedSnapshot) -> bool {
        let spec = self.shared.spec;
        let at = spec.column_location(column);
        let radius = self.shared.settings.collision_radius;
        snapshot
            .players
            .iter()
            .any(|p| spec.in_range(p.location, at, radius))
    }

    /// Generates `column` and hands its chunks over. Returns `false` when
    /// cancelled.
    fn generate_column(&mut self, column: Cell2D, snapshot: &TrackedSnapshot) -> bool {
        let Some(heightmap) = self.policy.generate_heightmap(column, &self.running) else {
            self.shared.claims.release(column);
            return false;
        };
        let z_indices = self.shared.columns.merge(column, heightmap.z_indices());
        let forced = self.shared.columns.modified_z(column);
        let compress = !self.in_collision_range(column, snapshot);

        let chunks = build_column(
            self.policy.as_ref(),
            &heightmap,
            column,
            &z_indices,
            &forced,
            &self.shared.overlays,
            compress,
        );
        trace!("Worker {} built {} chunks for column {column}", self.index, chunks.len());
        self.hand_off(chunks.into_iter().map(MainThreadTask::SpawnChunk));
        true
    }

    /// Rebuilds a column after Z indices were added to it.
    fn regenerate(&mut self, column: Cell2D) -> bool {
        if !self.shared.columns.contains(column) {
            return true;
        }
        let Some(heightmap) = self.policy.generate_heightmap(column, &self.running) else {
            return false;
        };
        let snapshot = self.shared.tracked.snapshot();
        let z_indices = self.shared.columns.merge(column, heightmap.z_indices());
        let forced = self.shared.columns.modified_z(column);
        let chunks = build_column(
            self.policy.as_ref(),
            &heightmap,
            column,
            &z_indices,
            &forced,
            &self.shared.overlays,
            !self.in_collision_range(column, &snapshot),
        );
        debug!("Regenerated column {column} with {} chunks", chunks.len());
        self.send(MainThreadTask::RegenerateColumn { column, chunks });
        true
    }

    /// Sends tasks with a growing pause so one tall column does not land in
    /// a single frame.
    fn hand_off(&self, tasks: impl Iterator<Item = MainThreadTask>) {
        for (i, task) in tasks.enumerate() {
            if i > 0 {
                let pause = Duration::from_millis(i as u64).min(self.timing.spawn_throttle_cap);
                std::thread::sleep(pause);
            }
            self.send(task);
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

/// The running chunk workers and their main-thread inbox.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    tasks: Receiver<MainThreadTask>,
    shared: Arc<WorldShared>,
}

impl WorkerPool {
    /// Starts `count` workers (at least one), named `chunk-worker-{index}`.
    pub fn spawn(
        shared: Arc<WorldShared>,
        policy: Arc<dyn GenerationPolicy>,
        count: usize,
        timing: WorkerTiming,
    ) -> std::io::Result<Self> {
        let (sender, tasks) = unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let count = count.max(1);
        let mut handles = Vec::with_capacity(count);

        for index in 0..count {
            let worker = ChunkWorker::new(
                index,
                shared.clone(),
                policy.clone(),
                sender.clone(),
                running.clone(),
                timing,
            );
            let spawned = std::thread::Builder::new()
                .name(format!("chunk-worker-{index}"))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!("Failed to spawn chunk worker {index}: {e}");
                    running.store(false, Ordering::Relaxed);
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(e);
                }
            }
        }

        info!("Started {count} chunk workers");
        Ok(Self {
            handles,
            running,
            tasks,
            shared,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Everything the workers handed over since the last call. Call once per
    /// frame from the main thread.
    pub fn drain_tasks(&self) -> Vec<MainThreadTask> {
        let mut out = Vec::new();
        while let Ok(task) = self.tasks.try_recv() {
            out.push(task);
        }
        out
    }

    /// Changes the generation radius of every worker.
    pub fn set_generation_radius(&self, radius: i32) -> i32 {
        self.shared.set_generation_radius(radius)
    }

    /// Stops and joins every worker.
    pub fn shutdown(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.running.store(false, Ordering::Relaxed);
        for handle in self.handles.drain(..) {
            let name = handle.thread().name().unwrap_or("chunk-worker").to_string();
            if handle.join().is_err() {
                error!("Worker {name} panicked");
            }
        }
        info!("Chunk workers stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
