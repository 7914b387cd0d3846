//! Main-thread owner of every live chunk.
//!
//! The registry spawns chunks handed over by workers, applies voxel edits
//! (propagating border voxels into face neighbors), decides between
//! destroying and hiding, spreads destruction over frames and keeps the
//! per-cell spawn counts that give replicated chunks their names.

use std::collections::VecDeque;
use std::sync::Arc;

use glam::DVec3;
use rustc_hash::{FxHashMap, FxHashSet};
use strata_mesh::ChunkMeshData;
use strata_terrain::GenerationPolicy;
use strata_voxel::{
    COLLISION_GENERATED, Cell2D, Chunk, ChunkCell, DESTROY_WHEN_UNNEEDED, GENERATION_FINISHED,
    HIDDEN, REPLICATED, SAFE_TO_DESTROY, UNMODIFIED, chunk_name,
};
use tracing::{debug, error, trace, warn};

use crate::construction::ChunkConstructionData;
use crate::shared::WorldShared;

/// Returned in place of a voxel value when the lookup fails.
pub const VOXEL_NOT_FOUND: i32 = -1;

/// Why a voxel could not be read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VoxelLookupError {
    #[error("no chunk at {0}")]
    ChunkMissing(ChunkCell),
    #[error("chunk {0} has no voxel data")]
    VoxelsEmpty(ChunkCell),
    #[error("location is outside chunk {0}")]
    IndexOutOfRange(ChunkCell),
    /// The value marks untouched entries in edit overlays.
    #[error("voxel value {0} is reserved")]
    ReservedValue(u8),
}

impl VoxelLookupError {
    /// The sentinel reported to callers that expect a plain integer.
    pub fn sentinel(&self) -> i32 {
        VOXEL_NOT_FOUND
    }
}

/// A spawned chunk with its current mesh.
#[derive(Debug)]
pub struct LiveChunk {
    pub chunk: Chunk,
    pub mesh: ChunkMeshData,
    /// Times the mesh and collision were rebuilt after spawning.
    pub mesh_builds: u32,
}

/// Result of a successful edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditReport {
    /// Chunk the edit targeted.
    pub cell: ChunkCell,
    /// Value before the edit.
    pub previous: u8,
    /// Every chunk whose voxels and mesh changed, target first.
    pub touched: Vec<ChunkCell>,
    /// Cells queued for generation because the edit needed room there.
    pub requested: Vec<ChunkCell>,
}

/// What [`ChunkRegistry::spawn`] did with a handed-over chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    Spawned,
    /// A chunk already lived at the cell and took the new data.
    Refreshed,
    /// The column was evicted while the chunk was in flight.
    Dropped,
}

/// What [`ChunkRegistry::destroy_or_hide`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalDecision {
    Queued,
    Hidden,
    Missing,
}

/// Result of [`ChunkRegistry::enable_replication`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationChange {
    /// The chunk got a fresh identity with this spawn count.
    Enabled { count: i32 },
    AlreadyReplicated,
    Missing,
}

/// Result of [`ChunkRegistry::set_chunk_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameOutcome {
    Renamed,
    /// The chunk already had that name.
    Unchanged,
    /// The name was used before in this session.
    Refused,
    /// No chunk yet; it adopts the name when it spawns.
    Deferred,
}

// ---------------------------------------------------------------------------
// ChunkRegistry
// ---------------------------------------------------------------------------

/// Cell to live chunk map. Main thread only.
pub struct ChunkRegistry {
    shared: Arc<WorldShared>,
    policy: Arc<dyn GenerationPolicy>,
    chunks: FxHashMap<ChunkCell, LiveChunk>,
    spawn_counts: FxHashMap<ChunkCell, i32>,
    expected_counts: FxHashMap<ChunkCell, i32>,
    used_names: FxHashSet<String>,
    destroy_queue: VecDeque<ChunkCell>,
    queued: FxHashSet<ChunkCell>,
    destroy_per_frame: usize,
    adjacent_voxel_buffer: i32,
}

impl ChunkRegistry {
    pub fn new(
        shared: Arc<WorldShared>,
        policy: Arc<dyn GenerationPolicy>,
        destroy_per_frame: usize,
        adjacent_voxel_buffer: i32,
    ) -> Self {
        Self {
            shared,
            policy,
            chunks: FxHashMap::default(),
            spawn_counts: FxHashMap::default(),
            expected_counts: FxHashMap::default(),
            used_names: FxHashSet::default(),
            destroy_queue: VecDeque::new(),
            queued: FxHashSet::default(),
            destroy_per_frame: destroy_per_frame.max(1),
            adjacent_voxel_buffer,
        }
    }

    pub fn shared(&self) -> &Arc<WorldShared> {
        &self.shared
    }

    pub fn get(&self, cell: ChunkCell) -> Option<&LiveChunk> {
        self.chunks.get(&cell)
    }

    pub fn contains(&self, cell: ChunkCell) -> bool {
        self.chunks.contains_key(&cell)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Every live cell.
    pub fn cells(&self) -> impl Iterator<Item = ChunkCell> + '_ {
        self.chunks.keys().copied()
    }

    /// Number of hidden chunks.
    pub fn hidden_count(&self) -> usize {
        self.chunks.values().filter(|c| c.chunk.has(HIDDEN)).count()
    }

    /// Chunks waiting in the destroy queue.
    pub fn destroy_queue_len(&self) -> usize {
        self.queued.len()
    }

    /// Spawn count last used for `cell`.
    pub fn spawn_count(&self, cell: ChunkCell) -> Option<i32> {
        self.spawn_counts.get(&cell).copied()
    }

    /// Live cells of one column.
    pub fn cells_in_column(&self, column: Cell2D) -> Vec<ChunkCell> {
        let mut cells: Vec<ChunkCell> = self
            .chunks
            .keys()
            .filter(|c| c.column() == column)
            .copied()
            .collect();
        cells.sort();
        cells
    }

    /// Whether any chunk lives in `column`.
    pub fn column_has_chunk(&self, column: Cell2D) -> bool {
        self.chunks.keys().any(|c| c.column() == column)
    }

    // --- Spawning ---

    /// Takes ownership of a chunk built by a worker.
    pub fn spawn(&mut self, data: ChunkConstructionData) -> SpawnOutcome {
        let cell = data.cell;
        if !self.shared.columns.has_cell(cell) {
            debug!("Dropping chunk {cell}; its column was evicted");
            return SpawnOutcome::Dropped;
        }
        self.cancel_destroy(cell);

        if let Some(live) = self.chunks.get_mut(&cell) {
            live.chunk.replace_voxels(data.voxels);
            live.mesh = data.mesh;
            live.mesh_builds += 1;
            live.chunk.clear_flag(HIDDEN | DESTROY_WHEN_UNNEEDED);
            live.chunk.set_flag(GENERATION_FINISHED);
            live.chunk.assign_flag(COLLISION_GENERATED, data.needs_collision);
            return SpawnOutcome::Refreshed;
        }

        let mut chunk = Chunk::new(cell, data.voxels);
        chunk.set_flag(GENERATION_FINISHED);
        chunk.assign_flag(COLLISION_GENERATED, data.needs_collision);
        self.chunks.insert(
            cell,
            LiveChunk {
                chunk,
                mesh: data.mesh,
                mesh_builds: 0,
            },
        );
        if let Some(count) = self.expected_counts.remove(&cell) {
            self.set_chunk_name(cell, count);
        }
        SpawnOutcome::Spawned
    }

    // --- Voxel access ---

    /// Voxel value at a world location inside `cell`.
    pub fn get_voxel(&mut self, location: DVec3, cell: ChunkCell) -> Result<u8, VoxelLookupError> {
        let spec = self.shared.spec;
        let live = self
            .chunks
            .get_mut(&cell)
            .ok_or(VoxelLookupError::ChunkMissing(cell))?;
        if live.chunk.voxels().is_empty() {
            return Err(VoxelLookupError::VoxelsEmpty(cell));
        }
        let (index, _) = spec
            .voxel_index_for_location(cell, location)
            .ok_or(VoxelLookupError::IndexOutOfRange(cell))?;
        live.chunk
            .get(&spec, index)
            .ok_or(VoxelLookupError::IndexOutOfRange(cell))
    }

    /// Sets the voxel at a world location inside `cell`.
    ///
    /// The edit is recorded in the region overlay and the chunk's mesh and
    /// collision are rebuilt even when the value does not change. With
    /// `propagate`, border voxels are written into the face neighbors that
    /// duplicate them. With `check_missing`, cells around the edit that have
    /// no chunk are queued for generation.
    pub fn set_voxel(
        &mut self,
        location: DVec3,
        value: u8,
        cell: ChunkCell,
        propagate: bool,
        check_missing: bool,
    ) -> Result<EditReport, VoxelLookupError> {
        let spec = self.shared.spec;
        if value == UNMODIFIED {
            warn!("Cannot set voxel to reserved value {value}");
            return Err(VoxelLookupError::ReservedValue(value));
        }
        if !self.chunks.contains_key(&cell) {
            warn!("Cannot set voxel: no chunk at {cell}");
            return Err(VoxelLookupError::ChunkMissing(cell));
        }
        let (index, pos) = spec
            .voxel_index_for_location(cell, location)
            .ok_or(VoxelLookupError::IndexOutOfRange(cell))?;
        let previous = self.write_voxel(cell, index, value)?;
        let mut touched = vec![cell];

        if propagate {
            for [dx, dy, dz] in spec.border_offsets(pos) {
                let neighbor = cell.offset(dx, dy, dz);
                let Some((n_index, _)) = spec.voxel_index_for_location(neighbor, location) else {
                    continue;
                };
                if self.chunks.contains_key(&neighbor) {
                    if self.write_voxel(neighbor, n_index, value).is_ok() {
                        touched.push(neighbor);
                    }
                } else {
                    self.record_edit(neighbor, n_index, value);
                }
            }
        }

        let requested = if check_missing {
            self.request_missing_around(location)
        } else {
            Vec::new()
        };

        Ok(EditReport {
            cell,
            previous,
            touched,
            requested,
        })
    }

    /// Writes one voxel, rebuilds the mesh and records the edit. Returns the
    /// previous value.
    fn write_voxel(&mut self, cell: ChunkCell, index: usize, value: u8) -> Result<u8, VoxelLookupError> {
        let spec = self.shared.spec;
        let live = self
            .chunks
            .get_mut(&cell)
            .ok_or(VoxelLookupError::ChunkMissing(cell))?;
        if live.chunk.voxels().is_empty() {
            warn!("Cannot set voxel: chunk {cell} has no voxels");
            return Err(VoxelLookupError::VoxelsEmpty(cell));
        }
        let previous = live
            .chunk
            .get(&spec, index)
            .ok_or(VoxelLookupError::IndexOutOfRange(cell))?;
        if !live.chunk.set(&spec, index, value) {
            return Err(VoxelLookupError::IndexOutOfRange(cell));
        }

        if let Some(voxels) = live.chunk.voxels().as_slice() {
            let mesh = self.policy.generate_mesh(voxels);
            live.mesh = mesh;
            live.mesh_builds += 1;
        }
        if live.chunk.has(GENERATION_FINISHED) {
            live.chunk.set_flag(COLLISION_GENERATED);
        }

        self.record_edit(cell, index, value);
        Ok(previous)
    }

    fn record_edit(&self, cell: ChunkCell, index: usize, value: u8) {
        let region = self.shared.overlays.lock().record(cell, index, value);
        self.shared.regions.mark_changed(region);
        self.shared.columns.add_modified(cell);
    }

    /// Queues generation of cells within the adjacent voxel buffer of
    /// `location` that have a generated column but no chunk.
    fn request_missing_around(&self, location: DVec3) -> Vec<ChunkCell> {
        let spec = self.shared.spec;
        let b = self.adjacent_voxel_buffer.max(0);
        let mut out = Vec::new();

        for dx in -b..=b {
            for dy in -b..=b {
                for dz in -b..=b {
                    let offset = DVec3::new(f64::from(dx), f64::from(dy), f64::from(dz));
                    let cell = spec.cell_from_location(location + offset * spec.voxel_size);
                    if out.contains(&cell) || self.chunks.contains_key(&cell) {
                        continue;
                    }
                    let column = cell.column();
                    if !self.shared.columns.contains(column) {
                        continue;
                    }
                    self.shared.columns.add_z(column, cell.z);
                    self.shared.columns.add_modified(cell);
                    self.shared.request_regeneration(column);
                    trace!("Requested missing chunk {cell}");
                    out.push(cell);
                }
            }
        }
        out
    }

    // --- Visibility and destruction ---

    /// Removes a chunk that left range: queued for destruction, or hidden
    /// when a server still needs its identity.
    pub fn destroy_or_hide(&mut self, cell: ChunkCell) -> RemovalDecision {
        let is_server = self.shared.mode.is_server();
        let Some(live) = self.chunks.get_mut(&cell) else {
            return RemovalDecision::Missing;
        };
        if !is_server && !live.chunk.has(SAFE_TO_DESTROY) {
            live.chunk.set_flag(HIDDEN | DESTROY_WHEN_UNNEEDED);
            return RemovalDecision::Hidden;
        }
        self.queue_destroy(cell);
        RemovalDecision::Queued
    }

    /// Hides a chunk without destroying it.
    pub fn hide(&mut self, cell: ChunkCell) -> bool {
        match self.chunks.get_mut(&cell) {
            Some(live) => {
                live.chunk.set_flag(HIDDEN);
                true
            }
            None => false,
        }
    }

    /// Shows a hidden chunk and cancels any pending destruction.
    pub fn unhide(&mut self, cell: ChunkCell) -> bool {
        let Some(live) = self.chunks.get_mut(&cell) else {
            return false;
        };
        live.chunk.clear_flag(HIDDEN | DESTROY_WHEN_UNNEEDED);
        self.cancel_destroy(cell);
        true
    }

    /// Hides every chunk of a column. Returns the number hidden.
    pub fn hide_column(&mut self, column: Cell2D) -> usize {
        self.cells_in_column(column)
            .into_iter()
            .filter(|c| self.hide(*c))
            .count()
    }

    /// Shows every chunk of a column. Returns the number shown.
    pub fn unhide_column(&mut self, column: Cell2D) -> usize {
        self.cells_in_column(column)
            .into_iter()
            .filter(|c| self.unhide(*c))
            .count()
    }

    fn queue_destroy(&mut self, cell: ChunkCell) {
        if self.queued.insert(cell) {
            self.destroy_queue.push_back(cell);
        }
    }

    fn cancel_destroy(&mut self, cell: ChunkCell) {
        self.queued.remove(&cell);
    }

    /// Destroys up to the per-frame budget of queued chunks.
    pub fn process_destroy_queue(&mut self) -> Vec<ChunkCell> {
        let drop_identity = !self.shared.mode.is_server();
        let mut destroyed = Vec::new();
        while destroyed.len() < self.destroy_per_frame {
            let Some(cell) = self.destroy_queue.pop_front() else {
                break;
            };
            if !self.queued.remove(&cell) {
                continue;
            }
            if self.chunks.remove(&cell).is_some() {
                if drop_identity {
                    self.spawn_counts.remove(&cell);
                    self.expected_counts.remove(&cell);
                }
                destroyed.push(cell);
            }
        }
        if !destroyed.is_empty() {
            trace!("Destroyed {} chunks", destroyed.len());
        }
        destroyed
    }

    // --- Collision and replication ---

    /// Expands a chunk's voxels and marks its collision built.
    pub fn enable_collision(&mut self, cell: ChunkCell) -> bool {
        let spec = self.shared.spec;
        let Some(live) = self.chunks.get_mut(&cell) else {
            return false;
        };
        if !live.chunk.ensure_decompressed(&spec) {
            return false;
        }
        if live.chunk.has(GENERATION_FINISHED) {
            live.chunk.set_flag(COLLISION_GENERATED);
        }
        true
    }

    /// Gives a chunk a network identity on the server.
    ///
    /// The spawn count starts at 0 and grows each time the same cell needs
    /// a new identity.
    pub fn enable_replication(&mut self, cell: ChunkCell) -> ReplicationChange {
        let Some(live) = self.chunks.get_mut(&cell) else {
            return ReplicationChange::Missing;
        };
        if live.chunk.has(REPLICATED) {
            return ReplicationChange::AlreadyReplicated;
        }
        let count = *self
            .spawn_counts
            .entry(cell)
            .and_modify(|c| *c += 1)
            .or_insert(0);
        live.chunk.set_name(chunk_name(cell, count));
        live.chunk.set_flag(REPLICATED);
        live.chunk.clear_flag(SAFE_TO_DESTROY);
        ReplicationChange::Enabled { count }
    }

    /// Applies a server-assigned identity on a client.
    pub fn set_chunk_name(&mut self, cell: ChunkCell, count: i32) -> NameOutcome {
        let name = chunk_name(cell, count);
        let Some(live) = self.chunks.get_mut(&cell) else {
            self.expected_counts.insert(cell, count);
            return NameOutcome::Deferred;
        };
        if live.chunk.has(REPLICATED) && live.chunk.name() == name {
            warn!("Chunk {cell} is already named {name}");
            return NameOutcome::Unchanged;
        }
        if self.used_names.contains(&name) {
            error!("Refusing to reuse chunk name {name}");
            return NameOutcome::Refused;
        }
        live.chunk.set_name(name.clone());
        live.chunk.set_flag(REPLICATED);
        live.chunk.clear_flag(SAFE_TO_DESTROY | DESTROY_WHEN_UNNEEDED);
        self.used_names.insert(name);
        self.spawn_counts.insert(cell, count);
        self.cancel_destroy(cell);
        NameOutcome::Renamed
    }

    /// Tells a client whether the server still needs a chunk. Hidden chunks
    /// waiting for this are queued for destruction.
    pub fn mark_safe_to_destroy(&mut self, cell: ChunkCell, safe: bool) -> bool {
        let Some(live) = self.chunks.get_mut(&cell) else {
            return false;
        };
        live.chunk.assign_flag(SAFE_TO_DESTROY, safe);
        if safe && live.chunk.has(DESTROY_WHEN_UNNEEDED) {
            self.queue_destroy(cell);
        }
        true
    }

    /// Recomputes the safe flag of every chunk from the server's player
    /// columns. A chunk is safe once no player column lies within `radius`
    /// chunks of it. Returns the number of hidden chunks newly queued.
    pub fn update_safe_to_destroy(&mut self, columns: &[Cell2D], radius: i32) -> usize {
        let spec = self.shared.spec;
        let cells: Vec<ChunkCell> = self.chunks.keys().copied().collect();
        let queued_before = self.queued.len();
        for cell in cells {
            let at = spec.column_location(cell.column());
            let needed = columns
                .iter()
                .any(|c| spec.in_range(at, spec.column_location(*c), radius));
            self.mark_safe_to_destroy(cell, !needed);
        }
        let queued = self.queued.len().saturating_sub(queued_before);
        if queued > 0 {
            debug!("{queued} hidden chunks are no longer needed by the server");
        }
        queued
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
