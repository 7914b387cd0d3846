//! State shared between the main thread and every chunk worker.
//!
//! Each registry guards its own data with its own lock, and no method holds
//! a lock while generating or doing I/O. Code that needs both the region
//! book and the overlay store acquires the region book first.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use dashmap::DashSet;
use glam::DVec2;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use strata_config::{NetMode, TerrainSettings};
use strata_voxel::{Cell2D, ChunkCell, GridSpec, OverlayStore, RegionCoord};

use crate::persistence::RegionPersistence;

/// Identifies a connected player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ColumnRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ColumnMaps {
    z_by_column: FxHashMap<Cell2D, BTreeSet<i32>>,
    modified_z: FxHashMap<Cell2D, BTreeSet<i32>>,
}

/// Which vertical chunk indices exist per column, plus the indices that
/// must exist because they hold edits.
#[derive(Default)]
pub struct ColumnRegistry {
    inner: Mutex<ColumnMaps>,
}

impl ColumnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Z indices registered for `column`, ascending.
    pub fn z_indices(&self, column: Cell2D) -> Option<Vec<i32>> {
        let maps = self.inner.lock();
        maps.z_by_column
            .get(&column)
            .map(|zs| zs.iter().copied().collect())
    }

    /// Whether `column` has been generated.
    pub fn contains(&self, column: Cell2D) -> bool {
        self.inner.lock().z_by_column.contains_key(&column)
    }

    /// Whether `cell`'s Z index is registered for its column.
    pub fn has_cell(&self, cell: ChunkCell) -> bool {
        self.inner
            .lock()
            .z_by_column
            .get(&cell.column())
            .is_some_and(|zs| zs.contains(&cell.z))
    }

    /// Unions `zs` with what is already known for `column`, including edited
    /// indices, stores the result and returns it ascending.
    pub fn merge(&self, column: Cell2D, zs: impl IntoIterator<Item = i32>) -> Vec<i32> {
        let mut maps = self.inner.lock();
        let modified: Vec<i32> = maps
            .modified_z
            .get(&column)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default();
        let entry = maps.z_by_column.entry(column).or_default();
        entry.extend(zs);
        entry.extend(modified);
        entry.iter().copied().collect()
    }

    /// Adds one Z index to an existing column. Returns `false` when the
    /// column is unknown or already has it.
    pub fn add_z(&self, column: Cell2D, z: i32) -> bool {
        let mut maps = self.inner.lock();
        match maps.z_by_column.get_mut(&column) {
            Some(zs) => zs.insert(z),
            None => false,
        }
    }

    /// Records that `cell` holds edits, so its column always spawns it.
    pub fn add_modified(&self, cell: ChunkCell) {
        self.inner
            .lock()
            .modified_z
            .entry(cell.column())
            .or_default()
            .insert(cell.z);
    }

    /// Edited Z indices for `column`, ascending.
    pub fn modified_z(&self, column: Cell2D) -> Vec<i32> {
        self.inner
            .lock()
            .modified_z
            .get(&column)
            .map(|zs| zs.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Forgets a generated column. Edited indices are kept.
    pub fn remove_column(&self, column: Cell2D) -> Option<Vec<i32>> {
        self.inner
            .lock()
            .z_by_column
            .remove(&column)
            .map(|zs| zs.into_iter().collect())
    }

    /// Every generated column.
    pub fn columns(&self) -> Vec<Cell2D> {
        self.inner.lock().z_by_column.keys().copied().collect()
    }

    /// Number of generated columns.
    pub fn len(&self) -> usize {
        self.inner.lock().z_by_column.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// HeightmapClaims
// ---------------------------------------------------------------------------

/// Columns some worker has taken responsibility for generating.
#[derive(Default)]
pub struct HeightmapClaims {
    claimed: DashSet<Cell2D>,
}

impl HeightmapClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `column`. Exactly one caller wins for an unclaimed column.
    pub fn claim(&self, column: Cell2D) -> bool {
        self.claimed.insert(column)
    }

    /// Releases a claim so the column can be generated again.
    pub fn release(&self, column: Cell2D) -> bool {
        self.claimed.remove(&column).is_some()
    }

    pub fn contains(&self, column: Cell2D) -> bool {
        self.claimed.contains(&column)
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// RegionBook
// ---------------------------------------------------------------------------

#[derive(Default, Debug)]
struct RegionSets {
    pending_load: BTreeSet<RegionCoord>,
    loading: FxHashSet<RegionCoord>,
    pending_save: BTreeSet<RegionCoord>,
    loaded: FxHashSet<RegionCoord>,
    changed_since_save: BTreeSet<RegionCoord>,
    has_server_data: FxHashSet<RegionCoord>,
}

/// Load and save state of every region.
#[derive(Default)]
pub struct RegionBook {
    inner: Mutex<RegionSets>,
}

impl RegionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `region` for loading unless it is already in memory.
    pub fn request_load(&self, region: RegionCoord) -> bool {
        let mut sets = self.inner.lock();
        if sets.loaded.contains(&region) || sets.loading.contains(&region) {
            return false;
        }
        sets.pending_load.insert(region)
    }

    /// Starts loading `region`. Returns `false` when it is already loaded or
    /// another thread is loading it.
    pub fn begin_load(&self, region: RegionCoord) -> bool {
        let mut sets = self.inner.lock();
        if sets.loaded.contains(&region) || !sets.loading.insert(region) {
            return false;
        }
        sets.pending_load.remove(&region);
        true
    }

    /// Marks a load as finished, whether or not a file existed.
    pub fn finish_load(&self, region: RegionCoord) {
        let mut sets = self.inner.lock();
        sets.loading.remove(&region);
        sets.pending_load.remove(&region);
        sets.loaded.insert(region);
    }

    /// Drains the pending-load queue.
    pub fn take_pending_loads(&self) -> Vec<RegionCoord> {
        std::mem::take(&mut self.inner.lock().pending_load)
            .into_iter()
            .collect()
    }

    pub fn is_pending_load(&self, region: RegionCoord) -> bool {
        self.inner.lock().pending_load.contains(&region)
    }

    pub fn is_loaded(&self, region: RegionCoord) -> bool {
        self.inner.lock().loaded.contains(&region)
    }

    /// Forgets that `region` is in memory.
    pub fn mark_unloaded(&self, region: RegionCoord) {
        self.inner.lock().loaded.remove(&region);
    }

    /// Queues `region` for a save-and-evict.
    pub fn request_save(&self, region: RegionCoord) {
        self.inner.lock().pending_save.insert(region);
    }

    /// Cancels a pending save-and-evict because the region is needed again.
    pub fn cancel_save(&self, region: RegionCoord) -> bool {
        self.inner.lock().pending_save.remove(&region)
    }

    /// Drains the pending-save queue.
    pub fn take_pending_saves(&self) -> Vec<RegionCoord> {
        std::mem::take(&mut self.inner.lock().pending_save)
            .into_iter()
            .collect()
    }

    pub fn is_pending_save(&self, region: RegionCoord) -> bool {
        self.inner.lock().pending_save.contains(&region)
    }

    /// Records an edit in `region`.
    pub fn mark_changed(&self, region: RegionCoord) {
        self.inner.lock().changed_since_save.insert(region);
    }

    /// Records that `region` was written to disk.
    pub fn mark_saved(&self, region: RegionCoord) {
        let mut sets = self.inner.lock();
        sets.changed_since_save.remove(&region);
        sets.pending_save.remove(&region);
    }

    /// Regions with unsaved edits or a pending save.
    pub fn unsaved(&self) -> Vec<RegionCoord> {
        let sets = self.inner.lock();
        sets.changed_since_save
            .union(&sets.pending_save)
            .copied()
            .collect()
    }

    /// Records that the server delivered `region`.
    pub fn mark_server_data(&self, region: RegionCoord) {
        let mut sets = self.inner.lock();
        sets.has_server_data.insert(region);
        sets.loaded.insert(region);
    }

    pub fn has_server_data(&self, region: RegionCoord) -> bool {
        self.inner.lock().has_server_data.contains(&region)
    }

    /// `(loaded, pending load, pending save)` counts.
    pub fn counts(&self) -> (usize, usize, usize) {
        let sets = self.inner.lock();
        (sets.loaded.len(), sets.pending_load.len(), sets.pending_save.len())
    }
}

// ---------------------------------------------------------------------------
// TrackedLocations
// ---------------------------------------------------------------------------

/// Where one player stands, as seen by the workers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackedLocation {
    pub player: PlayerId,
    /// 2D world location.
    pub location: DVec2,
    /// Whether this player is the one rendered by this process.
    pub local: bool,
}

/// Copy of the tracked players handed to workers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackedSnapshot {
    pub players: Vec<TrackedLocation>,
    /// Columns of players this process does not track itself.
    pub remote_columns: Vec<Cell2D>,
    /// Bumped on every publish.
    pub version: u64,
}

impl TrackedSnapshot {
    pub fn local(&self) -> Option<&TrackedLocation> {
        self.players.iter().find(|p| p.local)
    }
}

/// Tracked player locations. Written by the main thread, copied by workers.
#[derive(Default)]
pub struct TrackedLocations {
    inner: RwLock<TrackedSnapshot>,
}

impl TrackedLocations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the tracked players.
    pub fn publish(&self, players: Vec<TrackedLocation>) {
        let mut snapshot = self.inner.write();
        snapshot.players = players;
        snapshot.version += 1;
    }

    /// Replaces the columns of remote players.
    pub fn publish_remote_columns(&self, columns: Vec<Cell2D>) {
        let mut snapshot = self.inner.write();
        snapshot.remote_columns = columns;
        snapshot.version += 1;
    }

    /// Cheap copy for use outside the lock.
    pub fn snapshot(&self) -> TrackedSnapshot {
        self.inner.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.inner.read().version
    }
}

// ---------------------------------------------------------------------------
// WorldShared
// ---------------------------------------------------------------------------

/// Everything workers and the main thread see of one world.
pub struct WorldShared {
    pub spec: GridSpec,
    pub settings: TerrainSettings,
    pub mode: NetMode,
    pub region_size: i32,
    pub columns: ColumnRegistry,
    pub claims: HeightmapClaims,
    pub regions: RegionBook,
    pub overlays: Mutex<OverlayStore>,
    pub tracked: TrackedLocations,
    pub persistence: RegionPersistence,
    generation_radius: AtomicI32,
    radius_epoch: AtomicU64,
    regenerate: Mutex<Vec<Cell2D>>,
}

impl WorldShared {
    /// Creates the shared state of a world.
    pub fn new(
        settings: TerrainSettings,
        mode: NetMode,
        region_size: i32,
        generation_radius: i32,
        persistence: RegionPersistence,
    ) -> Self {
        let spec = GridSpec::new(f64::from(settings.voxel_size), settings.voxel_count);
        Self {
            spec,
            settings,
            mode,
            region_size,
            columns: ColumnRegistry::new(),
            claims: HeightmapClaims::new(),
            regions: RegionBook::new(),
            overlays: Mutex::new(OverlayStore::new(spec, region_size)),
            tracked: TrackedLocations::new(),
            persistence,
            generation_radius: AtomicI32::new(generation_radius.max(settings.collision_radius)),
            radius_epoch: AtomicU64::new(0),
            regenerate: Mutex::new(Vec::new()),
        }
    }

    /// Region holding a column.
    pub fn region_of(&self, column: Cell2D) -> RegionCoord {
        self.spec.region_of_column(column, self.region_size)
    }

    pub fn generation_radius(&self) -> i32 {
        self.generation_radius.load(Ordering::Relaxed)
    }

    /// Sets the radius, never below the collision radius. Returns the value
    /// applied.
    pub fn set_generation_radius(&self, radius: i32) -> i32 {
        let radius = radius.max(self.settings.collision_radius);
        self.generation_radius.store(radius, Ordering::Relaxed);
        self.radius_epoch.fetch_add(1, Ordering::Release);
        radius
    }

    /// Changes every time the radius is set.
    pub fn radius_epoch(&self) -> u64 {
        self.radius_epoch.load(Ordering::Acquire)
    }

    /// Asks a worker to generate `column` again.
    pub fn request_regeneration(&self, column: Cell2D) {
        let mut queue = self.regenerate.lock();
        if !queue.contains(&column) {
            queue.push(column);
        }
    }

    pub fn take_regeneration(&self) -> Option<Cell2D> {
        let mut queue = self.regenerate.lock();
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_merge_includes_modified_indices() {
        let columns = ColumnRegistry::new();
        let col = Cell2D::new(2, -1);
        columns.add_modified(col.with_z(5));
        assert_eq!(columns.merge(col, [0, 1]), vec![0, 1, 5]);
        assert_eq!(columns.merge(col, [-1]), vec![-1, 0, 1, 5]);
        assert!(columns.has_cell(col.with_z(5)));
    }

    #[test]
    fn test_remove_column_keeps_modified() {
        let columns = ColumnRegistry::new();
        let col = Cell2D::new(0, 0);
        columns.add_modified(col.with_z(3));
        columns.merge(col, [0]);
        assert_eq!(columns.remove_column(col), Some(vec![0, 3]));
        assert!(!columns.contains(col));
        assert_eq!(columns.modified_z(col), vec![3]);
        assert!(!columns.add_z(col, 1));
    }

    #[test]
    fn test_claim_is_exclusive_across_threads() {
        let claims = Arc::new(HeightmapClaims::new());
        let wins = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let claims = claims.clone();
                let wins = wins.clone();
                std::thread::spawn(move || {
                    for x in 0..100 {
                        if claims.claim(Cell2D::new(x, 0)) {
                            wins.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(wins.load(Ordering::Relaxed), 100);
        assert!(claims.release(Cell2D::new(4, 0)));
        assert!(claims.claim(Cell2D::new(4, 0)));
    }

    #[test]
    fn test_region_load_lifecycle() {
        let book = RegionBook::new();
        let r = RegionCoord::new(1, 2);
        assert!(book.request_load(r));
        assert!(book.is_pending_load(r));
        assert!(book.begin_load(r));
        assert!(!book.begin_load(r));
        assert!(!book.is_pending_load(r));
        book.finish_load(r);
        assert!(book.is_loaded(r));
        assert!(!book.request_load(r));
        assert!(!book.begin_load(r));
    }

    #[test]
    fn test_region_save_bookkeeping() {
        let book = RegionBook::new();
        let a = RegionCoord::new(0, 0);
        let b = RegionCoord::new(1, 0);
        book.mark_changed(a);
        book.request_save(b);
        let mut unsaved = book.unsaved();
        unsaved.sort();
        assert_eq!(unsaved, vec![a, b]);
        assert!(book.cancel_save(b));
        book.mark_saved(a);
        assert!(book.unsaved().is_empty());
    }

    #[test]
    fn test_tracked_snapshot_versions() {
        let tracked = TrackedLocations::new();
        assert_eq!(tracked.version(), 0);
        tracked.publish(vec![TrackedLocation {
            player: PlayerId(1),
            location: DVec2::new(10.0, 0.0),
            local: true,
        }]);
        tracked.publish_remote_columns(vec![Cell2D::new(9, 9)]);
        let snap = tracked.snapshot();
        assert_eq!(snap.version, 2);
        assert_eq!(snap.local().map(|p| p.player), Some(PlayerId(1)));
        assert_eq!(snap.remote_columns, vec![Cell2D::new(9, 9)]);
    }

    #[test]
    fn test_generation_radius_respects_collision_radius() {
        let shared = WorldShared::new(
            TerrainSettings::default(),
            NetMode::Standalone,
            50,
            16,
            RegionPersistence::disabled(),
        );
        let epoch = shared.radius_epoch();
        assert_eq!(shared.set_generation_radius(2), 5);
        assert_eq!(shared.generation_radius(), 5);
        assert_ne!(shared.radius_epoch(), epoch);
        assert_eq!(shared.set_generation_radius(9), 9);
    }

    #[test]
    fn test_regeneration_queue_dedupes() {
        let shared = WorldShared::new(
            TerrainSettings::default(),
            NetMode::Standalone,
            50,
            16,
            RegionPersistence::disabled(),
        );
        shared.request_regeneration(Cell2D::new(1, 1));
        shared.request_regeneration(Cell2D::new(1, 1));
        shared.request_regeneration(Cell2D::new(2, 1));
        assert_eq!(shared.take_regeneration(), Some(Cell2D::new(1, 1)));
        assert_eq!(shared.take_regeneration(), Some(Cell2D::new(2, 1)));
        assert_eq!(shared.take_regeneration(), None);
    }
}
