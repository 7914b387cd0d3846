//! Streaming a region's edited voxels from server to client.
//!
//! The server snapshots a region's overlays, splits them into bundles no
//! larger than the configured ceiling and staggers their delivery. The
//! client collects bundles per region until the last one arrives and then
//! merges the whole region at once.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use strata_config::NetworkConfig;
use strata_voxel::{Cell2D, ChunkCell, RegionCoord};
use strata_world::{PlayerId, WorldShared};
use tracing::{debug, error, warn};

/// Fixed per-entry overhead: the cell plus the length prefix.
const ENTRY_OVERHEAD: usize = 13;
/// Fixed per-bundle overhead: the region id.
const BUNDLE_OVERHEAD: usize = 8;

/// One cell's overlay, RLE-encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegionEntry {
    pub cell: ChunkCell,
    pub voxels: Vec<u8>,
}

impl RegionEntry {
    /// Bytes this entry adds to a bundle.
    pub fn size_in_bytes(&self) -> usize {
        self.voxels.len() + ENTRY_OVERHEAD
    }
}

/// A slice of one region's overlays.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegionDataBundle {
    pub region: RegionCoord,
    pub entries: Vec<RegionEntry>,
    /// Set on the final bundle of a region.
    pub is_last: bool,
}

impl RegionDataBundle {
    pub fn new(region: RegionCoord) -> Self {
        Self {
            region,
            entries: Vec::new(),
            is_last: false,
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        BUNDLE_OVERHEAD + self.entries.iter().map(RegionEntry::size_in_bytes).sum::<usize>()
    }
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// Snapshot of every overlay in `region`, sorted by cell.
pub fn region_entries(shared: &WorldShared, region: RegionCoord) -> Vec<RegionEntry> {
    shared
        .overlays
        .lock()
        .snapshot_region(region)
        .unwrap_or_default()
        .into_iter()
        .map(|(cell, voxels)| RegionEntry { cell, voxels })
        .collect()
}

/// Splits a region into bundles of at most `max_bytes`.
///
/// A region that fits goes out as a single bundle, and so does an empty one
/// so the client still learns it has everything. A bundle is closed when
/// adding the next entry would reach the ceiling. The final bundle is
/// flagged `is_last`.
pub fn split_region_bundles(
    region: RegionCoord,
    entries: Vec<RegionEntry>,
    max_bytes: usize,
) -> Vec<RegionDataBundle> {
    let mut bundles = Vec::new();
    let mut current = RegionDataBundle::new(region);
    for entry in entries {
        let size = entry.size_in_bytes();
        if size + BUNDLE_OVERHEAD > max_bytes {
            warn!(
                "Cell {} needs {size} bytes, more than the {max_bytes} byte bundle limit",
                entry.cell
            );
        }
        if !current.entries.is_empty() && current.size_in_bytes() + size >= max_bytes {
            bundles.push(std::mem::replace(&mut current, RegionDataBundle::new(region)));
        }
        current.entries.push(entry);
    }
    current.is_last = true;
    bundles.push(current);
    bundles
}

/// A bundle waiting for its delivery time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledBundle {
    pub player: PlayerId,
    pub bundle: RegionDataBundle,
    pub deliver_at: Instant,
}

/// Staggers bundle delivery so a large region does not burst the link.
///
/// Bundle `i` of a region is delivered `max(interval * i, min_delay)` after
/// it was scheduled.
#[derive(Debug)]
pub struct BundleScheduler {
    interval: Duration,
    min_delay: Duration,
    queue: Vec<ScheduledBundle>,
}

impl BundleScheduler {
    pub fn new(interval: Duration, min_delay: Duration) -> Self {
        Self {
            interval,
            min_delay,
            queue: Vec::new(),
        }
    }

    pub fn from_config(config: &NetworkConfig) -> Self {
        Self::new(
            Duration::from_secs_f64(config.bundle_send_interval_secs.max(0.0)),
            Duration::from_secs_f64(config.min_bundle_delay_secs.max(0.0)),
        )
    }

    /// Delay of the `index`-th bundle of a region.
    pub fn delay_for(&self, index: usize) -> Duration {
        let stagger = self.interval.saturating_mul(u32::try_from(index).unwrap_or(u32::MAX));
        stagger.max(self.min_delay)
    }

    /// Queues `bundles` for `player`. Returns how many were queued.
    pub fn schedule(&mut self, player: PlayerId, bundles: Vec<RegionDataBundle>, now: Instant) -> usize {
        let count = bundles.len();
        for (index, bundle) in bundles.into_iter().enumerate() {
            let deliver_at = now + self.delay_for(index);
            self.queue.push(ScheduledBundle {
                player,
                bundle,
                deliver_at,
            });
        }
        count
    }

    /// Removes and returns every bundle due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<ScheduledBundle> {
        let (mut due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.queue)
            .into_iter()
            .partition(|s| s.deliver_at <= now);
        self.queue = waiting;
        due.sort_by_key(|s| s.deliver_at);
        due
    }

    /// Drops everything queued for a player that left.
    pub fn cancel_player(&mut self, player: PlayerId) -> usize {
        let before = self.queue.len();
        self.queue.retain(|s| s.player != player);
        before - self.queue.len()
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Collects partial regions until their last bundle arrives.
#[derive(Debug, Default)]
pub struct RegionAccumulator {
    partial: FxHashMap<RegionCoord, Vec<RegionEntry>>,
}

impl RegionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a bundle. Returns the whole region once it is complete.
    pub fn receive(&mut self, bundle: RegionDataBundle) -> Option<RegionDataBundle> {
        let RegionDataBundle {
            region,
            entries,
            is_last,
        } = bundle;
        let collected = self.partial.entry(region).or_default();
        collected.extend(entries);
        if !is_last {
            debug!("Buffered part of region {region} ({} cells so far)", collected.len());
            return None;
        }
        let entries = self.partial.remove(&region).unwrap_or_default();
        Some(RegionDataBundle {
            region,
            entries,
            is_last: true,
        })
    }

    /// Regions with bundles received but not yet complete.
    pub fn pending_regions(&self) -> usize {
        self.partial.len()
    }
}

/// Merges a complete region from the server into the local world.
///
/// Every entry replaces the local overlay for its cell and pins its Z index
/// in the column registry. A column that was generated before the data
/// arrived is regenerated to pick up new cells. The region is then marked as
/// having server data, which lets workers generate inside it. Returns the
/// number of entries merged.
pub fn implement_region_data(shared: &WorldShared, bundle: &RegionDataBundle) -> usize {
    let mut merged = Vec::with_capacity(bundle.entries.len());
    {
        let mut overlays = shared.overlays.lock();
        for entry in &bundle.entries {
            match overlays.insert_encoded(entry.cell, &entry.voxels) {
                Ok(()) => merged.push(entry.cell),
                Err(e) => error!("Skipping region data for cell {}: {e}", entry.cell),
            }
        }
    }

    let mut regenerate: BTreeSet<Cell2D> = BTreeSet::new();
    for cell in &merged {
        shared.columns.add_modified(*cell);
        if shared.columns.add_z(cell.column(), cell.z) {
            regenerate.insert(cell.column());
        }
    }
    for column in regenerate {
        shared.request_regeneration(column);
    }

    shared.regions.mark_server_data(bundle.region);
    debug!("Region {} implemented with {} cells", bundle.region, merged.len());
    merged.len()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
