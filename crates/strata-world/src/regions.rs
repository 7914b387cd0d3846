//! Which regions each player needs.
//!
//! A player needs the region holding its column plus a ring of
//! `region_buffer_size` regions around it. Regions entering that set are
//! queued for loading; regions no player needs any more are queued for a
//! save-and-evict that worker 0 carries out.

use std::collections::BTreeSet;

use rustc_hash::{FxHashMap, FxHashSet};
use strata_voxel::{Cell2D, RegionCoord};
use tracing::trace;

use crate::shared::{PlayerId, WorldShared};

/// What one [`RegionTracker::update`] changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegionUpdate {
    /// Regions the player did not need before.
    pub entered: Vec<RegionCoord>,
    /// Regions nobody needs any more.
    pub released: Vec<RegionCoord>,
}

/// Per-player needed regions and, on a server, regions still to be sent.
#[derive(Debug)]
pub struct RegionTracker {
    buffer: i32,
    needed: FxHashMap<PlayerId, FxHashSet<RegionCoord>>,
    pending_sends: FxHashMap<PlayerId, BTreeSet<RegionCoord>>,
}

impl RegionTracker {
    pub fn new(region_buffer_size: i32) -> Self {
        Self {
            buffer: region_buffer_size.max(0),
            needed: FxHashMap::default(),
            pending_sends: FxHashMap::default(),
        }
    }

    /// Regions within the buffer ring around `column`'s region.
    pub fn regions_around(&self, shared: &WorldShared, column: Cell2D) -> FxHashSet<RegionCoord> {
        let center = shared.region_of(column);
        let b = self.buffer;
        let mut out = FxHashSet::default();
        for dx in -b..=b {
            for dy in -b..=b {
                out.insert(RegionCoord::new(center.x + dx, center.y + dy));
            }
        }
        out
    }

    /// Whether any player needs `region`.
    pub fn is_needed(&self, region: RegionCoord) -> bool {
        self.needed.values().any(|set| set.contains(&region))
    }

    pub fn needed_by(&self, player: PlayerId) -> Vec<RegionCoord> {
        let mut regions: Vec<RegionCoord> = self
            .needed
            .get(&player)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        regions.sort();
        regions
    }

    /// Recomputes the regions `player` needs after moving to `column`.
    ///
    /// With `replicate`, entering regions are queued for sending to the
    /// player once loaded.
    pub fn update(
        &mut self,
        shared: &WorldShared,
        player: PlayerId,
        column: Cell2D,
        replicate: bool,
    ) -> RegionUpdate {
        let wanted = self.regions_around(shared, column);
        let previous = self.needed.insert(player, wanted.clone()).unwrap_or_default();
        let authority = shared.mode.has_authority();

        let mut entered: Vec<RegionCoord> = wanted.difference(&previous).copied().collect();
        entered.sort();
        for region in &entered {
            if authority {
                shared.regions.cancel_save(*region);
                if !shared.regions.is_loaded(*region) {
                    shared.regions.request_load(*region);
                }
            }
            if replicate {
                self.pending_sends.entry(player).or_default().insert(*region);
            }
        }

        let mut left: Vec<RegionCoord> = previous.difference(&wanted).copied().collect();
        left.sort();
        if let Some(sends) = self.pending_sends.get_mut(&player) {
            for region in &left {
                sends.remove(region);
            }
        }
        let released = self.release(shared, left);

        if !entered.is_empty() {
            trace!("{player} entered {} regions", entered.len());
        }
        RegionUpdate { entered, released }
    }

    /// Forgets a player. Returns the regions nobody needs any more.
    pub fn remove_player(&mut self, shared: &WorldShared, player: PlayerId) -> Vec<RegionCoord> {
        self.pending_sends.remove(&player);
        let Some(previous) = self.needed.remove(&player) else {
            return Vec::new();
        };
        let mut left: Vec<RegionCoord> = previous.into_iter().collect();
        left.sort();
        self.release(shared, left)
    }

    fn release(&self, shared: &WorldShared, candidates: Vec<RegionCoord>) -> Vec<RegionCoord> {
        let authority = shared.mode.has_authority();
        candidates
            .into_iter()
            .filter(|region| !self.is_needed(*region))
            .inspect(|region| {
                if authority {
                    shared.regions.request_save(*region);
                }
            })
            .collect()
    }

    /// Queues `region` for sending to `player` again.
    pub fn resend(&mut self, player: PlayerId, region: RegionCoord) {
        self.pending_sends.entry(player).or_default().insert(region);
    }

    /// Pending sends whose region is now in memory, removed from the queue.
    pub fn take_ready_sends(&mut self, shared: &WorldShared) -> Vec<(PlayerId, RegionCoord)> {
        let mut ready = Vec::new();
        for (player, sends) in &mut self.pending_sends {
            sends.retain(|region| {
                if shared.regions.is_loaded(*region) {
                    ready.push((*player, *region));
                    false
                } else {
                    true
                }
            });
        }
        ready.sort();
        ready
    }

    pub fn pending_send_count(&self) -> usize {
        self.pending_sends.values().map(BTreeSet::len).sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
