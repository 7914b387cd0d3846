//! Keeping chunk network identities identical on server and clients.
//!
//! The server gathers every chunk within the collision radius of a center
//! cell, gives each a network identity and sends the `(cell, spawn count)`
//! pairs a recipient does not have yet. Clients derive the same name from
//! the pair and rename their locally generated chunk to match.

use rustc_hash::{FxHashMap, FxHashSet};
use strata_config::NetworkConfig;
use strata_terrain::SpiralSearch;
use strata_voxel::ChunkCell;
use strata_world::{ChunkRegistry, NameOutcome, PlayerId, ReplicationChange, WorldShared};
use tracing::{debug, error};

use crate::messages::ChunkNameData;

/// Result of gathering names around a center cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameBuild {
    Ready(ChunkNameData),
    /// Columns in range have not been generated yet; try again later.
    Retry { missing_columns: usize },
    /// Columns stayed missing for too many attempts.
    GaveUp,
}

/// Name data per recipient, or why there is none yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameReplication {
    Sent(Vec<(PlayerId, ChunkNameData)>),
    Retry,
    GaveUp,
}

/// Server-side bookkeeping of which identities each player already has.
#[derive(Debug)]
pub struct ChunkNameReplicator {
    up_to_date: FxHashMap<PlayerId, FxHashSet<ChunkCell>>,
    ready: FxHashSet<PlayerId>,
    retries: FxHashMap<ChunkCell, u32>,
    max_retries: u32,
}

impl ChunkNameReplicator {
    pub fn new(max_retries: u32) -> Self {
        Self {
            up_to_date: FxHashMap::default(),
            ready: FxHashSet::default(),
            retries: FxHashMap::default(),
            max_retries,
        }
    }

    pub fn from_config(config: &NetworkConfig) -> Self {
        Self::new(config.ensure_names_max_retries)
    }

    pub fn add_player(&mut self, player: PlayerId) {
        self.up_to_date.entry(player).or_default();
    }

    pub fn remove_player(&mut self, player: PlayerId) {
        self.up_to_date.remove(&player);
        self.ready.remove(&player);
    }

    /// The player can take identities. Everything is sent again from scratch.
    pub fn mark_ready(&mut self, player: PlayerId) {
        self.ready.insert(player);
        self.up_to_date.entry(player).or_default().clear();
    }

    pub fn is_ready(&self, player: PlayerId) -> bool {
        self.ready.contains(&player)
    }

    /// Ready players, sorted.
    pub fn ready_players(&self) -> Vec<PlayerId> {
        let mut players: Vec<PlayerId> = self.ready.iter().copied().collect();
        players.sort();
        players
    }

    /// A cell got a new identity, so nobody has it up to date any more.
    pub fn invalidate(&mut self, cell: ChunkCell) {
        for cells in self.up_to_date.values_mut() {
            cells.remove(&cell);
        }
    }

    pub fn is_up_to_date(&self, player: PlayerId, cell: ChunkCell) -> bool {
        self.up_to_date
            .get(&player)
            .is_some_and(|cells| cells.contains(&cell))
    }

    /// Gathers the identity of every chunk within the collision radius of
    /// `center`, replicating chunks that have none yet.
    ///
    /// With `ensure_none_missing`, ungenerated columns in range make the
    /// build retry until the retry limit for this center is reached.
    pub fn build_name_data(
        &mut self,
        registry: &mut ChunkRegistry,
        shared: &WorldShared,
        center: ChunkCell,
        ensure_none_missing: bool,
    ) -> NameBuild {
        let search = SpiralSearch::new(shared.spec);
        let origin = shared.spec.location_from_cell(center).truncate();
        let mut found = search.cells_in_radius(origin, shared.settings.collision_radius, |c| {
            shared.columns.z_indices(c)
        });

        if ensure_none_missing && !found.missing_columns.is_empty() {
            let attempts = self.retries.entry(center).or_insert(0);
            *attempts += 1;
            if *attempts >= self.max_retries {
                error!(
                    "Gave up replicating names around {center}: {} columns still missing after {} attempts",
                    found.missing_columns.len(),
                    attempts
                );
                self.retries.remove(&center);
                return NameBuild::GaveUp;
            }
            debug!(
                "Names around {center} wait for {} columns (attempt {attempts})",
                found.missing_columns.len()
            );
            return NameBuild::Retry {
                missing_columns: found.missing_columns.len(),
            };
        }
        self.retries.remove(&center);

        found.found.sort();
        let mut data = ChunkNameData::new(center);
        for cell in found.found {
            match registry.enable_replication(cell) {
                ReplicationChange::Enabled { count } => {
                    self.invalidate(cell);
                    data.push(cell, count);
                }
                ReplicationChange::AlreadyReplicated => {
                    if let Some(count) = registry.spawn_count(cell) {
                        data.push(cell, count);
                    }
                }
                ReplicationChange::Missing => {}
            }
        }
        NameBuild::Ready(data)
    }

    /// The part of `data` that `player` does not have yet, recorded as sent.
    ///
    /// Players that are not ready get nothing.
    pub fn filter_for_recipient(&mut self, player: PlayerId, data: &ChunkNameData) -> Option<ChunkNameData> {
        if !self.ready.contains(&player) {
            return None;
        }
        let have = self.up_to_date.entry(player).or_default();
        let mut out = ChunkNameData::new(data.center);
        for (cell, count) in data.pairs() {
            if have.insert(cell) {
                out.push(cell, count);
            }
        }
        (!out.is_empty()).then_some(out)
    }

    /// Builds names around `center` and filters them for every recipient.
    pub fn replicate_chunk_names(
        &mut self,
        registry: &mut ChunkRegistry,
        shared: &WorldShared,
        center: ChunkCell,
        ensure_none_missing: bool,
        recipients: &[PlayerId],
    ) -> NameReplication {
        let data = match self.build_name_data(registry, shared, center, ensure_none_missing) {
            NameBuild::Ready(data) => data,
            NameBuild::Retry { .. } => return NameReplication::Retry,
            NameBuild::GaveUp => return NameReplication::GaveUp,
        };
        let sends = recipients
            .iter()
            .filter_map(|player| {
                self.filter_for_recipient(*player, &data)
                    .map(|filtered| (*player, filtered))
            })
            .collect();
        NameReplication::Sent(sends)
    }
}

/// What a client did with one [`ChunkNameData`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NameApplyReport {
    pub renamed: usize,
    pub deferred: usize,
    pub unchanged: usize,
    pub refused: usize,
}

/// Renames local chunks to their server identities.
///
/// Chunks that do not exist yet adopt their identity when they spawn.
pub fn apply_chunk_name_data(registry: &mut ChunkRegistry, data: &ChunkNameData) -> NameApplyReport {
    if data.cells.len() != data.counts.len() {
        error!(
            "Chunk name data around {} has {} cells but {} counts",
            data.center,
            data.cells.len(),
            data.counts.len()
        );
    }
    let mut report = NameApplyReport::default();
    for (cell, count) in data.pairs() {
        match registry.set_chunk_name(cell, count) {
            NameOutcome::Renamed => report.renamed += 1,
            NameOutcome::Deferred => report.deferred += 1,
            NameOutcome::Unchanged => report.unchanged += 1,
            NameOutcome::Refused => report.refused += 1,
        }
    }
    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use strata_config::NetMode;
    use strata_voxel::{REPLICATED, SAFE_TO_DESTROY, chunk_name};

    use crate::test_support::{registry, shared, spawn};

    #[test]
    fn test_missing_columns_retry_then_give_up() {
        let shared = shared(NetMode::DedicatedServer);
        let mut reg = registry(&shared);
        let mut names = ChunkNameReplicator::new(3);
        let center = ChunkCell::new(0, 0, 0);

        assert_eq!(
            names.build_name_data(&mut reg, &shared, center, true),
            NameBuild::Retry { missing_columns: 1 }
        );
        assert_eq!(
            names.build_name_data(&mut reg, &shared, center, true),
            NameBuild::Retry { missing_columns: 1 }
        );
        assert_eq!(
            names.build_name_data(&mut reg, &shared, center, true),
            NameBuild::GaveUp
        );
        // Without the guarantee the build goes ahead with what exists.
        assert_eq!(
            names.build_name_data(&mut reg, &shared, center, false),
            NameBuild::Ready(ChunkNameData::new(center))
        );
    }

    #[test]
    fn test_build_replicates_chunks_in_range() {
        let shared = shared(NetMode::DedicatedServer);
        let mut reg = registry(&shared);
        let center = ChunkCell::new(0, 0, 0);
        spawn(&mut reg, &shared, center);
        spawn(&mut reg, &shared, ChunkCell::new(0, 0, 1));
        let mut names = ChunkNameReplicator::new(3);

        let NameBuild::Ready(data) = names.build_name_data(&mut reg, &shared, center, true) else {
            panic!("expected name data");
        };
        assert_eq!(
            data.pairs().collect::<Vec<_>>(),
            vec![(ChunkCell::new(0, 0, 0), 0), (ChunkCell::new(0, 0, 1), 0)]
        );
        let live = reg.get(center).unwrap();
        assert!(live.chunk.has(REPLICATED));
        assert!(!live.chunk.has(SAFE_TO_DESTROY));
        assert_eq!(live.chunk.name(), chunk_name(center, 0));
    }

    #[test]
    fn test_recipient_gets_only_new_cells() {
        let shared = shared(NetMode::DedicatedServer);
        let mut reg = registry(&shared);
        let center = ChunkCell::new(0, 0, 0);
        spawn(&mut reg, &shared, center);
        let mut names = ChunkNameReplicator::new(3);
        names.add_player(PlayerId(1));
        names.add_player(PlayerId(2));
        names.mark_ready(PlayerId(1));

        let recipients = [PlayerId(1), PlayerId(2)];
        let first = names.replicate_chunk_names(&mut reg, &shared, center, true, &recipients);
        let NameReplication::Sent(sends) = first else {
            panic!("expected sends");
        };
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].0, PlayerId(1));
        assert!(names.is_up_to_date(PlayerId(1), center));

        let again = names.replicate_chunk_names(&mut reg, &shared, center, true, &recipients);
        assert_eq!(again, NameReplication::Sent(Vec::new()));

        // A fresh ready handshake resends everything.
        names.mark_ready(PlayerId(1));
        let NameReplication::Sent(sends) =
            names.replicate_chunk_names(&mut reg, &shared, center, true, &recipients)
        else {
            panic!("expected sends");
        };
        assert_eq!(sends.len(), 1);
    }

    #[test]
    fn test_new_identity_invalidates_every_player() {
        let mut names = ChunkNameReplicator::new(3);
        let cell = ChunkCell::new(4, 4, 0);
        names.mark_ready(PlayerId(1));
        names.mark_ready(PlayerId(2));
        let mut data = ChunkNameData::new(cell);
        data.push(cell, 0);
        assert!(names.filter_for_recipient(PlayerId(1), &data).is_some());
        assert!(names.filter_for_recipient(PlayerId(2), &data).is_some());

        names.invalidate(cell);
        assert!(!names.is_up_to_date(PlayerId(1), cell));
        assert!(!names.is_up_to_date(PlayerId(2), cell));

        names.remove_player(PlayerId(2));
        assert_eq!(names.ready_players(), vec![PlayerId(1)]);
    }

    #[test]
    fn test_client_applies_server_names() {
        let server = shared(NetMode::DedicatedServer);
        let mut server_reg = registry(&server);
        let client = shared(NetMode::Client);
        let mut client_reg = registry(&client);

        let cell = ChunkCell::new(0, 0, 0);
        let later = ChunkCell::new(0, 0, 1);
        spawn(&mut server_reg, &server, cell);
        spawn(&mut server_reg, &server, later);
        spawn(&mut client_reg, &client, cell);

        let mut names = ChunkNameReplicator::new(3);
        let NameBuild::Ready(data) = names.build_name_data(&mut server_reg, &server, cell, true) else {
            panic!("expected name data");
        };

        let report = apply_chunk_name_data(&mut client_reg, &data);
        assert_eq!(
            report,
            NameApplyReport {
                renamed: 1,
                deferred: 1,
                ..Default::default()
            }
        );
        assert_eq!(
            client_reg.get(cell).unwrap().chunk.name(),
            server_reg.get(cell).unwrap().chunk.name()
        );

        let report = apply_chunk_name_data(&mut client_reg, &data);
        assert_eq!(report.unchanged, 1);
    }
}
