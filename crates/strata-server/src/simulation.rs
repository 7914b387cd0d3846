//! Headless simulation: scripted players walking outward through the world.
//!
//! Standalone runs drive a [`TerrainManager`] directly. Server runs wrap it
//! in a [`ServerSession`] with every scripted player connected as a remote
//! client; the messages a transport would carry are counted and dropped.

use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::time::{Duration, Instant};

use glam::DVec3;
use strata_config::{EngineConfig, NetMode, TerrainSettings};
use strata_multiplayer::{EditOutcome, NoOccupancy, Outbound, ServerSession};
use strata_voxel::STONE;
use strata_world::{PlayerId, TerrainManager, WorldError, WorldStats};
use tracing::{debug, info};

/// Frames between stats lines.
const STATS_EVERY: u32 = 60;
/// Frames between scripted edits.
const EDIT_EVERY: u32 = 120;
/// Fraction of a chunk a player walks per frame.
const STEP_PER_FRAME: f64 = 0.05;

/// Errors that end a simulation run.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error(transparent)]
    World(#[from] WorldError),
    #[error("a client needs a server to connect to; run as standalone, dedicated or listen")]
    ClientMode,
}

/// How long and with how many players to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub frames: u32,
    pub players: u32,
    pub tick: Duration,
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u32,
    pub edits: u32,
    /// Messages per kind a transport would have carried.
    pub messages: BTreeMap<&'static str, usize>,
    pub stats: WorldStats,
}

/// Where scripted player `index` of `count` stands on `frame`.
pub fn scripted_location(index: u32, count: u32, frame: u32, chunk_size: f64) -> DVec3 {
    let angle = TAU * f64::from(index) / f64::from(count.max(1));
    let distance = f64::from(frame) * STEP_PER_FRAME * chunk_size;
    DVec3::new(angle.cos() * distance, angle.sin() * distance, 0.0)
}

/// Runs a world for `options.frames` ticks.
pub fn run(config: EngineConfig, settings: TerrainSettings, options: RunOptions) -> Result<RunSummary, SimulationError> {
    let mode = config.network.mode;
    if mode == NetMode::Client {
        return Err(SimulationError::ClientMode);
    }

    let mut manager = TerrainManager::new(config);
    manager.initialize(settings)?;
    let chunk_size = settings.chunk_size();

    // Player 0 is the listen host; remote players follow.
    let host = (mode == NetMode::ListenServer).then_some(PlayerId(0));
    let mut session = mode.is_server().then(|| ServerSession::new(manager.config(), host));
    let players: Vec<PlayerId> = (1..=options.players).map(PlayerId).collect();
    match session.as_mut() {
        Some(session) => {
            session.add_host(&mut manager);
            for player in &players {
                session.connect(&mut manager, *player);
            }
        }
        None => {
            for player in &players {
                manager.add_tracked_player(*player, true);
            }
        }
    }

    let mut summary = RunSummary::default();
    let start = Instant::now();
    for frame in 0..options.frames {
        let now = start + options.tick * frame;

        // --- Step 1: Move scripted players ---
        for (i, player) in players.iter().enumerate() {
            let index = u32::try_from(i).unwrap_or(u32::MAX);
            let location = scripted_location(index, options.players, frame, chunk_size);
            manager.update_player_location(*player, location);
        }
        if let Some(host) = host {
            manager.update_player_location(host, DVec3::ZERO);
        }

        // --- Step 2: Scripted edit ---
        if frame > 0 && frame % EDIT_EVERY == 0 {
            let at = scripted_location(0, options.players, frame, chunk_size);
            if scripted_edit(&mut manager, session.as_mut(), at, now) {
                summary.edits += 1;
            }
        }

        // --- Step 3: Tick ---
        match session.as_mut() {
            Some(session) => {
                let outbound = session.tick(&mut manager, now);
                count_messages(&mut summary.messages, &outbound);
            }
            None => {
                manager.tick(now);
                manager.drain_events();
            }
        }
        summary.frames += 1;

        if frame % STATS_EVERY == 0 {
            log_stats(frame, &manager.stats());
        }
        std::thread::sleep(options.tick);
    }

    summary.stats = manager.stats();
    log_stats(options.frames, &summary.stats);
    manager.shutdown();
    Ok(summary)
}

fn scripted_edit(
    manager: &mut TerrainManager,
    session: Option<&mut ServerSession>,
    at: DVec3,
    now: Instant,
) -> bool {
    let result = match session {
        Some(session) if manager.mode() == NetMode::ListenServer => session
            .host_edit(manager, at, STONE, &NoOccupancy, now)
            .map(|outcome| matches!(outcome, EditOutcome::Applied { .. })),
        _ => manager.set_voxel(at, STONE).map(|_| true),
    };
    match result {
        Ok(applied) => applied,
        Err(e) => {
            debug!("Scripted edit at {at} skipped: {e}");
            false
        }
    }
}

fn count_messages(counts: &mut BTreeMap<&'static str, usize>, outbound: &[Outbound]) {
    for out in outbound {
        *counts.entry(out.message.kind()).or_default() += 1;
    }
}

fn log_stats(frame: u32, stats: &WorldStats) {
    info!(
        "frame {frame}: {} chunks ({} hidden, {} queued for destroy), {} columns, regions {} loaded / {} loading / {} saving, {} workers, {} players",
        stats.loaded_chunks,
        stats.hidden_chunks,
        stats.queued_for_destroy,
        stats.generated_columns,
        stats.loaded_regions,
        stats.pending_load_regions,
        stats.pending_save_regions,
        stats.worker_count,
        stats.tracked_players,
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: NetMode) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.network.mode = mode;
        config.network.min_bundle_delay_secs = 0.0;
        config.network.bundle_send_interval_secs = 0.0;
        config.generation.generation_radius = 2;
        config.generation.worker_threads = 1;
        config.generation.idle_sleep_ms = 2;
        config.generation.working_sleep_ms = 1;
        config.streaming.region_size_in_chunks = 8;
        config.streaming.region_buffer_size = 0;
        config.streaming.autosave_interval_secs = 0;
        config
    }

    fn settings() -> TerrainSettings {
        TerrainSettings {
            voxel_count: 4,
            collision_radius: 1,
            ..Default::default()
        }
    }

    fn options(frames: u32) -> RunOptions {
        RunOptions {
            frames,
            players: 2,
            tick: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_players_walk_outward_in_different_directions() {
        let a = scripted_location(0, 2, 10, 400.0);
        let b = scripted_location(1, 2, 10, 400.0);
        assert!((a.length() - 200.0).abs() < 1e-9);
        assert!((a + b).length() < 1e-9);
        assert_eq!(scripted_location(0, 2, 0, 400.0), DVec3::ZERO);
    }

    #[test]
    fn test_client_mode_cannot_run() {
        let result = run(config(NetMode::Client), settings(), options(1));
        assert!(matches!(result, Err(SimulationError::ClientMode)));
    }

    #[test]
    fn test_standalone_run_tracks_players() {
        let summary = run(config(NetMode::Standalone), settings(), options(30)).unwrap();
        assert_eq!(summary.frames, 30);
        assert!(summary.messages.is_empty());
        assert_eq!(summary.stats.tracked_players, 2);
    }

    #[test]
    fn test_dedicated_run_pushes_settings_to_each_player() {
        let summary = run(config(NetMode::DedicatedServer), settings(), options(5)).unwrap();
        assert_eq!(summary.messages.get("TerrainSettings"), Some(&2));
    }
}
