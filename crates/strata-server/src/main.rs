//! Headless strata server.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI
//! flags. Run `strata run --frames 600` to simulate a world, or use the
//! save subcommands to manage worlds on disk.

mod platform;
mod simulation;

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use strata_config::{CliArgs, Command, ConfigError, EngineConfig, TerrainSettings};
use strata_world::{SaveDirectory, TerrainManager, WorldError};
use tracing::{error, info};

use crate::platform::PlatformDirs;
use crate::simulation::{RunOptions, SimulationError};

#[derive(Debug, thiserror::Error)]
enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    World(#[from] WorldError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let dirs = match PlatformDirs::resolve() {
        Ok(dirs) => dirs,
        Err(e) => {
            eprintln!("Failed to resolve platform directories: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = dirs.create_all() {
        eprintln!("Failed to create platform directories: {e}");
        return ExitCode::FAILURE;
    }
    let config_dir = args.config.clone().unwrap_or_else(|| dirs.config_dir.clone());

    // Load or create config, then apply CLI overrides
    let mut config = EngineConfig::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        EngineConfig::default()
    });
    config.apply_cli_overrides(&args);
    if config.persistence.save_root.is_none() {
        config.persistence.save_root = Some(dirs.save_root.clone());
    }

    strata_log::init_logging(Some(&dirs.log_dir), cfg!(debug_assertions), Some(&config));

    let command = args.command.clone().unwrap_or(Command::Run {
        frames: 600,
        players: 1,
        tick_ms: 16,
    });
    match execute(config, command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn execute(config: EngineConfig, command: Command) -> Result<(), ServerError> {
    match command {
        Command::CreateWorld {
            name,
            seed,
            voxel_count,
            voxel_size,
        } => {
            let defaults = TerrainSettings::default();
            let settings = TerrainSettings {
                seed,
                voxel_count: voxel_count.unwrap_or(defaults.voxel_count),
                voxel_size: voxel_size.unwrap_or(defaults.voxel_size),
                ..defaults
            };
            TerrainManager::new(config).create_world_save(&name, &settings)?;
        }
        Command::DeleteSave { name } => {
            TerrainManager::new(config).delete_save(&name)?;
        }
        Command::ListSaves => {
            let saves = TerrainManager::new(config).list_saves();
            if saves.is_empty() {
                info!("No saves found");
            }
            for name in saves {
                println!("{name}");
            }
        }
        Command::Run {
            frames,
            players,
            tick_ms,
        } => {
            let settings = world_settings(&config)?;
            info!(
                "Running {frames} frames with {players} players in {:?} mode",
                config.network.mode
            );
            let summary = simulation::run(
                config,
                settings,
                RunOptions {
                    frames,
                    players,
                    tick: Duration::from_millis(tick_ms),
                },
            )?;
            info!(
                "Finished {} frames, {} edits, messages {:?}",
                summary.frames, summary.edits, summary.messages
            );
        }
    }
    Ok(())
}

/// Settings of the configured save, created on first use, or defaults when
/// no save is selected.
fn world_settings(config: &EngineConfig) -> Result<TerrainSettings, ServerError> {
    let name = &config.persistence.save_name;
    if name.is_empty() {
        return Ok(TerrainSettings::default());
    }
    let saves = SaveDirectory::new(config.persistence.resolved_save_root());
    let dir = saves.save_path(name).map_err(WorldError::from)?;
    Ok(TerrainSettings::load_or_create(&dir)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &std::path::Path) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.persistence.save_root = Some(root.to_path_buf());
        config
    }

    #[test]
    fn test_create_list_and_delete_world() {
        let tmp = tempfile::tempdir().unwrap();
        let create = Command::CreateWorld {
            name: "alpha".to_string(),
            seed: 5,
            voxel_count: Some(8),
            voxel_size: None,
        };
        execute(config(tmp.path()), create.clone()).unwrap();
        assert!(matches!(
            execute(config(tmp.path()), create),
            Err(ServerError::World(_))
        ));

        let manager = TerrainManager::new(config(tmp.path()));
        assert_eq!(manager.list_saves(), vec!["alpha".to_string()]);
        let stored = TerrainSettings::load(&tmp.path().join("alpha")).unwrap();
        assert_eq!(stored.seed, 5);
        assert_eq!(stored.voxel_count, 8);

        execute(
            config(tmp.path()),
            Command::DeleteSave {
                name: "alpha".to_string(),
            },
        )
        .unwrap();
        assert!(manager.list_saves().is_empty());
    }

    #[test]
    fn test_run_without_save_uses_default_settings() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(
            world_settings(&config(tmp.path())).unwrap(),
            TerrainSettings::default()
        );
    }

    #[test]
    fn test_run_creates_settings_for_new_save() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config(tmp.path());
        config.persistence.save_name = "fresh".to_string();
        let settings = world_settings(&config).unwrap();
        assert_eq!(settings, TerrainSettings::default());
        assert!(tmp.path().join("fresh").join("TerrainSettings.dat").exists());
    }
}
