//! Command-line argument parsing for the strata server.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{EngineConfig, NetMode};

/// Strata command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug)]
#[command(name = "strata", about = "Infinite voxel terrain server")]
pub struct CliArgs {
    /// Root directory holding world saves.
    #[arg(long, global = true)]
    pub save_root: Option<PathBuf>,

    /// Active world save.
    #[arg(long, global = true)]
    pub save_name: Option<String>,

    /// Generation radius in chunks.
    #[arg(long, global = true)]
    pub radius: Option<i32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Network role (standalone, dedicated, listen, client).
    #[arg(long, global = true)]
    pub mode: Option<NetMode>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Operations exposed on the command line.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Create a new world save with fresh terrain settings.
    CreateWorld {
        /// Save name.
        name: String,
        /// World seed.
        #[arg(long, default_value_t = 0)]
        seed: i32,
        /// Voxels per chunk edge.
        #[arg(long)]
        voxel_count: Option<i32>,
        /// World units per voxel.
        #[arg(long)]
        voxel_size: Option<f32>,
    },
    /// Delete a world save and everything in it.
    DeleteSave {
        /// Save name.
        name: String,
    },
    /// List world saves.
    ListSaves,
    /// Run a headless simulation.
    Run {
        /// Ticks to simulate.
        #[arg(long, default_value_t = 600)]
        frames: u32,
        /// Simulated players walking through the world.
        #[arg(long, default_value_t = 1)]
        players: u32,
        /// Milliseconds per tick.
        #[arg(long, default_value_t = 16)]
        tick_ms: u64,
    },
}

impl EngineConfig {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref root) = args.save_root {
            self.persistence.save_root = Some(root.clone());
        }
        if let Some(ref name) = args.save_name {
            self.persistence.save_name = name.clone();
        }
        if let Some(radius) = args.radius {
            self.generation.generation_radius = radius;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
        if let Some(mode) = args.mode {
            self.network.mode = mode;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_args() -> CliArgs {
        CliArgs {
            save_root: None,
            save_name: None,
            radius: None,
            log_level: None,
            config: None,
            mode: None,
            command: None,
        }
    }

    #[test]
    fn test_cli_override() {
        let mut config = EngineConfig::default();
        let args = CliArgs {
            save_name: Some("world1".to_string()),
            radius: Some(8),
            mode: Some(NetMode::DedicatedServer),
            ..empty_args()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.persistence.save_name, "world1");
        assert_eq!(config.generation.generation_radius, 8);
        assert_eq!(config.network.mode, NetMode::DedicatedServer);
        // Non-overridden fields retain defaults
        assert_eq!(config.debug.log_level, "info");
        assert_eq!(config.persistence.save_root, None);
    }

    #[test]
    fn test_cli_no_override() {
        let original = EngineConfig::default();
        let mut config = EngineConfig::default();
        config.apply_cli_overrides(&empty_args());
        assert_eq!(config, original);
    }

    #[test]
    fn test_parse_subcommands() {
        let args = CliArgs::parse_from(["strata", "--radius", "4", "create-world", "alpha", "--seed", "9"]);
        assert_eq!(args.radius, Some(4));
        assert_eq!(
            args.command,
            Some(Command::CreateWorld {
                name: "alpha".to_string(),
                seed: 9,
                voxel_count: None,
                voxel_size: None,
            })
        );

        let args = CliArgs::parse_from(["strata", "run", "--frames", "10", "--mode", "listen"]);
        assert_eq!(args.mode, Some(NetMode::ListenServer));
        assert!(matches!(args.command, Some(Command::Run { frames: 10, .. })));
    }
}
