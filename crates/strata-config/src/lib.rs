//! Configuration for the strata terrain engine.
//!
//! Engine settings persist to disk as RON and accept CLI overrides via clap.
//! Per-world terrain settings use a fixed little-endian binary layout so a
//! save directory is self-describing.

mod cli;
mod config;
mod error;
mod terrain_settings;

pub use cli::{CliArgs, Command};
pub use config::{
    DebugConfig, EngineConfig, GenerationConfig, NetMode, NetworkConfig, PersistenceConfig,
    StreamingConfig,
};
pub use error::ConfigError;
pub use terrain_settings::{SETTINGS_FILE_NAME, TERRAIN_SETTINGS_LEN, TerrainSettings};
