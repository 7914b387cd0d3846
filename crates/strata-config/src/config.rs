//! Engine configuration structs with defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool and spiral search settings.
    pub generation: GenerationConfig,
    /// Chunk lifetime and region bookkeeping.
    pub streaming: StreamingConfig,
    /// Network role and replication pacing.
    pub network: NetworkConfig,
    /// Save location.
    pub persistence: PersistenceConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    /// Radius in chunks around each player that is kept generated.
    pub generation_radius: i32,
    /// Number of worker threads (0 = one per core minus `reserved_cores`).
    pub worker_threads: usize,
    /// Cores left free for the main thread and the OS.
    pub reserved_cores: usize,
    /// Worker sleep when there is nothing to generate, in milliseconds.
    pub idle_sleep_ms: u64,
    /// Worker sleep between generated columns, in milliseconds.
    pub working_sleep_ms: u64,
    /// Upper bound on the spawn-burst throttle sleep, in milliseconds.
    pub spawn_throttle_cap_ms: u64,
}

/// Chunk and region lifetime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamingConfig {
    /// Chunks destroyed per main-thread tick.
    pub chunks_to_destroy_per_frame: usize,
    /// Columns per region edge.
    pub region_size_in_chunks: i32,
    /// Extra regions kept loaded around the player's region.
    pub region_buffer_size: i32,
    /// Seconds between autosaves.
    pub autosave_interval_secs: u64,
    /// Attempts at an edit on a chunk that has not spawned yet.
    pub max_chunk_retry_count: u32,
    /// Delay between those attempts, in milliseconds.
    pub chunk_retry_delay_ms: u64,
    /// Voxels around an edit checked for missing chunks.
    pub adjacent_voxel_buffer: i32,
}

/// Role of this process in a session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum NetMode {
    /// Single process, no replication.
    #[default]
    Standalone,
    /// Authoritative server with no local player.
    DedicatedServer,
    /// Authoritative server hosting a local player.
    ListenServer,
    /// Remote client.
    Client,
}

impl NetMode {
    /// Whether this process owns the authoritative world.
    pub fn is_server(self) -> bool {
        matches!(self, Self::DedicatedServer | Self::ListenServer)
    }

    /// Whether this process has authority over saves.
    pub fn has_authority(self) -> bool {
        !matches!(self, Self::Client)
    }

    /// Whether chunks leaving range are hidden rather than destroyed.
    pub fn hides_chunks(self) -> bool {
        matches!(self, Self::Client | Self::ListenServer)
    }
}

impl std::str::FromStr for NetMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standalone" => Ok(Self::Standalone),
            "dedicated" | "dedicated-server" => Ok(Self::DedicatedServer),
            "listen" | "listen-server" => Ok(Self::ListenServer),
            "client" => Ok(Self::Client),
            other => Err(format!("unknown net mode: {other}")),
        }
    }
}

/// Network/replication configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Network role.
    pub mode: NetMode,
    /// Largest serialized region bundle, in bytes.
    pub max_region_bundle_bytes: usize,
    /// Seconds between bundles of one region.
    pub bundle_send_interval_secs: f64,
    /// Minimum delay before the first bundle, in seconds.
    pub min_bundle_delay_secs: f64,
    /// Ticks a joining player may wait for a position before being dropped.
    pub max_player_retries: u32,
    /// Retries when replicating names finds missing chunks.
    pub ensure_names_max_retries: u32,
}

/// Save location configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Root holding one directory per world save. `None` uses the platform
    /// data directory.
    pub save_root: Option<PathBuf>,
    /// Active save. Empty disables persistence.
    pub save_name: String,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            generation_radius: 16,
            worker_threads: 0,
            reserved_cores: 2,
            idle_sleep_ms: 100,
            working_sleep_ms: 5,
            spawn_throttle_cap_ms: 50,
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunks_to_destroy_per_frame: 150,
            region_size_in_chunks: 50,
            region_buffer_size: 1,
            autosave_interval_secs: 60,
            max_chunk_retry_count: 50,
            chunk_retry_delay_ms: 100,
            adjacent_voxel_buffer: 1,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mode: NetMode::Standalone,
            max_region_bundle_bytes: 60_000,
            bundle_send_interval_secs: 2.0,
            min_bundle_delay_secs: 0.1,
            max_player_retries: 1000,
            ensure_names_max_retries: 50,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl PersistenceConfig {
    /// Save root, falling back to `<data_dir>/strata/saves`.
    pub fn resolved_save_root(&self) -> PathBuf {
        match &self.save_root {
            Some(root) => root.clone(),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("strata")
                .join("saves"),
        }
    }
}

// --- Load / Save / Reload ---

impl EngineConfig {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::read(&config_path))?;
            let config: EngineConfig = ron::from_str(&contents).map_err(ConfigError::Parse)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = EngineConfig::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::write(config_dir))?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Serialize)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::write(&config_path))?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::read(&config_path))?;
        let new_config: EngineConfig = ron::from_str(&contents).map_err(ConfigError::Parse)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Worker threads to spawn given `available` cores.
    pub fn worker_count(&self, available: usize) -> usize {
        match self.generation.worker_threads {
            0 => available.saturating_sub(self.generation.reserved_cores).max(1),
            n => n,
        }
    }
}
