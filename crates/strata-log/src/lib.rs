//! Structured logging for the strata terrain engine.
//!
//! Console output carries module paths, thread names and uptime so worker
//! activity (`chunk-worker-N`) can be told apart from the main tick. Debug
//! builds also write JSON lines to `strata.log` for post-mortem analysis.

use std::path::Path;

use strata_config::EngineConfig;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// File written by the debug JSON layer.
pub const LOG_FILE_NAME: &str = "strata.log";

/// Filter used when neither `RUST_LOG` nor the config set a level.
pub const DEFAULT_FILTER: &str = "info";

/// Filter string derived from the config's `debug.log_level`.
pub fn filter_string(config: Option<&EngineConfig>) -> String {
    match config {
        Some(config) if !config.debug.log_level.is_empty() => config.debug.log_level.clone(),
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over the config level. The JSON file layer is only added
/// when `debug_build` is set and `log_dir` can be created.
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&EngineConfig>) {
    let filter_str = filter_string(config);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if debug_build
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_dir.join(LOG_FILE_NAME))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        tracing::debug!("Logging to console and {} with filter {filter_str}", log_dir.display());
        return;
    }

    subscriber.init();
    tracing::debug!("Logging to console with filter {filter_str}");
}

/// The default `EnvFilter`.
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_level() {
        let filter = default_env_filter();
        assert!(format!("{filter}").contains("info"));
    }

    #[test]
    fn test_filter_from_config() {
        let mut config = EngineConfig::default();
        assert_eq!(filter_string(Some(&config)), "info");

        config.debug.log_level = "debug,strata_world=trace".to_string();
        assert_eq!(filter_string(Some(&config)), "debug,strata_world=trace");

        config.debug.log_level.clear();
        assert_eq!(filter_string(Some(&config)), DEFAULT_FILTER);
        assert_eq!(filter_string(None), DEFAULT_FILTER);
    }

    #[test]
    fn test_subsystem_filters_parse() {
        for filter_str in [
            "info",
            "warn,strata_world::worker=debug",
            "info,strata_multiplayer=trace,strata_terrain=warn",
        ] {
            let filter = EnvFilter::try_from(filter_str);
            assert!(filter.is_ok(), "Failed to parse filter: {filter_str}");
        }
    }

    #[test]
    fn test_log_file_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_dir = temp_dir.path().join("logs");
        std::fs::create_dir_all(&log_dir).unwrap();
        let path = log_dir.join(LOG_FILE_NAME);
        std::fs::File::create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(path.file_name().unwrap(), "strata.log");
    }
}
