//! Platform directory resolution.
//!
//! Config, world data and logs live in the OS-conventional locations (XDG on
//! Linux, Known Folders on Windows, Library on macOS).

use std::io;
use std::path::{Path, PathBuf};

/// Errors that can occur while resolving or creating directories.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The OS did not provide a configuration directory.
    #[error("could not determine OS configuration directory")]
    NoConfigDir,
    /// A directory could not be created.
    #[error("platform I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Where the server keeps its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformDirs {
    /// `config.ron`.
    pub config_dir: PathBuf,
    /// World saves.
    pub save_root: PathBuf,
    /// Log files.
    pub log_dir: PathBuf,
}

const APP_NAME: &str = "strata";

impl PlatformDirs {
    /// Resolve directories without creating them on disk.
    pub fn resolve() -> Result<Self, PlatformError> {
        let app_config = dirs::config_dir().ok_or(PlatformError::NoConfigDir)?.join(APP_NAME);
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| app_config.clone())
            .join(APP_NAME);

        Ok(Self {
            config_dir: app_config.clone(),
            save_root: data_dir.join("saves"),
            log_dir: app_config.join("logs"),
        })
    }

    /// Directories rooted under a custom base path.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn resolve_with_root(root: &Path) -> Self {
        let app_dir = root.join(APP_NAME);
        Self {
            config_dir: app_dir.join("config"),
            save_root: app_dir.join("saves"),
            log_dir: app_dir.join("logs"),
        }
    }

    /// Create every directory on disk.
    pub fn create_all(&self) -> Result<(), PlatformError> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.save_root)?;
        std::fs::create_dir_all(&self.log_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_with_root_layout() {
        let root = Path::new("/tmp/strata-test");
        let dirs = PlatformDirs::resolve_with_root(root);
        assert_eq!(dirs.config_dir, root.join("strata").join("config"));
        assert_eq!(dirs.save_root, root.join("strata").join("saves"));
        assert_eq!(dirs.log_dir, root.join("strata").join("logs"));
    }

    #[test]
    fn test_create_all_makes_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = PlatformDirs::resolve_with_root(tmp.path());
        dirs.create_all().unwrap();
        assert!(dirs.config_dir.is_dir());
        assert!(dirs.save_root.is_dir());
        assert!(dirs.log_dir.is_dir());
    }

    #[test]
    fn test_resolved_directories_are_distinct() {
        let Ok(dirs) = PlatformDirs::resolve() else {
            return;
        };
        assert_ne!(dirs.config_dir, dirs.save_root);
        assert_ne!(dirs.save_root, dirs.log_dir);
    }
}
