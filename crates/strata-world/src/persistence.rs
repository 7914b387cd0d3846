//! Region save files and world save directories.
//!
//! ## Region file layout
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | Magic bytes `"SRGN"` |
//! | 4 | 1 | Format version (`u8`, currently 1) |
//! | 5 | 4 | Entry count (`u32`, little-endian) |
//! | 9 | ... | Entries |
//!
//! Each entry is the chunk cell as three little-endian `i32`, a `u32` byte
//! length, then that many bytes of run-length encoded `(count, value)` pairs.
//!
//! A missing or unreadable region file means the region was never edited.

use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use strata_config::{ConfigError, SETTINGS_FILE_NAME, TerrainSettings};
use strata_voxel::{ChunkCell, RegionCoord};
use tracing::{debug, error, info, warn};

use crate::shared::WorldShared;

/// Magic bytes identifying a region file.
const MAGIC: [u8; 4] = *b"SRGN";

/// Current format version.
const FORMAT_VERSION: u8 = 1;

const HEADER_LEN: usize = 9;

/// Smallest possible encoded entry: a cell and an empty length prefix.
const MIN_ENTRY_LEN: usize = 16;

/// Errors decoding a region file.
#[derive(Debug, thiserror::Error)]
pub enum RegionFileError {
    #[error("region file I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("invalid magic bytes")]
    InvalidMagic,
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),
    #[error("data truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("entry count {count} cannot fit in {remaining} bytes")]
    BadCellCount { count: usize, remaining: usize },
}

/// Errors managing world save directories.
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("save '{name}' already exists")]
    AlreadyExists { name: String },
    #[error("invalid save name '{name}'")]
    InvalidName { name: String },
    #[error("save I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Settings(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// RegionFile
// ---------------------------------------------------------------------------

/// Decoded contents of one region file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegionFile {
    /// Cells with their run-length encoded overlays.
    pub entries: Vec<(ChunkCell, Vec<u8>)>,
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], RegionFileError> {
        let end = self.pos + len;
        if end > self.bytes.len() {
            return Err(RegionFileError::Truncated {
                expected: end,
                actual: self.bytes.len(),
            });
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn word(&mut self) -> Result<[u8; 4], RegionFileError> {
        let mut word = [0u8; 4];
        word.copy_from_slice(self.take(4)?);
        Ok(word)
    }

    fn u32(&mut self) -> Result<u32, RegionFileError> {
        Ok(u32::from_le_bytes(self.word()?))
    }

    fn i32(&mut self) -> Result<i32, RegionFileError> {
        Ok(i32::from_le_bytes(self.word()?))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

impl RegionFile {
    /// File name of a region inside a save directory.
    pub fn file_name(region: RegionCoord) -> String {
        format!("{}_{}Voxels.dat", region.x, region.y)
    }

    /// Serializes to the region file layout.
    pub fn encode(&self) -> Vec<u8> {
        let body: usize = self.entries.iter().map(|(_, rle)| MIN_ENTRY_LEN + rle.len()).sum();
        let mut buf = Vec::with_capacity(HEADER_LEN + body);
        buf.extend_from_slice(&MAGIC);
        buf.push(FORMAT_VERSION);
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for (cell, rle) in &self.entries {
            buf.extend_from_slice(&cell.x.to_le_bytes());
            buf.extend_from_slice(&cell.y.to_le_bytes());
            buf.extend_from_slice(&cell.z.to_le_bytes());
            buf.extend_from_slice(&(rle.len() as u32).to_le_bytes());
            buf.extend_from_slice(rle);
        }
        buf
    }

    /// Parses the region file layout.
    pub fn decode(bytes: &[u8]) -> Result<Self, RegionFileError> {
        let mut cur = Cursor { bytes, pos: 0 };
        if cur.take(4)? != MAGIC {
            return Err(RegionFileError::InvalidMagic);
        }
        let version = cur.take(1)?[0];
        if version != FORMAT_VERSION {
            return Err(RegionFileError::UnsupportedVersion(version));
        }
        let count = cur.u32()? as usize;
        if count > cur.remaining() / MIN_ENTRY_LEN {
            return Err(RegionFileError::BadCellCount {
                count,
                remaining: cur.remaining(),
            });
        }
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let cell = ChunkCell::new(cur.i32()?, cur.i32()?, cur.i32()?);
            let len = cur.u32()? as usize;
            entries.push((cell, cur.take(len)?.to_vec()));
        }
        Ok(Self { entries })
    }
}

// ---------------------------------------------------------------------------
// RegionPersistence
// ---------------------------------------------------------------------------

/// Reads and writes the region files of the active save.
#[derive(Default)]
pub struct RegionPersistence {
    save_dir: RwLock<Option<PathBuf>>,
}

impl RegionPersistence {
    /// Persistence writing into `save_dir`.
    pub fn new(save_dir: PathBuf) -> Self {
        Self {
            save_dir: RwLock::new(Some(save_dir)),
        }
    }

    /// Persistence with no active save. Loads find nothing, saves log errors.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Switches the active save directory.
    pub fn set_save_dir(&self, dir: Option<PathBuf>) {
        *self.save_dir.write() = dir;
    }

    pub fn save_dir(&self) -> Option<PathBuf> {
        self.save_dir.read().clone()
    }

    /// Path of a region's file in the active save.
    pub fn region_path(&self, region: RegionCoord) -> Option<PathBuf> {
        self.save_dir()
            .map(|dir| dir.join(RegionFile::file_name(region)))
    }

    fn read_region(&self, region: RegionCoord) -> Option<RegionFile> {
        let path = self.region_path(region)?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Region {region} has no save file");
                return None;
            }
            Err(e) => {
                warn!("Could not read {}: {e}", path.display());
                return None;
            }
        };
        if bytes.is_empty() {
            return None;
        }
        match RegionFile::decode(&bytes) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("Ignoring corrupt region file {}: {e}", path.display());
                None
            }
        }
    }

    /// Loads a region's overlays into memory and registers their Z indices.
    ///
    /// The region is marked loaded even when no file exists. Overlays
    /// already in memory win over the file. Returns the number of cells
    /// merged, or 0 when another thread owns the load.
    pub fn load_region(&self, shared: &WorldShared, region: RegionCoord) -> usize {
        if !shared.regions.begin_load(region) {
            return 0;
        }
        let mut merged = Vec::new();
        if let Some(file) = self.read_region(region) {
            let mut overlays = shared.overlays.lock();
            for (cell, rle) in &file.entries {
                if overlays.get(*cell).is_some() {
                    continue;
                }
                match overlays.insert_encoded(*cell, rle) {
                    Ok(()) => merged.push(*cell),
                    Err(e) => error!("Skipping saved overlay for cell {cell}: {e}"),
                }
            }
        }
        for cell in &merged {
            shared.columns.add_modified(*cell);
            if shared.columns.add_z(cell.column(), cell.z) {
                shared.request_regeneration(cell.column());
            }
        }
        shared.regions.finish_load(region);
        if !merged.is_empty() {
            debug!("Loaded {} edited cells for region {region}", merged.len());
        }
        merged.len()
    }

    /// Writes a region's overlays, optionally dropping them from memory.
    ///
    /// Returns the number of cells written.
    pub fn save_region(&self, shared: &WorldShared, region: RegionCoord, evict: bool) -> usize {
        let Some(dir) = self.save_dir() else {
            debug!("No save directory; region {region} kept in memory");
            return 0;
        };
        if shared.regions.is_pending_load(region) {
            self.load_region(shared, region);
        }

        let snapshot = shared.overlays.lock().snapshot_region(region);
        let entries = match snapshot {
            Some(entries) if !entries.is_empty() => entries,
            _ => {
                debug!("Region {region} has no edits to save");
                shared.regions.mark_saved(region);
                if evict {
                    shared.regions.mark_unloaded(region);
                }
                return 0;
            }
        };

        let count = entries.len();
        let bytes = RegionFile { entries }.encode();
        let path = dir.join(RegionFile::file_name(region));
        if let Err(e) = std::fs::create_dir_all(&dir).and_then(|()| std::fs::write(&path, bytes)) {
            error!("Failed to write {}: {e}", path.display());
            return 0;
        }

        shared.regions.mark_saved(region);
        if evict {
            shared.regions.mark_unloaded(region);
            shared.overlays.lock().remove_region(region);
        }
        debug!("Saved {count} cells for region {region}");
        count
    }

    /// Saves and evicts every region queued for saving.
    pub fn save_pending(&self, shared: &WorldShared) -> usize {
        shared
            .regions
            .take_pending_saves()
            .into_iter()
            .map(|region| self.save_region(shared, region, true))
            .sum()
    }

    /// Saves every region with unsaved edits, keeping them in memory.
    pub fn save_unsaved(&self, shared: &WorldShared) -> usize {
        let regions = shared.regions.unsaved();
        if regions.is_empty() {
            return 0;
        }
        let written: usize = regions
            .into_iter()
            .map(|region| self.save_region(shared, region, false))
            .sum();
        info!("Saved {written} edited cells");
        written
    }
}

// ---------------------------------------------------------------------------
// SaveDirectory
// ---------------------------------------------------------------------------

/// The root holding one directory per world save.
#[derive(Clone, Debug)]
pub struct SaveDirectory {
    root: PathBuf,
}

impl SaveDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn validate(name: &str) -> Result<(), SaveError> {
        let bad = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\'])
            || name.chars().any(char::is_control);
        if bad {
            return Err(SaveError::InvalidName {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Directory of a named save.
    pub fn save_path(&self, name: &str) -> Result<PathBuf, SaveError> {
        Self::validate(name)?;
        Ok(self.root.join(name))
    }

    /// `TerrainSettings.dat` of a named save.
    pub fn settings_path(&self, name: &str) -> Result<PathBuf, SaveError> {
        Ok(self.save_path(name)?.join(SETTINGS_FILE_NAME))
    }

    /// A region file of a named save.
    pub fn region_path(&self, name: &str, region: RegionCoord) -> Result<PathBuf, SaveError> {
        Ok(self.save_path(name)?.join(RegionFile::file_name(region)))
    }

    /// Creates a save holding `settings`. Fails when the save already has
    /// settings.
    pub fn create_world_save(
        &self,
        name: &str,
        settings: &TerrainSettings,
    ) -> Result<PathBuf, SaveError> {
        let dir = self.save_path(name)?;
        if dir.join(SETTINGS_FILE_NAME).exists() {
            return Err(SaveError::AlreadyExists {
                name: name.to_string(),
            });
        }
        settings.save(&dir)?;
        info!("Created world save '{name}' at {}", dir.display());
        Ok(dir)
    }

    /// Deletes a save and everything in it.
    pub fn delete_save(&self, name: &str) -> Result<(), SaveError> {
        let dir = self.save_path(name)?;
        std::fs::remove_dir_all(&dir)?;
        info!("Deleted world save '{name}'");
        Ok(())
    }

    /// Names of every save, sorted. Empty when the root does not exist.
    pub fn list_saves(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use strata_config::NetMode;
    use strata_voxel::{Cell2D, ModifiedVoxelOverlay, UNMODIFIED};

    fn settings() -> TerrainSettings {
        TerrainSettings {
            voxel_count: 4,
            ..Default::default()
        }
    }

    fn shared_in(dir: &Path) -> WorldShared {
        WorldShared::new(
            settings(),
            NetMode::Standalone,
            4,
            8,
            RegionPersistence::new(dir.to_path_buf()),
        )
    }

    #[test]
    fn test_region_file_name() {
        assert_eq!(RegionFile::file_name(RegionCoord::new(-3, 7)), "-3_7Voxels.dat");
    }

    #[test]
    fn test_region_file_roundtrip() {
        let file = RegionFile {
            entries: vec![
                (ChunkCell::new(1, -2, 3), vec![10, 255, 3, 4]),
                (ChunkCell::new(0, 0, -1), vec![]),
            ],
        };
        let bytes = file.encode();
        assert_eq!(&bytes[0..4], b"SRGN");
        assert_eq!(RegionFile::decode(&bytes).unwrap(), file);
    }

    #[test]
    fn test_region_file_rejects_garbage() {
        assert!(matches!(
            RegionFile::decode(b"NOPE\x01\0\0\0\0"),
            Err(RegionFileError::InvalidMagic)
        ));
        let mut bytes = RegionFile::default().encode();
        bytes[4] = 9;
        assert!(matches!(
            RegionFile::decode(&bytes),
            Err(RegionFileError::UnsupportedVersion(9))
        ));

        let mut bytes = RegionFile::default().encode();
        bytes[5..9].copy_from_slice(&1000u32.to_le_bytes());
        assert!(matches!(
            RegionFile::decode(&bytes),
            Err(RegionFileError::BadCellCount { count: 1000, .. })
        ));

        let full = RegionFile {
            entries: vec![(ChunkCell::new(0, 0, 0), vec![1, 2, 3, 4])],
        }
        .encode();
        assert!(matches!(
            RegionFile::decode(&full[..full.len() - 1]),
            Err(RegionFileError::Truncated { .. })
        ));
    }

    #[test]
    fn test_save_then_load_restores_overlays() {
        let dir = tempfile::tempdir().unwrap();
        let writer = shared_in(dir.path());
        let cell = ChunkCell::new(1, 1, 2);
        let region = writer.overlays.lock().record(cell, 7, 4);
        writer.regions.mark_changed(region);

        assert_eq!(writer.persistence.save_region(&writer, region, true), 1);
        assert!(dir.path().join(RegionFile::file_name(region)).exists());
        assert!(writer.overlays.lock().get(cell).is_none());
        assert!(writer.regions.unsaved().is_empty());

        let reader = shared_in(dir.path());
        assert_eq!(reader.persistence.load_region(&reader, region), 1);
        assert!(reader.regions.is_loaded(region));
        assert_eq!(reader.overlays.lock().get(cell).and_then(|o| o.get(7)), Some(4));
        assert_eq!(reader.columns.modified_z(Cell2D::new(1, 1)), vec![2]);
    }

    #[test]
    fn test_load_missing_file_marks_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let shared = shared_in(dir.path());
        let region = RegionCoord::new(5, 5);
        assert_eq!(shared.persistence.load_region(&shared, region), 0);
        assert!(shared.regions.is_loaded(region));
        assert_eq!(shared.persistence.load_region(&shared, region), 0);
    }

    #[test]
    fn test_load_corrupt_file_counts_as_pristine() {
        let dir = tempfile::tempdir().unwrap();
        let shared = shared_in(dir.path());
        let region = RegionCoord::new(0, 0);
        std::fs::write(dir.path().join(RegionFile::file_name(region)), b"junk").unwrap();
        assert_eq!(shared.persistence.load_region(&shared, region), 0);
        assert!(shared.regions.is_loaded(region));
    }

    #[test]
    fn test_load_keeps_newer_memory_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let shared = shared_in(dir.path());
        let cell = ChunkCell::new(0, 0, 0);
        let region = shared.overlays.lock().record(cell, 1, 2);
        shared.persistence.save_region(&shared, region, false);
        shared.overlays.lock().record(cell, 1, 9);
        shared.regions.mark_unloaded(region);

        assert_eq!(shared.persistence.load_region(&shared, region), 0);
        assert_eq!(shared.overlays.lock().get(cell).and_then(|o| o.get(1)), Some(9));
    }

    #[test]
    fn test_loaded_edit_requests_regeneration_of_generated_column() {
        let dir = tempfile::tempdir().unwrap();
        let writer = shared_in(dir.path());
        let cell = ChunkCell::new(0, 0, 3);
        let region = writer.overlays.lock().record(cell, 0, 1);
        writer.persistence.save_region(&writer, region, false);

        let reader = shared_in(dir.path());
        reader.columns.merge(Cell2D::new(0, 0), [0]);
        reader.persistence.load_region(&reader, region);
        assert!(reader.columns.has_cell(cell));
        assert_eq!(reader.take_regeneration(), Some(Cell2D::new(0, 0)));
    }

    #[test]
    fn test_save_without_edits_clears_pending() {
        let dir = tempfile::tempdir().unwrap();
        let shared = shared_in(dir.path());
        let region = RegionCoord::new(2, 2);
        shared.regions.request_save(region);
        assert_eq!(shared.persistence.save_pending(&shared), 0);
        assert!(!shared.regions.is_pending_save(region));
        assert!(!dir.path().join(RegionFile::file_name(region)).exists());
    }

    #[test]
    fn test_save_without_save_name_fails_quietly() {
        let shared = WorldShared::new(
            settings(),
            NetMode::Standalone,
            4,
            8,
            RegionPersistence::disabled(),
        );
        let region = shared.overlays.lock().record(ChunkCell::new(0, 0, 0), 0, 1);
        shared.regions.mark_changed(region);
        assert_eq!(shared.persistence.save_unsaved(&shared), 0);
        assert_eq!(shared.regions.unsaved(), vec![region]);
    }

    #[test]
    fn test_saved_overlay_keeps_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let shared = shared_in(dir.path());
        let cell = ChunkCell::new(0, 0, 0);
        let region = shared.overlays.lock().record(cell, 5, 0);
        shared.persistence.save_region(&shared, region, false);

        let bytes = std::fs::read(dir.path().join(RegionFile::file_name(region))).unwrap();
        let file = RegionFile::decode(&bytes).unwrap();
        let overlay = ModifiedVoxelOverlay::from_rle(&file.entries[0].1, shared.spec.padded_len()).unwrap();
        assert_eq!(overlay.get(5), Some(0));
        assert_eq!(overlay.get(4), Some(UNMODIFIED));
        assert_eq!(overlay.modified_count(), 1);
    }

    #[test]
    fn test_create_world_save_refuses_existing() {
        let dir = tempfile::tempdir().unwrap();
        let saves = SaveDirectory::new(dir.path());
        let settings = TerrainSettings {
            seed: 42,
            ..Default::default()
        };
        let path = saves.create_world_save("alpha", &settings).unwrap();
        assert_eq!(TerrainSettings::load(&path).unwrap(), settings);
        assert!(matches!(
            saves.create_world_save("alpha", &settings),
            Err(SaveError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_list_and_delete_saves() {
        let dir = tempfile::tempdir().unwrap();
        let saves = SaveDirectory::new(dir.path().join("saves"));
        assert!(saves.list_saves().is_empty());
        for name in ["zeta", "alpha", "mid"] {
            saves.create_world_save(name, &TerrainSettings::default()).unwrap();
        }
        assert_eq!(saves.list_saves(), vec!["alpha", "mid", "zeta"]);
        saves.delete_save("mid").unwrap();
        assert_eq!(saves.list_saves(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_invalid_save_names() {
        let saves = SaveDirectory::new("/tmp");
        for name in ["", "..", "a/b", "a\\b"] {
            assert!(matches!(saves.save_path(name), Err(SaveError::InvalidName { .. })));
        }
        assert!(saves.region_path("ok", RegionCoord::new(0, 1)).unwrap().ends_with("ok/0_1Voxels.dat"));
    }
}
