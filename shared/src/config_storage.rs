//! Configuration storage for gantry calibration data.
//!
//! All config is stored in ~/.gantry_config/ by default.

use crate::alignment_calibration::AlignmentCalibration;
use std::path::{Path, PathBuf};

/// Configuration storage manager.
///
/// Manages loading and saving of calibration files from a centralized
/// directory (defaults to ~/.gantry_config/).
#[derive(Debug, Clone)]
pub struct ConfigStorage {
    /// Root directory for all configuration (e.g., ~/.gantry_config)
    root_path: PathBuf,
}

impl ConfigStorage {
    /// Create a new config storage with default path (~/.gantry_config)
    pub fn new() -> std::io::Result<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::NotFound, "HOME not set"))?;
        let root_path = PathBuf::from(home).join(".gantry_config");
        Ok(Self { root_path })
    }

    /// Create a new config storage with custom root path
    pub fn with_path(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    /// Get the root configuration path
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Path of the alignment calibration file
    pub fn alignment_calibration_path(&self) -> PathBuf {
        self.root_path.join("alignment_calibration.json")
    }

    /// Get the alignment calibration.
    ///
    /// Returns None if no calibration exists.
    /// Returns Some(Err) if the file exists but cannot be loaded.
    pub fn get_alignment_calibration(
        &self,
    ) -> Option<Result<AlignmentCalibration, std::io::Error>> {
        let path = self.alignment_calibration_path();

        if !path.exists() {
            return None;
        }

        Some(AlignmentCalibration::load_from_file(&path))
    }

    /// Save the alignment calibration.
    ///
    /// Creates the config directory if it doesn't exist.
    /// Returns the path where the calibration was saved.
    pub fn save_alignment_calibration(
        &self,
        calibration: &AlignmentCalibration,
    ) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.root_path)?;

        let path = self.alignment_calibration_path();
        calibration.save_to_file(&path)?;
        Ok(path)
    }

    /// Delete the alignment calibration.
    ///
    /// Returns Ok(true) if the file was deleted, Ok(false) if it didn't exist.
    pub fn delete_alignment_calibration(&self) -> std::io::Result<bool> {
        let path = self.alignment_calibration_path();

        if !path.exists() {
            return Ok(false);
        }

        std::fs::remove_file(path)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_storage() -> (tempfile::TempDir, ConfigStorage) {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = ConfigStorage::with_path(temp_dir.path().join("gantry_config"));
        (temp_dir, storage)
    }

    #[test]
    fn test_calibration_path() {
        let (_dir, storage) = create_test_storage();
        let path = storage.alignment_calibration_path();
        assert!(path.starts_with(storage.root_path()));
        assert!(path.to_str().unwrap().ends_with("alignment_calibration.json"));
    }

    #[test]
    fn test_get_nonexistent_calibration() {
        let (_dir, storage) = create_test_storage();
        assert!(storage.get_alignment_calibration().is_none());
    }

    #[test]
    fn test_save_load_delete_calibration() {
        let (_dir, storage) = create_test_storage();

        let cal = AlignmentCalibration {
            mm_per_pixel: 0.02,
            ..Default::default()
        };
        storage.save_alignment_calibration(&cal).unwrap();

        let loaded = storage
            .get_alignment_calibration()
            .expect("Calibration should exist")
            .expect("Calibration should load successfully");
        assert_eq!(loaded, cal);

        assert!(storage.delete_alignment_calibration().unwrap());
        assert!(!storage.delete_alignment_calibration().unwrap());
    }
}
