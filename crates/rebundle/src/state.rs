use std::path::Path;

use chrono::{DateTime, Utc};
use rebundle_platform::AppPaths;
use serde::{Deserialize, Serialize};

/// Version marker for the bundle that was last committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledState {
    pub version_name: String,
    pub installed_at: DateTime<Utc>,
}

impl InstalledState {
    pub fn new(version_name: impl Into<String>) -> Self {
        Self {
            version_name: version_name.into(),
            installed_at: Utc::now(),
        }
    }

    fn load_from_path(path: &Path) -> Option<Self> {
        let data = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&data).ok()
    }

    fn save_to_path(&self, path: &Path) -> std::io::Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        rebundle_core::write_file_atomic(path, &data)
    }

    pub fn load() -> Option<Self> {
        let paths = AppPaths::new().ok()?;
        Self::load_from_path(&paths.installed_state_file())
    }

    pub fn save(&self) -> std::io::Result<()> {
        let paths = AppPaths::new().map_err(std::io::Error::other)?;
        paths.ensure_dirs()?;
        self.save_to_path(&paths.installed_state_file())
    }
}

#[cfg(test)]
mod tests {
    use super::InstalledState;

    #[test]
    fn save_to_path_and_load_from_path_round_trip() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let path = temp_dir.path().join("installed.json");
        let state = InstalledState::new("1.2.3");

        state.save_to_path(&path).expect("state should be saved");
        let loaded = InstalledState::load_from_path(&path).expect("state should load");

        assert_eq!(loaded, state);
    }

    #[test]
    fn load_from_path_returns_none_for_missing_or_invalid_file() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let path = temp_dir.path().join("installed.json");

        assert!(InstalledState::load_from_path(&path).is_none());

        std::fs::write(&path, "{not-valid-json").expect("invalid file should be written");
        assert!(InstalledState::load_from_path(&path).is_none());
    }

    #[test]
    fn save_to_path_replaces_previous_marker() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let path = temp_dir.path().join("installed.json");

        InstalledState::new("1.0.0")
            .save_to_path(&path)
            .expect("first marker should be saved");
        InstalledState::new("2.0.0")
            .save_to_path(&path)
            .expect("second marker should be saved");

        let loaded = InstalledState::load_from_path(&path).expect("state should load");
        assert_eq!(loaded.version_name, "2.0.0");

        let leftovers = std::fs::read_dir(temp_dir.path())
            .expect("read temp dir entries")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
