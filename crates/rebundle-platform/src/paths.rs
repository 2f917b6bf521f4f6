use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AppPathsError {
    #[error("Could not determine config directory")]
    ConfigDirUnavailable,
    #[error("Could not determine cache directory")]
    CacheDirUnavailable,
    #[error("Could not determine data directory")]
    DataDirUnavailable,
}

pub struct AppPaths {
    pub config_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl AppPaths {
    /// Build application paths for the current platform.
    ///
    /// # Errors
    /// Returns an error when the user config, cache or data directory cannot
    /// be determined.
    pub fn new() -> Result<Self, AppPathsError> {
        Ok(Self {
            config_dir: dirs::config_dir()
                .ok_or(AppPathsError::ConfigDirUnavailable)?
                .join("rebundle"),
            cache_dir: dirs::cache_dir()
                .ok_or(AppPathsError::CacheDirUnavailable)?
                .join("rebundle"),
            data_dir: dirs::data_dir()
                .ok_or(AppPathsError::DataDirUnavailable)?
                .join("rebundle"),
        })
    }

    #[must_use]
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.json")
    }

    /// Directory holding committed bundles.
    #[must_use]
    pub fn bundles_dir(&self) -> PathBuf {
        self.data_dir.join("rn").join("bundles")
    }

    #[must_use]
    pub fn bundle_file(&self, file_name: &str) -> PathBuf {
        self.bundles_dir().join(file_name)
    }

    #[must_use]
    pub fn installed_state_file(&self) -> PathBuf {
        self.data_dir.join("installed.json")
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.cache_dir.join("rebundle.log")
    }

    /// Ensure all application directories exist on disk.
    ///
    /// # Errors
    /// Returns an error if any directory cannot be created.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.cache_dir)?;
        std::fs::create_dir_all(self.bundles_dir())?;
        Ok(())
    }
}
