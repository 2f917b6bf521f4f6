use std::path::Path;
use std::time::Duration;

use rebundle_core::{BundleLocation, DEFAULT_BUNDLE_FILE_NAME, FetchTimeouts, LocationError};
use rebundle_platform::AppPaths;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_transfer_timeout")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_transfer_timeout")]
    pub write_timeout_secs: u64,

    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    #[serde(default)]
    pub bundles_url: Option<String>,

    #[serde(default)]
    pub app_key: Option<String>,

    #[serde(default = "default_platform")]
    pub platform: String,

    #[serde(default = "default_bundle_file_name")]
    pub bundle_file_name: String,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_transfer_timeout() -> u64 {
    60
}

fn default_call_timeout() -> u64 {
    90
}

fn default_platform() -> String {
    rebundle_platform::host_platform().to_string()
}

fn default_bundle_file_name() -> String {
    DEFAULT_BUNDLE_FILE_NAME.to_string()
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_transfer_timeout(),
            write_timeout_secs: default_transfer_timeout(),
            call_timeout_secs: default_call_timeout(),
            bundles_url: None,
            app_key: None,
            platform: default_platform(),
            bundle_file_name: default_bundle_file_name(),
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
        }
    }
}

impl AppSettings {
    pub fn load() -> Self {
        let Ok(paths) = AppPaths::new() else {
            return Self::default();
        };
        Self::load_from_path(&paths.settings_file())
    }

    fn load_from_path(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|error| {
                log::warn!("Ignoring malformed settings {}: {error}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn fetch_timeouts(&self) -> FetchTimeouts {
        FetchTimeouts {
            connect: Duration::from_secs(self.connect_timeout_secs),
            read: Duration::from_secs(self.read_timeout_secs),
            write: Duration::from_secs(self.write_timeout_secs),
            call: Duration::from_secs(self.call_timeout_secs),
        }
    }

    /// Bundle location built from `bundles_url`, if one is configured.
    pub fn bundle_location(&self) -> Option<Result<BundleLocation, LocationError>> {
        let template = self.bundles_url.as_deref()?;
        Some(
            BundleLocation::new(template, self.platform.as_str())
                .map(|location| location.with_file_name(self.bundle_file_name.as_str())),
        )
    }
}
