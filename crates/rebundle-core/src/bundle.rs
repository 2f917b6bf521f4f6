use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::fetch::parse_bundle_url;

pub const DEFAULT_BUNDLE_FILE_NAME: &str = "main.jsbundle";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("bundle URL template is empty")]
    EmptyTemplate,
    #[error("bundle version name is empty")]
    EmptyVersion,
    #[error("bundle URL template produced an invalid URL: {url}")]
    InvalidUrl { url: String },
}

/// Where versioned bundles are published.
///
/// The URL template may use `{app_key}`, `{platform}`, `{version}` and `{file}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleLocation {
    url_template: String,
    platform: String,
    file_name: String,
}

impl BundleLocation {
    /// # Errors
    /// Returns an error if the template is blank.
    pub fn new(
        url_template: impl Into<String>,
        platform: impl Into<String>,
    ) -> Result<Self, LocationError> {
        let url_template = url_template.into().trim().to_string();
        if url_template.is_empty() {
            return Err(LocationError::EmptyTemplate);
        }

        Ok(Self {
            url_template,
            platform: platform.into(),
            file_name: DEFAULT_BUNDLE_FILE_NAME.to_string(),
        })
    }

    #[must_use]
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Expand the template for one published version.
    ///
    /// # Errors
    /// Returns an error if `version` is blank or the expansion is not an
    /// `http`/`https` URL.
    pub fn bundle_url(&self, app_key: &str, version: &str) -> Result<String, LocationError> {
        let version = version.trim();
        if version.is_empty() {
            return Err(LocationError::EmptyVersion);
        }

        let url = self
            .url_template
            .replace("{app_key}", app_key.trim())
            .replace("{platform}", &self.platform)
            .replace("{version}", version)
            .replace("{file}", &self.file_name);

        match parse_bundle_url(&url) {
            Ok(_) => Ok(url),
            Err(_) => Err(LocationError::InvalidUrl { url }),
        }
    }
}

/// Return `path` if it holds a usable cached bundle: a readable, non-empty
/// regular file.
#[must_use]
pub fn preferred_bundle(path: &Path) -> Option<PathBuf> {
    let metadata = std::fs::metadata(path).ok()?;
    if !metadata.is_file() || metadata.len() == 0 {
        return None;
    }
    std::fs::File::open(path).ok()?;
    Some(path.to_path_buf())
}

/// Whether `wanted_version` should be downloaded over what is cached at
/// `path`.
///
/// A blank wanted version never triggers a refresh.
#[must_use]
pub fn needs_refresh(installed_version: Option<&str>, wanted_version: &str, path: &Path) -> bool {
    let wanted = wanted_version.trim();
    if wanted.is_empty() {
        return false;
    }

    installed_version.map(str::trim) != Some(wanted) || preferred_bundle(path).is_none()
}
