//! Core bundle delivery logic for Rebundle.
//!
//! This crate downloads a versioned bundle and swaps it into place so readers
//! never see a partial file:
//! - Staleness arbitration so the most recently started request wins.
//! - Streaming HTTP download into a sibling temporary file.
//! - Atomic commit of a finished download, or discard when superseded.
//! - Bundle URL templates and cached-bundle lookup for refresh decisions.

mod arbiter;
mod bundle;
mod commit;
mod fetch;
mod install;

/// Latest-request register and the tokens it hands out.
pub use arbiter::{RequestToken, StalenessArbiter};
/// Versioned bundle location and cached bundle helpers.
pub use bundle::{
    BundleLocation, DEFAULT_BUNDLE_FILE_NAME, LocationError, needs_refresh, preferred_bundle,
};
/// Commit results and errors.
pub use commit::{CommitDecision, CommitError, write_file_atomic};
/// Streaming downloader and its timeout policy.
pub use fetch::{CHUNK_SIZE, FetchError, FetchTimeouts, Fetcher, temp_path_for};
/// Install entry point, calling conventions, and outcomes.
pub use install::{
    BundleInstaller, FailureKind, InstallError, InstallMode, InstallOutcome, PendingInstall,
};
