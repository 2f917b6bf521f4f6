use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::arbiter::{RequestToken, StalenessArbiter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitDecision {
    Committed,
    Superseded { latest: Option<RequestToken> },
}

#[derive(Debug, thiserror::Error)]
#[error("failed to replace {} with {}: {source}", destination.display(), temp.display())]
pub struct CommitError {
    pub destination: PathBuf,
    pub temp: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Owns an invocation's temporary file until it is committed.
///
/// Dropping the guard removes the file, so a transfer abandoned at any await
/// point (timeout, `select!`, runtime shutdown) leaves nothing behind.
#[derive(Debug)]
pub(crate) struct TempGuard {
    path: Option<PathBuf>,
}

impl TempGuard {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub(crate) fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    // The file has been renamed away; nothing left to remove.
    fn disarm(mut self) {
        self.path = None;
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            discard(&path);
        }
    }
}

/// Decides whether a finished download may become the visible bundle.
///
/// The staleness check and the replacing rename happen under the arbiter's
/// commit lock, so a newer invocation that commits in between cannot be
/// overwritten by an older one that already passed its check. Installers that
/// share an arbiter share the lock too.
#[derive(Debug, Clone)]
pub(crate) struct Committer {
    arbiter: StalenessArbiter,
}

impl Committer {
    pub(crate) fn new(arbiter: StalenessArbiter) -> Self {
        Self { arbiter }
    }

    pub(crate) fn arbiter(&self) -> &StalenessArbiter {
        &self.arbiter
    }

    /// Move `temp` onto `destination` if `token` is still the latest.
    ///
    /// Blocks on file system calls; async callers should run it on a blocking
    /// thread. The temporary file is gone once this returns, whatever the
    /// result.
    pub(crate) fn commit(
        &self,
        token: RequestToken,
        temp: TempGuard,
        destination: &Path,
    ) -> Result<CommitDecision, CommitError> {
        let _guard = self.arbiter.commit_lock();

        if !self.arbiter.is_still_latest(token) {
            return Ok(CommitDecision::Superseded {
                latest: self.arbiter.latest(),
            });
        }

        if let Err(source) = replace_file(temp.path(), destination) {
            return Err(CommitError {
                destination: destination.to_path_buf(),
                temp: temp.path().to_path_buf(),
                source,
            });
        }
        temp.disarm();

        sync_parent_dir(destination);
        Ok(CommitDecision::Committed)
    }
}

/// Best-effort removal of an invocation's temporary file.
pub(crate) fn discard(temp: &Path) {
    match std::fs::remove_file(temp) {
        Ok(()) => debug!("Discarded temporary bundle {}", temp.display()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => warn!(
            "Failed to discard temporary bundle {}: {error}",
            temp.display()
        ),
    }
}

/// Write a small file in one piece by way of a synced sibling temp file.
///
/// # Errors
/// Returns an error if the temp file cannot be created or written, or if the
/// replacing rename fails.
pub fn write_file_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent")
    })?;

    let file_name = path
        .file_name()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("state");
    let pid = std::process::id();
    let nonce: u32 = rand::random();

    let mut tmp_path = None;
    for attempt in 0..16_u8 {
        let candidate = parent.join(format!(".{file_name}.{pid}.{nonce:x}.{attempt}.tmp"));
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(mut file) => {
                file.write_all(data)?;
                file.sync_all()?;
                tmp_path = Some(candidate);
                break;
            }
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(error) => return Err(error),
        }
    }

    let Some(tmp_path) = tmp_path else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "failed to create unique temp file",
        ));
    };

    if let Err(error) = replace_file(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(error);
    }

    sync_parent_dir(path);
    Ok(())
}

fn replace_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    if std::fs::symlink_metadata(dst).is_ok_and(|metadata| metadata.is_dir()) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "destination is a directory",
        ));
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::ffi::OsStrExt;
        use windows_sys::Win32::Storage::FileSystem::{
            MOVEFILE_REPLACE_EXISTING, MOVEFILE_WRITE_THROUGH, MoveFileExW,
        };

        let src_utf16: Vec<u16> = src
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();
        let dst_utf16: Vec<u16> = dst
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: both paths are NUL-terminated UTF-16 buffers that live for
        // the duration of the FFI call.
        let moved = unsafe {
            MoveFileExW(
                src_utf16.as_ptr(),
                dst_utf16.as_ptr(),
                MOVEFILE_REPLACE_EXISTING | MOVEFILE_WRITE_THROUGH,
            )
        };
        if moved != 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::fs::rename(src, dst)
    }
}

// Persists the rename itself across a crash.
fn sync_parent_dir(destination: &Path) {
    #[cfg(unix)]
    if let Some(parent) = destination.parent()
        && let Err(error) = std::fs::File::open(parent).and_then(|dir| dir.sync_all())
    {
        debug!("Failed to sync directory {}: {error}", parent.display());
    }

    #[cfg(not(unix))]
    let _ = destination;
}
