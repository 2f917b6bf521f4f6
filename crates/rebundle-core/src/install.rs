use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use log::{debug, error, info, warn};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinHandle;

use crate::arbiter::{RequestToken, StalenessArbiter};
use crate::commit::{CommitDecision, CommitError, Committer, TempGuard};
use crate::fetch::{FetchError, FetchTimeouts, Fetcher, temp_path_for};

/// How [`BundleInstaller::fetch_and_install`] hands back its result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InstallMode {
    /// Run the install on the installer's runtime and return at once.
    #[default]
    Background,
    /// Run the install to completion on the calling thread.
    ///
    /// Refused on any thread that has a runtime context, including
    /// `spawn_blocking` threads, and when the installer's runtime is a
    /// current-thread one.
    Blocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Precondition,
    Transport,
    Commit,
    Interrupted,
}

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("destination {} has no file name", path.display())]
    InvalidDestination { path: PathBuf },
    #[error("failed to create bundle directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("blocking install called from inside an async runtime")]
    BlockingInAsyncContext,
    #[error("blocking install needs a multi-thread runtime handle")]
    CurrentThreadRuntime,
    #[error(transparent)]
    Transport(#[from] FetchError),
    #[error(transparent)]
    Commit(#[from] CommitError),
    #[error("install task did not complete: {details}")]
    Interrupted { details: String },
}

impl InstallError {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidDestination { .. }
            | Self::CreateDir { .. }
            | Self::BlockingInAsyncContext
            | Self::CurrentThreadRuntime => FailureKind::Precondition,
            Self::Transport(_) => FailureKind::Transport,
            Self::Commit(_) => FailureKind::Commit,
            Self::Interrupted { .. } => FailureKind::Interrupted,
        }
    }
}

/// Result of one install invocation.
///
/// Only [`InstallOutcome::Installed`] means the destination now holds this
/// invocation's bundle; use [`InstallOutcome::is_installed`] when that is all
/// that matters.
#[derive(Debug)]
pub enum InstallOutcome {
    Installed {
        token: RequestToken,
        bytes: u64,
    },
    Superseded {
        token: RequestToken,
        latest: Option<RequestToken>,
    },
    Failed(InstallError),
}

impl InstallOutcome {
    #[must_use]
    pub fn is_installed(&self) -> bool {
        matches!(self, Self::Installed { .. })
    }

    #[must_use]
    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded { .. })
    }

    #[must_use]
    pub fn error(&self) -> Option<&InstallError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

impl From<InstallOutcome> for bool {
    fn from(outcome: InstallOutcome) -> Self {
        outcome.is_installed()
    }
}

/// Completion handle returned by [`BundleInstaller::fetch_and_install`].
///
/// Dropping it does not cancel a background install; the transfer still runs
/// and commits or discards on its own.
#[derive(Debug)]
pub struct PendingInstall {
    state: PendingState,
}

#[derive(Debug)]
enum PendingState {
    Ready(Option<InstallOutcome>),
    Running(JoinHandle<InstallOutcome>),
}

impl PendingInstall {
    fn ready(outcome: InstallOutcome) -> Self {
        Self {
            state: PendingState::Ready(Some(outcome)),
        }
    }

    fn running(handle: JoinHandle<InstallOutcome>) -> Self {
        Self {
            state: PendingState::Running(handle),
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        match &self.state {
            PendingState::Ready(_) => true,
            PendingState::Running(handle) => handle.is_finished(),
        }
    }
}

impl Future for PendingInstall {
    type Output = InstallOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            PendingState::Ready(outcome) => Poll::Ready(outcome.take().unwrap_or_else(|| {
                InstallOutcome::Failed(InstallError::Interrupted {
                    details: "outcome was already taken".to_string(),
                })
            })),
            PendingState::Running(handle) => Pin::new(handle).poll(cx).map(|joined| {
                joined.unwrap_or_else(|join_error| {
                    InstallOutcome::Failed(InstallError::Interrupted {
                        details: join_error.to_string(),
                    })
                })
            }),
        }
    }
}

struct Job {
    token: RequestToken,
    temp: TempGuard,
    destination: PathBuf,
}

/// Downloads bundles and swaps them into place, latest request first.
///
/// Every invocation streams into its own temporary file next to the
/// destination. A finished download only replaces the destination if no newer
/// invocation has started in the meantime on the same [`StalenessArbiter`].
///
/// Blocking installs drive the runtime through its handle from outside it,
/// which only works for a multi-thread runtime; a current-thread handle makes
/// them fail fast instead.
#[derive(Debug, Clone)]
pub struct BundleInstaller {
    fetcher: Fetcher,
    committer: Committer,
    runtime: Handle,
}

impl BundleInstaller {
    /// Create an installer with its own arbiter.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(timeouts: FetchTimeouts, runtime: Handle) -> Result<Self, FetchError> {
        Ok(Self::with_arbiter(
            Fetcher::new(timeouts)?,
            StalenessArbiter::new(),
            runtime,
        ))
    }

    #[must_use]
    pub fn with_arbiter(fetcher: Fetcher, arbiter: StalenessArbiter, runtime: Handle) -> Self {
        Self {
            fetcher,
            committer: Committer::new(arbiter),
            runtime,
        }
    }

    #[must_use]
    pub fn arbiter(&self) -> &StalenessArbiter {
        self.committer.arbiter()
    }

    /// Fetch `url` and install it at `destination` using the given calling
    /// convention.
    ///
    /// The invocation is registered as the latest one before this returns in
    /// either mode, so call order decides which request wins.
    ///
    /// Blocking mode fails fast, without registering a token, when called from
    /// any thread with a runtime context. That includes `spawn_blocking`
    /// threads, where blocking would otherwise be allowed; use [`Self::install`]
    /// there instead.
    pub fn fetch_and_install(
        &self,
        url: &str,
        destination: impl AsRef<Path>,
        mode: InstallMode,
    ) -> PendingInstall {
        let destination = destination.as_ref();

        if mode == InstallMode::Blocking
            && let Err(error) = self.check_blocking()
        {
            error!(
                "Refusing blocking install of {}: {error}",
                destination.display()
            );
            return PendingInstall::ready(InstallOutcome::Failed(error));
        }

        let job = match self.prepare(destination) {
            Ok(job) => job,
            Err(error) => {
                error!("Bundle install precondition failed: {error}");
                return PendingInstall::ready(InstallOutcome::Failed(error));
            }
        };

        match mode {
            InstallMode::Blocking => {
                let outcome = self.runtime.block_on(self.run(url, job));
                PendingInstall::ready(outcome)
            }
            InstallMode::Background => {
                let installer = self.clone();
                let url = url.to_string();
                let handle = self
                    .runtime
                    .spawn(async move { installer.run(&url, job).await });
                PendingInstall::running(handle)
            }
        }
    }

    /// Fetch and install from an async context.
    ///
    /// Dropping the returned future before it completes removes the partial
    /// temporary file; the destination is left untouched.
    pub async fn install(&self, url: &str, destination: impl AsRef<Path>) -> InstallOutcome {
        match self.prepare(destination.as_ref()) {
            Ok(job) => self.run(url, job).await,
            Err(error) => {
                error!("Bundle install precondition failed: {error}");
                InstallOutcome::Failed(error)
            }
        }
    }

    /// Block the calling thread until a pending install finishes.
    ///
    /// An already resolved install is returned as is. Otherwise this fails
    /// fast with a precondition error when called from inside an async runtime
    /// or when the installer's runtime is a current-thread one.
    pub fn wait(&self, pending: PendingInstall) -> InstallOutcome {
        let handle = match pending.state {
            PendingState::Ready(outcome) => {
                return outcome.unwrap_or_else(|| {
                    InstallOutcome::Failed(InstallError::Interrupted {
                        details: "outcome was already taken".to_string(),
                    })
                });
            }
            PendingState::Running(handle) => handle,
        };

        if let Err(error) = self.check_blocking() {
            error!("Refusing to block on a pending install: {error}");
            return InstallOutcome::Failed(error);
        }
        self.runtime.block_on(PendingInstall::running(handle))
    }

    fn check_blocking(&self) -> Result<(), InstallError> {
        if Handle::try_current().is_ok() {
            return Err(InstallError::BlockingInAsyncContext);
        }
        if self.runtime.runtime_flavor() == RuntimeFlavor::CurrentThread {
            return Err(InstallError::CurrentThreadRuntime);
        }
        Ok(())
    }

    fn prepare(&self, destination: &Path) -> Result<Job, InstallError> {
        if destination.file_name().is_none() {
            return Err(InstallError::InvalidDestination {
                path: destination.to_path_buf(),
            });
        }

        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| InstallError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let token = self.arbiter().begin_invocation();
        Ok(Job {
            token,
            temp: TempGuard::new(temp_path_for(destination, token)),
            destination: destination.to_path_buf(),
        })
    }

    async fn run(&self, url: &str, job: Job) -> InstallOutcome {
        let Job {
            token,
            temp,
            destination,
        } = job;
        debug!(
            "Install {token} started: {url} -> {}",
            destination.display()
        );

        let bytes = match self.fetcher.download_to(url, temp.path()).await {
            Ok(bytes) => bytes,
            Err(error) => {
                if error.is_timeout() {
                    warn!("Bundle download {token} timed out: {error}");
                } else {
                    warn!("Bundle download {token} failed: {error}");
                }
                return InstallOutcome::Failed(error.into());
            }
        };

        let committer = self.committer.clone();
        let target = destination.clone();
        let committed =
            tokio::task::spawn_blocking(move || committer.commit(token, temp, &target)).await;
        let committed = match committed {
            Ok(committed) => committed,
            Err(join_error) => {
                error!("Bundle commit {token} did not complete: {join_error}");
                return InstallOutcome::Failed(InstallError::Interrupted {
                    details: join_error.to_string(),
                });
            }
        };

        match committed {
            Ok(CommitDecision::Committed) => {
                info!(
                    "Installed bundle {token} ({bytes} bytes) at {}",
                    destination.display()
                );
                InstallOutcome::Installed { token, bytes }
            }
            Ok(CommitDecision::Superseded { latest }) => {
                info!(
                    "Bundle download {token} superseded by {}, discarded",
                    latest.map_or_else(|| "none".to_string(), |t| t.to_string())
                );
                InstallOutcome::Superseded { token, latest }
            }
            Err(error) => {
                error!("Bundle commit {token} failed: {error}");
                InstallOutcome::Failed(error.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FailureKind, InstallError, InstallMode, InstallOutcome};
    use crate::arbiter::StalenessArbiter;

    #[test]
    fn only_installed_collapses_to_true() {
        let arbiter = StalenessArbiter::new();
        let token = arbiter.begin_invocation();

        assert!(bool::from(InstallOutcome::Installed { token, bytes: 3 }));
        assert!(!bool::from(InstallOutcome::Superseded {
            token,
            latest: None
        }));
        assert!(!bool::from(InstallOutcome::Failed(
            InstallError::BlockingInAsyncContext
        )));
    }

    #[test]
    fn error_kinds_follow_failure_taxonomy() {
        assert_eq!(
            InstallError::BlockingInAsyncContext.kind(),
            FailureKind::Precondition
        );
        assert_eq!(
            InstallError::CurrentThreadRuntime.kind(),
            FailureKind::Precondition
        );
        assert_eq!(
            InstallError::InvalidDestination { path: "/".into() }.kind(),
            FailureKind::Precondition
        );
        assert_eq!(
            InstallError::Interrupted {
                details: "panicked".to_string()
            }
            .kind(),
            FailureKind::Interrupted
        );
    }

    #[test]
    fn background_is_the_default_mode() {
        assert_eq!(InstallMode::default(), InstallMode::Background);
    }
}
