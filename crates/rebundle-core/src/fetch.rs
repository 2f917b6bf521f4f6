use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use log::debug;
use reqwest::Url;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::arbiter::RequestToken;

/// Size of the buffer used between the response body and the temporary file.
pub const CHUNK_SIZE: usize = 64 * 1024;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(90);

/// Time bounds for a single download attempt.
///
/// `connect`, `read` and `call` bound the HTTP exchange; `write` bounds each
/// write of buffered body data to local storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTimeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
    pub call: Duration,
}

impl Default for FetchTimeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            read: DEFAULT_READ_TIMEOUT,
            write: DEFAULT_WRITE_TIMEOUT,
            call: DEFAULT_CALL_TIMEOUT,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to build download client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("invalid bundle URL {url}: {details}")]
    InvalidUrl { url: String, details: String },
    #[error("failed to download bundle from {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("bundle download failed with HTTP {status} for {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("{context} {}: {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("writing {} timed out after {seconds}s", path.display())]
    WriteTimeout { path: PathBuf, seconds: u64 },
}

impl FetchError {
    fn io(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.to_path_buf(),
            source,
        }
    }

    fn request(url: &Url, source: reqwest::Error) -> Self {
        Self::Request {
            url: url.to_string(),
            source,
        }
    }

    /// Whether the attempt ran out of time rather than failing outright.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Request { source, .. } => source.is_timeout(),
            Self::WriteTimeout { .. } => true,
            _ => false,
        }
    }
}

pub(crate) fn parse_bundle_url(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw.trim()).map_err(|error| FetchError::InvalidUrl {
        url: raw.to_string(),
        details: error.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(FetchError::InvalidUrl {
            url: raw.to_string(),
            details: format!("unsupported scheme '{scheme}'"),
        }),
    }
}

/// Build the sibling temporary path used by one install invocation.
///
/// The name is `<destination-name>.<random-hex>-<token-hex>.tmp`, so concurrent
/// invocations never share a path and the final rename stays on one volume.
#[must_use]
pub fn temp_path_for(destination: &Path, token: RequestToken) -> PathBuf {
    let file_name = destination
        .file_name()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("bundle");
    let suffix: u32 = rand::random();
    let name = format!("{file_name}.{suffix:x}-{token}.tmp");

    match destination.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Streams one HTTP response body into a local file.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    write_timeout: Duration,
}

impl Fetcher {
    /// Build a fetcher whose client enforces `timeouts`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(timeouts: FetchTimeouts) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .read_timeout(timeouts.read)
            .timeout(timeouts.call)
            .user_agent(format!("rebundle/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FetchError::ClientBuild)?;

        Ok(Self {
            client,
            write_timeout: timeouts.write,
        })
    }

    /// Download `url` into a newly created file at `temp_path`.
    ///
    /// The file is synced to stable storage before this returns. On error the
    /// file may be left behind partially written; removing it is the caller's
    /// job.
    ///
    /// # Errors
    /// Returns an error for invalid URLs, transport failures, non-success HTTP
    /// statuses, and local I/O failures or write timeouts.
    pub async fn download_to(&self, url: &str, temp_path: &Path) -> Result<u64, FetchError> {
        let url = parse_bundle_url(url)?;

        if let Some(parent) = temp_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| FetchError::io("failed to create directory", parent, error))?;
        }

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|error| FetchError::request(&url, error))?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }

        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(temp_path)
            .await
            .map_err(|error| FetchError::io("failed to create temporary file", temp_path, error))?;
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);

        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|error| FetchError::request(&url, error))?;
            self.bounded_write(writer.write_all(&chunk), temp_path).await?;
            written += chunk.len() as u64;
        }
        self.bounded_write(writer.flush(), temp_path).await?;

        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(|error| FetchError::io("failed to sync temporary file", temp_path, error))?;

        debug!("Downloaded {written} bytes from {url} to {}", temp_path.display());
        Ok(written)
    }

    async fn bounded_write<F>(&self, write: F, path: &Path) -> Result<(), FetchError>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(FetchError::io("failed to write bundle data to", path, error)),
            Err(_) => Err(FetchError::WriteTimeout {
                path: path.to_path_buf(),
                seconds: self.write_timeout.as_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::{FetchError, FetchTimeouts, parse_bundle_url, temp_path_for};
    use crate::arbiter::StalenessArbiter;

    #[test]
    fn default_timeouts_match_expected_values() {
        let timeouts = FetchTimeouts::default();

        assert_eq!(timeouts.connect, Duration::from_secs(10));
        assert_eq!(timeouts.read, Duration::from_secs(60));
        assert_eq!(timeouts.write, Duration::from_secs(60));
        assert_eq!(timeouts.call, Duration::from_secs(90));
    }

    #[test]
    fn temp_path_is_a_sibling_named_after_destination_and_token() {
        let arbiter = StalenessArbiter::new();
        let token = arbiter.begin_invocation();
        let destination = Path::new("bundles").join("main.jsbundle");

        let temp = temp_path_for(&destination, token);

        assert_eq!(temp.parent(), destination.parent());
        let name = temp
            .file_name()
            .and_then(|name| name.to_str())
            .expect("temp name should be valid UTF-8");
        assert!(name.starts_with("main.jsbundle."));
        assert!(name.ends_with(&format!("-{token}.tmp")));
        let random = name
            .trim_start_matches("main.jsbundle.")
            .trim_end_matches(&format!("-{token}.tmp"));
        assert!(!random.is_empty());
        assert!(random.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn temp_paths_differ_between_invocations() {
        let arbiter = StalenessArbiter::new();
        let destination = Path::new("main.jsbundle");

        let first = temp_path_for(destination, arbiter.begin_invocation());
        let second = temp_path_for(destination, arbiter.begin_invocation());

        assert_ne!(first, second);
    }

    #[test]
    fn parse_bundle_url_accepts_http_and_https() {
        assert!(parse_bundle_url("http://localhost:8080/main.jsbundle").is_ok());
        assert!(parse_bundle_url(" https://cdn.example.com/a/b.jsbundle ").is_ok());
    }

    #[test]
    fn parse_bundle_url_rejects_other_schemes_and_garbage() {
        assert!(matches!(
            parse_bundle_url("file:///etc/passwd"),
            Err(FetchError::InvalidUrl { ref details, .. }) if details.contains("file")
        ));
        assert!(matches!(
            parse_bundle_url("not a url"),
            Err(FetchError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn write_timeout_counts_as_timeout() {
        let error = FetchError::WriteTimeout {
            path: "main.jsbundle.tmp".into(),
            seconds: 60,
        };

        assert!(error.is_timeout());
        assert_eq!(
            error.to_string(),
            "writing main.jsbundle.tmp timed out after 60s"
        );
    }
}
