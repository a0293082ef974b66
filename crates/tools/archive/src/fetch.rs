//! Distribution download.
//!
//! `http(s)` URLs are streamed with reqwest; `file://` URLs are copied from
//! the local filesystem so mirrors on shared drives work without a server.

use chrono::{DateTime, Utc};
use loam_core::config::LocalConfig;
use loam_core::tools::ToolId;
use loam_core::{Error, Result};
use reqwest::{Client, Url, header};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

/// A completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// Where the archive was written.
    pub path: PathBuf,
    /// Bytes written.
    pub bytes: u64,
    /// SHA256 of the written bytes, lowercase hex.
    pub sha256: String,
    /// Modification time reported by the source, if any.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Downloads tool distributions to a staging path.
#[derive(Debug, Clone)]
pub struct ArchiveFetcher {
    client: Client,
    timeout: Option<Duration>,
}

impl ArchiveFetcher {
    /// Create a fetcher. `timeout` bounds each whole download.
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("loam/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::configuration(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    /// Underlying HTTP client, shared with the update probe.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Distribution URL for `tool`: the configured override, else the default.
    #[must_use]
    pub fn resolve_url(config: &LocalConfig, tool: ToolId) -> String {
        config.url_for(tool).to_string()
    }

    /// Stream `url` to `dest`, overwriting any existing file.
    ///
    /// Fails with [`Error::Network`] if the source is unreachable or answers
    /// with a non-2xx status, and [`Error::DownloadIncomplete`] if fewer
    /// bytes arrive than the source advertised. The file is left in place
    /// on failure; callers clear it before the next attempt.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<Download> {
        let fut = self.download_inner(url, dest);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::Timeout {
                    operation: format!("Download of {url}"),
                    seconds: limit.as_secs(),
                })?,
            None => fut.await,
        }
    }

    async fn download_inner(&self, url: &str, dest: &Path) -> Result<Download> {
        let parsed = Url::parse(url).map_err(|e| Error::network(url, format!("invalid URL: {e}")))?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(e, parent, "create"))?;
        }

        info!(%url, ?dest, "Downloading");
        let download = if parsed.scheme() == "file" {
            copy_local(url, &parsed, dest).await?
        } else {
            self.fetch_remote(url, dest).await?
        };
        debug!(bytes = download.bytes, sha256 = %download.sha256, "Download complete");
        Ok(download)
    }

    async fn fetch_remote(&self, url: &str, dest: &Path) -> Result<Download> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::network(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::network(url, format!("HTTP {status}")));
        }

        let expected = response.content_length();
        let last_modified = response
            .headers()
            .get(header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| Error::io(e, dest, "create"))?;
        let mut hasher = Sha256::new();
        let mut received: u64 = 0;

        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) if expected.is_some() => {
                    debug!(error = %e, received, "Transfer interrupted");
                    break;
                }
                Err(e) => return Err(Error::network(url, e.to_string())),
            };
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::io(e, dest, "write"))?;
            received += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| Error::io(e, dest, "write"))?;

        if let Some(expected) = expected
            && received != expected
        {
            return Err(Error::download_incomplete(url, expected, received));
        }

        Ok(Download {
            path: dest.to_path_buf(),
            bytes: received,
            sha256: format!("{:x}", hasher.finalize()),
            last_modified,
        })
    }
}

async fn copy_local(url: &str, parsed: &Url, dest: &Path) -> Result<Download> {
    let source = parsed
        .to_file_path()
        .map_err(|()| Error::network(url, "not a valid local file URL"))?;

    let mut input = tokio::fs::File::open(&source)
        .await
        .map_err(|e| Error::network(url, e.to_string()))?;
    let metadata = input
        .metadata()
        .await
        .map_err(|e| Error::network(url, e.to_string()))?;
    let expected = metadata.len();
    let last_modified = metadata.modified().ok().map(DateTime::<Utc>::from);

    let mut output = tokio::fs::File::create(dest)
        .await
        .map_err(|e| Error::io(e, dest, "create"))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    let mut received: u64 = 0;

    loop {
        let n = input
            .read(&mut buffer)
            .await
            .map_err(|e| Error::network(url, e.to_string()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        output
            .write_all(&buffer[..n])
            .await
            .map_err(|e| Error::io(e, dest, "write"))?;
        received += n as u64;
    }
    output.flush().await.map_err(|e| Error::io(e, dest, "write"))?;

    if received != expected {
        return Err(Error::download_incomplete(url, expected, received));
    }

    Ok(Download {
        path: dest.to_path_buf(),
        bytes: received,
        sha256: format!("{:x}", hasher.finalize()),
        last_modified,
    })
}

/// File name of the archive a URL points at.
pub fn archive_file_name(url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| {
        Error::configuration_with_help(
            format!("Invalid distribution URL '{url}': {e}"),
            "Distribution URLs must be absolute http(s):// or file:// URLs",
        )
    })?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(String::from)
        .ok_or_else(|| {
            Error::configuration(format!("Distribution URL '{url}' does not name a file"))
        })
}

/// Parse an HTTP date such as `Tue, 08 May 2012 10:00:00 GMT`.
pub(crate) fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
