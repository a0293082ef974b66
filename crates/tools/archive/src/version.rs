//! Installed-vs-remote version comparison.
//!
//! Upstream mirrors do not publish a uniform version scheme, so a version
//! token is whatever can be resolved for a URL: a modification date, a
//! dotted number parsed from the file name, or an opaque string. Tokens of
//! different kinds never compare as newer.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use loam_core::tools::{InstallState, ToolId};
use loam_core::{Error, Result};
use regex::Regex;
use reqwest::{Client, Url, header};
use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::fetch::{archive_file_name, parse_http_date};

static DOTTED_VERSION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)+").ok());

/// A comparable version marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionToken {
    /// Modification time of the distribution.
    Date(DateTime<Utc>),
    /// Dotted numeric version, e.g. `1.0.3`.
    Numeric(Vec<u64>),
    /// Anything else; only equality is meaningful.
    Opaque(String),
}

impl VersionToken {
    /// Parse a recorded token.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if let Ok(date) = DateTime::parse_from_rfc3339(s) {
            return Self::Date(date.with_timezone(&Utc));
        }
        let parts: Option<Vec<u64>> = s.split('.').map(|p| p.parse().ok()).collect();
        match parts {
            Some(parts) if !parts.is_empty() => Self::Numeric(parts),
            _ => Self::Opaque(s.to_string()),
        }
    }

    /// First dotted version in an archive file name.
    ///
    /// `hadoop-1.0.3-bin.tar.gz` yields `1.0.3`.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        let re = DOTTED_VERSION.as_ref()?;
        let found = re.find(name)?;
        Some(Self::parse(found.as_str()))
    }

    /// Whether `self` is strictly newer than `installed`.
    ///
    /// | remote / installed | rule |
    /// |---|---|
    /// | date / date | strictly later, at whole-second precision |
    /// | numeric / numeric | component-wise, missing components are 0 |
    /// | opaque / opaque | differs |
    /// | mixed | never newer |
    #[must_use]
    pub fn is_newer_than(&self, installed: &Self) -> bool {
        match (self, installed) {
            (Self::Date(remote), Self::Date(local)) => remote.timestamp() > local.timestamp(),
            (Self::Numeric(remote), Self::Numeric(local)) => {
                compare_numeric(remote, local) == Ordering::Greater
            }
            (Self::Opaque(remote), Self::Opaque(local)) => remote != local,
            _ => false,
        }
    }
}

fn compare_numeric(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            x.cmp(&y)
        })
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date(date) => f.write_str(&date.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Self::Numeric(parts) => {
                let joined = parts
                    .iter()
                    .map(u64::to_string)
                    .collect::<Vec<_>>()
                    .join(".");
                f.write_str(&joined)
            }
            Self::Opaque(s) => f.write_str(s),
        }
    }
}

/// Resolves the version token currently published at a URL.
#[async_trait]
pub trait RemoteProbe: Send + Sync {
    /// Token for `url`, or `None` when nothing can be resolved.
    async fn remote_version(&self, url: &str) -> Result<Option<VersionToken>>;
}

/// Probe that asks the URL's origin.
///
/// `http(s)` uses a HEAD request and its `Last-Modified` header, `file://`
/// uses the file's modification time. Either way, a dotted version in the
/// file name is the fallback.
#[derive(Debug, Clone)]
pub struct UrlProbe {
    client: Client,
}

impl UrlProbe {
    /// Create a probe sharing `client`.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteProbe for UrlProbe {
    async fn remote_version(&self, url: &str) -> Result<Option<VersionToken>> {
        let parsed = Url::parse(url).map_err(|e| Error::network(url, format!("invalid URL: {e}")))?;

        let modified = if parsed.scheme() == "file" {
            let path = parsed
                .to_file_path()
                .map_err(|()| Error::network(url, "not a valid local file URL"))?;
            let metadata = tokio::fs::metadata(&path)
                .await
                .map_err(|e| Error::network(url, e.to_string()))?;
            metadata.modified().ok().map(DateTime::<Utc>::from)
        } else {
            let response = self
                .client
                .head(url)
                .send()
                .await
                .map_err(|e| Error::network(url, e.to_string()))?;
            if !response.status().is_success() {
                return Err(Error::network(url, format!("HTTP {}", response.status())));
            }
            response
                .headers()
                .get(header::LAST_MODIFIED)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_http_date)
        };

        Ok(modified.map(VersionToken::Date).or_else(|| {
            archive_file_name(url)
                .ok()
                .and_then(|name| VersionToken::from_file_name(&name))
        }))
    }
}

/// Outcome of an update check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheck {
    /// The remote distribution is newer than the installed one.
    Newer {
        /// Token resolved for the remote distribution.
        remote: VersionToken,
    },
    /// The installed distribution is current.
    Current,
    /// The check could not be completed; treated as not newer.
    Unknown {
        /// Why the check failed.
        reason: String,
    },
}

impl UpdateCheck {
    /// Whether an update should be installed.
    #[must_use]
    pub fn is_newer(&self) -> bool {
        matches!(self, Self::Newer { .. })
    }
}

/// Decides whether installed tools are stale.
pub struct VersionOracle {
    probe: Box<dyn RemoteProbe>,
}

impl VersionOracle {
    /// Create an oracle backed by `probe`.
    #[must_use]
    pub fn new(probe: Box<dyn RemoteProbe>) -> Self {
        Self { probe }
    }

    /// Compare what `url` currently serves against `installed`.
    ///
    /// Never fails: probe errors degrade to [`UpdateCheck::Unknown`] and are
    /// logged as warnings.
    pub async fn check(&self, tool: ToolId, url: &str, installed: Option<&InstallState>) -> UpdateCheck {
        let Some(installed) = installed else {
            return match self.probe.remote_version(url).await {
                Ok(Some(remote)) => UpdateCheck::Newer { remote },
                Ok(None) => UpdateCheck::Unknown {
                    reason: "no installed version and no remote version".to_string(),
                },
                Err(e) => degraded(tool, url, &e),
            };
        };

        let remote = match self.probe.remote_version(url).await {
            Ok(Some(remote)) => remote,
            Ok(None) => {
                debug!(%tool, %url, "No remote version token");
                return UpdateCheck::Unknown {
                    reason: "remote version could not be resolved".to_string(),
                };
            }
            Err(e) => return degraded(tool, url, &e),
        };

        let Some(local) = installed.version.as_deref().map(VersionToken::parse) else {
            debug!(%tool, "Install record has no version token");
            return UpdateCheck::Unknown {
                reason: "installed version is not recorded".to_string(),
            };
        };

        if remote.is_newer_than(&local) {
            debug!(%tool, %remote, %local, "Remote version is newer");
            UpdateCheck::Newer { remote }
        } else {
            debug!(%tool, %remote, %local, "Installed version is current");
            UpdateCheck::Current
        }
    }

    /// Shorthand for [`Self::check`] reduced to a yes/no answer.
    pub async fn is_newer_version(
        &self,
        tool: ToolId,
        url: &str,
        installed: Option<&InstallState>,
    ) -> bool {
        self.check(tool, url, installed).await.is_newer()
    }
}

fn degraded(tool: ToolId, url: &str, error: &Error) -> UpdateCheck {
    warn!(%tool, %url, error = %error, "Update check failed; keeping installed version");
    UpdateCheck::Unknown {
        reason: error.to_string(),
    }
}
