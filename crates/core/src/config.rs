//! Configuration resolved once at process start.
//!
//! Environment lookups (mirror URLs, credentials, timeouts) happen here and
//! nowhere else. Everything downstream receives a [`LocalConfig`], which
//! keeps install and template logic testable without mutating the process
//! environment.

use secrecy::SecretString;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::params::ParameterSet;
use crate::tools::{ToolId, ToolSpec};
use crate::{Error, Result};

/// Project configuration file name.
pub const PROJECT_CONFIG_FILE: &str = "loam.toml";

/// Default install root directory name under the project root.
pub const DEFAULT_INSTALL_DIR: &str = ".loam-local";

/// Source of environment variables.
pub trait EnvSource {
    /// Value of `key`, treating empty values as unset.
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

impl EnvSource for BTreeMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

/// Storage credentials handed to the connector and runtime engine.
///
/// Values are never logged; `Debug` prints them redacted.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Access key id.
    pub access_key: Option<SecretString>,
    /// Secret access key.
    pub secret_key: Option<SecretString>,
}

/// Optional timeouts. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    /// Limit for a single archive download.
    pub download: Option<Duration>,
    /// Limit for a single script run.
    pub run: Option<Duration>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectFile {
    #[serde(default)]
    parameter: ParameterSet,
}

/// Fully resolved configuration for one invocation.
#[derive(Debug, Clone)]
pub struct LocalConfig {
    /// Project root directory.
    pub project_root: PathBuf,
    /// Directory holding one subdirectory per tool.
    pub install_root: PathBuf,
    /// Distribution URL overrides, keyed by tool.
    pub url_overrides: BTreeMap<ToolId, String>,
    /// Connector and storage credentials.
    pub credentials: Credentials,
    /// Whether to ask the network whether installed tools are stale.
    pub check_updates: bool,
    /// Download and run limits.
    pub timeouts: Timeouts,
    /// `JAVA_HOME`, if set.
    pub java_home: Option<PathBuf>,
    /// Parameters from the project configuration file.
    pub parameters: ParameterSet,
}

impl LocalConfig {
    /// Configuration with defaults for `project_root` and no environment.
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        Self {
            install_root: project_root.join(DEFAULT_INSTALL_DIR),
            project_root,
            url_overrides: BTreeMap::new(),
            credentials: Credentials::default(),
            check_updates: false,
            timeouts: Timeouts::default(),
            java_home: None,
            parameters: ParameterSet::new(),
        }
    }

    /// Resolve configuration from the environment and the project file.
    pub fn resolve(project_root: &Path, env: &dyn EnvSource) -> Result<Self> {
        let mut config = Self::new(project_root);

        if let Some(root) = env.var("LOAM_INSTALL_ROOT") {
            let root = PathBuf::from(root);
            config.install_root = if root.is_absolute() {
                root
            } else {
                project_root.join(root)
            };
        }

        for id in ToolId::ALL {
            let spec = ToolSpec::get(id);
            if let Some(url) = env.var(spec.url_env) {
                debug!(tool = %id, env = spec.url_env, "Using distribution URL override");
                config.url_overrides.insert(id, url);
            }
        }

        config.credentials = Credentials {
            access_key: env.var("AWS_ACCESS_KEY").map(SecretString::from),
            secret_key: env.var("AWS_SECRET_KEY").map(SecretString::from),
        };

        config.check_updates = match env.var("LOAM_CHECK_UPDATES") {
            Some(v) => parse_flag("LOAM_CHECK_UPDATES", &v)?,
            None => false,
        };

        config.timeouts = Timeouts {
            download: parse_seconds(env, "LOAM_DOWNLOAD_TIMEOUT_SECS")?,
            run: parse_seconds(env, "LOAM_RUN_TIMEOUT_SECS")?,
        };

        config.java_home = env.var("JAVA_HOME").map(PathBuf::from);
        config.parameters = load_project_parameters(project_root)?;

        Ok(config)
    }

    /// Distribution URL for `tool`: the override if set, else the default.
    #[must_use]
    pub fn url_for(&self, tool: ToolId) -> &str {
        self.url_overrides
            .get(&tool)
            .map_or(ToolSpec::get(tool).default_url, String::as_str)
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::configuration(format!(
            "{key} must be a boolean (true/false), got '{value}'"
        ))),
    }
}

fn parse_seconds(env: &dyn EnvSource, key: &str) -> Result<Option<Duration>> {
    let Some(raw) = env.var(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(|secs| Some(Duration::from_secs(secs)))
        .map_err(|_| {
            Error::configuration(format!("{key} must be a whole number of seconds, got '{raw}'"))
        })
}

fn load_project_parameters(project_root: &Path) -> Result<ParameterSet> {
    let path = project_root.join(PROJECT_CONFIG_FILE);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ParameterSet::new()),
        Err(e) => return Err(Error::io(e, &path, "read")),
    };
    let file: ProjectFile = toml::from_str(&content).map_err(|e| {
        Error::configuration_with_help(
            format!("Invalid {}: {e}", path.display()),
            "Parameters are declared as [[parameter]] tables with name and value keys",
        )
    })?;
    file.parameter.validate()?;
    Ok(file.parameter)
}
