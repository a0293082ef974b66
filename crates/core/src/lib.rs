// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

//! Core types and error handling for loam.
//!
//! loam provisions a local, single-machine toolchain (runtime engine, script
//! engine, import/export connector, distributed-filesystem runtime) and runs
//! data-flow scripts against it. This crate holds the pieces shared by every
//! layer:
//!
//! - [`Error`] - the error taxonomy surfaced to the user
//! - [`config`] - configuration resolved once at process start
//! - [`tools`] - the static tool catalog and on-disk install state
//! - [`params`] - ordered script parameters
//! - [`project`] - project layout and script lookup

pub mod config;
pub mod params;
pub mod project;
pub mod tools;

use miette::Diagnostic;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Stage of the per-tool install pipeline.
///
/// Carried by [`Error::Install`] so a failure names the step that broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallStep {
    /// Removing a leftover archive from a previous attempt.
    ClearStaging,
    /// Downloading the distribution archive.
    Download,
    /// Removing the previous install directory.
    RemovePrevious,
    /// Unpacking the archive into the install root.
    Extract,
    /// Renaming the extracted directory to its canonical name.
    Normalize,
    /// Forcing the executable permission bits.
    Permissions,
    /// Deleting the downloaded archive and staging directory.
    Cleanup,
    /// Writing the install record.
    Record,
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ClearStaging => "clear staging",
            Self::Download => "download",
            Self::RemovePrevious => "remove previous install",
            Self::Extract => "extract",
            Self::Normalize => "normalize directory",
            Self::Permissions => "set permissions",
            Self::Cleanup => "cleanup",
            Self::Record => "record install",
        };
        f.write_str(name)
    }
}

/// Main error type for loam operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Remote host unreachable or non-2xx response.
    #[error("Network error fetching {url}: {message}")]
    #[diagnostic(
        code(loam::network),
        help("Check your connection or point the tool at a mirror with its *_DISTRO_URL variable, then re-run")
    )]
    Network {
        /// URL being fetched
        url: String,
        /// Description of the failure
        message: String,
    },

    /// The transfer ended before the advertised length was received.
    #[error("Download of {url} was truncated: received {received} of {expected} bytes")]
    #[diagnostic(code(loam::download_incomplete), help("Re-run the command to retry the download"))]
    DownloadIncomplete {
        /// URL being fetched
        url: String,
        /// Bytes advertised by the server
        expected: u64,
        /// Bytes actually written
        received: u64,
    },

    /// Archive could not be decoded.
    #[error("Corrupt archive {}: {message}", path.display())]
    #[diagnostic(code(loam::corrupt_archive))]
    CorruptArchive {
        /// Archive on disk
        path: Box<Path>,
        /// Decoder message
        message: String,
    },

    /// A tool install or update failed at a specific step.
    #[error("Failed to install {tool} ({step}): {source}")]
    #[diagnostic(
        code(loam::install),
        help("Re-run the command; the partially installed directory is replaced on the next attempt")
    )]
    Install {
        /// Tool identifier
        tool: String,
        /// Pipeline step that failed
        step: InstallStep,
        /// Underlying cause
        #[source]
        source: Box<Error>,
    },

    /// A template referenced a parameter that was not supplied.
    #[error("Missing template parameter '{key}'")]
    #[diagnostic(code(loam::missing_parameter))]
    MissingParameter {
        /// Placeholder name
        key: String,
    },

    /// A required system prerequisite (e.g. Java) is absent.
    #[error("{name} is required but could not be found")]
    #[diagnostic(code(loam::prerequisite_missing))]
    PrerequisiteMissing {
        /// Prerequisite name
        name: String,
        /// What the user should do about it
        #[help]
        help: String,
    },

    /// A script name did not resolve to a file in the project.
    #[error("{}", script_not_found_message(requested, kinds, available))]
    #[diagnostic(code(loam::script_not_found))]
    ScriptNotFound {
        /// Name or path the user asked for
        requested: String,
        /// Human-readable kinds searched, e.g. `["pigscript", "controlscript"]`
        kinds: Vec<String>,
        /// Available scripts per kind, in the same order as `kinds`
        available: Vec<Vec<String>>,
    },

    /// The tool ran but exited unsuccessfully.
    #[error("Command exited with status {code}")]
    #[diagnostic(code(loam::non_zero_exit), help("Check the output above for details"))]
    NonZeroExit {
        /// Child exit code
        code: i32,
    },

    /// Template could not be parsed or rendered.
    #[error("Template '{name}' failed: {message}")]
    #[diagnostic(code(loam::template))]
    Template {
        /// Template name
        name: String,
        /// Engine message
        message: String,
    },

    /// Invalid configuration or usage.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(loam::config))]
    Configuration {
        /// Error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },

    /// An operation exceeded its configured timeout.
    #[error("{operation} timed out after {seconds} seconds")]
    #[diagnostic(code(loam::timeout))]
    Timeout {
        /// What timed out
        operation: String,
        /// Configured limit
        seconds: u64,
    },

    /// I/O error with optional path context.
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(loam::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "create")
        operation: String,
    },
}

fn script_not_found_message(requested: &str, kinds: &[String], available: &[Vec<String>]) -> String {
    let mut out = format!("Unable to find a {} for {requested}", kinds.join(" or "));
    for (kind, scripts) in kinds.iter().zip(available) {
        out.push_str("\n\n");
        if scripts.is_empty() {
            out.push_str(&format!("No {kind}s found"));
        } else {
            out.push_str(&format!("Available {kind}s:"));
            for script in scripts {
                out.push('\n');
                out.push_str(script);
            }
        }
    }
    out
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            source,
            path: None,
            operation: "operation".to_string(),
        }
    }
}

impl Error {
    /// Create a network error
    #[must_use]
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a truncated-download error
    #[must_use]
    pub fn download_incomplete(url: impl Into<String>, expected: u64, received: u64) -> Self {
        Self::DownloadIncomplete {
            url: url.into(),
            expected,
            received,
        }
    }

    /// Create a corrupt archive error
    #[must_use]
    pub fn corrupt_archive(path: &Path, message: impl Into<String>) -> Self {
        Self::CorruptArchive {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Wrap a failure as an install error for `tool` at `step`
    #[must_use]
    pub fn install(tool: impl Into<String>, step: InstallStep, source: Self) -> Self {
        Self::Install {
            tool: tool.into(),
            step,
            source: Box::new(source),
        }
    }

    /// Create a missing template parameter error
    #[must_use]
    pub fn missing_parameter(key: impl Into<String>) -> Self {
        Self::MissingParameter { key: key.into() }
    }

    /// Create a missing prerequisite error
    #[must_use]
    pub fn prerequisite_missing(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self::PrerequisiteMissing {
            name: name.into(),
            help: help.into(),
        }
    }

    /// Create a template error
    #[must_use]
    pub fn template(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Template {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
            help: None,
        }
    }

    /// Create a configuration error with help text
    #[must_use]
    pub fn configuration_with_help(msg: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
            help: Some(help.into()),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(source: std::io::Error, path: impl AsRef<Path>, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Step of a failed install, if this is an install error.
    #[must_use]
    pub fn install_step(&self) -> Option<InstallStep> {
        match self {
            Self::Install { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Whether re-running the same command may succeed without user action.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::DownloadIncomplete { .. } | Self::Timeout { .. } => true,
            Self::Install { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

/// Result type alias for loam operations
pub type Result<T> = std::result::Result<T, Error>;
