//! Immutable tool descriptions.
//!
//! The catalog is process-wide static data. Each supported tool has exactly
//! one [`ToolSpec`], looked up through [`ToolSpec::get`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Supported runtime engine versions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum PigVersion {
    /// Pig 0.9 (default).
    #[default]
    Pig09,
    /// Pig 0.12.
    Pig012,
}

impl PigVersion {
    /// All supported versions, default first.
    pub const ALL: [Self; 2] = [Self::Pig09, Self::Pig012];

    /// Short version string accepted on the command line.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pig09 => "0.9",
            Self::Pig012 => "0.12",
        }
    }

    /// Parse a version string like "0.12".
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "0.9" => Some(Self::Pig09),
            "0.12" => Some(Self::Pig012),
            _ => None,
        }
    }

    /// Comma separated list of accepted values, for help and error text.
    #[must_use]
    pub fn options() -> String {
        Self::ALL
            .iter()
            .map(|v| {
                if *v == Self::default() {
                    format!("{} (default)", v.as_str())
                } else {
                    v.as_str().to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for PigVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PigVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            format!(
                "Unsupported pig version '{s}'. Options are {}",
                Self::options()
            )
        })
    }
}

/// Identifier of a provisioned tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ToolId {
    /// Runtime engine at a specific version.
    Pig(PigVersion),
    /// Script engine for control scripts and UDFs.
    Jython,
    /// Distributed-filesystem runtime.
    Hadoop,
    /// Import/export connector.
    Sqoop,
}

impl ToolId {
    /// Every tool in the catalog.
    pub const ALL: [Self; 5] = [
        Self::Pig(PigVersion::Pig09),
        Self::Pig(PigVersion::Pig012),
        Self::Jython,
        Self::Hadoop,
        Self::Sqoop,
    ];

    /// Stable identifier used in logs, records and errors.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        ToolSpec::get(self).name
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a tool is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolRole {
    /// Executes data-flow scripts.
    RuntimeEngine,
    /// Executes control scripts and user-defined functions.
    ScriptEngine,
    /// Moves data between databases and storage.
    ImportExportConnector,
    /// Filesystem runtime the connector runs on.
    FilesystemRuntime,
}

impl fmt::Display for ToolRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RuntimeEngine => "runtime engine",
            Self::ScriptEngine => "script engine",
            Self::ImportExportConnector => "import/export connector",
            Self::FilesystemRuntime => "filesystem runtime",
        })
    }
}

/// How the top-level directory inside an archive is named.
///
/// Upstream archives embed version and platform qualifiers in their
/// top-level directory; the rule derives that name from the archive file
/// name so it can be renamed to the tool's canonical directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveDirRule {
    /// File name minus its compression suffix
    /// (`sqoop-1.4.4.bin__hadoop-1.0.0.tar.gz` -> `sqoop-1.4.4.bin__hadoop-1.0.0`).
    StripSuffix,
    /// File name minus its compression suffix, keeping only the first
    /// `segments` dash separated parts (`hadoop-1.0.3-bin.tar.gz` -> `hadoop-1.0.3`).
    KeepDashSegments(usize),
    /// The download is the artifact itself; it is placed at the
    /// executable path without extraction.
    RawFile,
}

/// Immutable description of one provisioned tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolSpec {
    /// Tool identifier.
    pub id: ToolId,
    /// Stable name (`pig-0.9`, `jython`, ...).
    pub name: &'static str,
    /// What the tool is used for.
    pub role: ToolRole,
    /// Canonical distribution URL.
    pub default_url: &'static str,
    /// Environment variable that overrides [`Self::default_url`].
    pub url_env: &'static str,
    /// Directory name under the install root.
    pub install_dir: &'static str,
    /// Main executable, relative to the install directory.
    pub executable: &'static str,
    /// Permission bits forced onto the executable after extraction.
    pub mode: u32,
    /// Naming rule for the archive's top-level directory.
    pub archive_dir: ArchiveDirRule,
    /// Tools installed before this one as part of the same operation.
    pub bundles: &'static [ToolId],
}

static PIG_09: ToolSpec = ToolSpec {
    id: ToolId::Pig(PigVersion::Pig09),
    name: "pig-0.9",
    role: ToolRole::RuntimeEngine,
    default_url: "https://archive.apache.org/dist/pig/pig-0.9.2/pig-0.9.2.tar.gz",
    url_env: "PIG_09_DISTRO_URL",
    install_dir: "pig-0.9",
    executable: "bin/pig",
    mode: 0o755,
    archive_dir: ArchiveDirRule::StripSuffix,
    bundles: &[],
};

static PIG_012: ToolSpec = ToolSpec {
    id: ToolId::Pig(PigVersion::Pig012),
    name: "pig-0.12",
    role: ToolRole::RuntimeEngine,
    default_url: "https://archive.apache.org/dist/pig/pig-0.12.1/pig-0.12.1.tar.gz",
    url_env: "PIG_012_DISTRO_URL",
    install_dir: "pig-0.12",
    executable: "bin/pig",
    mode: 0o755,
    archive_dir: ArchiveDirRule::StripSuffix,
    bundles: &[],
};

static JYTHON: ToolSpec = ToolSpec {
    id: ToolId::Jython,
    name: "jython",
    role: ToolRole::ScriptEngine,
    default_url: "https://repo1.maven.org/maven2/org/python/jython-standalone/2.5.3/jython-standalone-2.5.3.jar",
    url_env: "JYTHON_DISTRO_URL",
    install_dir: "jython",
    executable: "jython.jar",
    mode: 0o644,
    archive_dir: ArchiveDirRule::RawFile,
    bundles: &[],
};

static HADOOP: ToolSpec = ToolSpec {
    id: ToolId::Hadoop,
    name: "hadoop",
    role: ToolRole::FilesystemRuntime,
    default_url: "https://archive.apache.org/dist/hadoop/core/hadoop-1.0.3/hadoop-1.0.3-bin.tar.gz",
    url_env: "HADOOP_DISTRO_URL",
    install_dir: "hadoop",
    executable: "bin/hadoop",
    mode: 0o755,
    archive_dir: ArchiveDirRule::KeepDashSegments(2),
    bundles: &[],
};

static SQOOP: ToolSpec = ToolSpec {
    id: ToolId::Sqoop,
    name: "sqoop",
    role: ToolRole::ImportExportConnector,
    default_url: "https://archive.apache.org/dist/sqoop/1.4.4/sqoop-1.4.4.bin__hadoop-1.0.0.tar.gz",
    url_env: "SQOOP_DISTRO_URL",
    install_dir: "sqoop",
    executable: "bin/sqoop",
    mode: 0o755,
    archive_dir: ArchiveDirRule::StripSuffix,
    bundles: &[ToolId::Hadoop],
};

impl ToolSpec {
    /// Look up the spec for a tool.
    #[must_use]
    pub fn get(id: ToolId) -> &'static Self {
        match id {
            ToolId::Pig(PigVersion::Pig09) => &PIG_09,
            ToolId::Pig(PigVersion::Pig012) => &PIG_012,
            ToolId::Jython => &JYTHON,
            ToolId::Hadoop => &HADOOP,
            ToolId::Sqoop => &SQOOP,
        }
    }

    /// Install directory under `root`.
    #[must_use]
    pub fn install_path(&self, root: &Path) -> PathBuf {
        root.join(self.install_dir)
    }

    /// Main executable under `root`.
    #[must_use]
    pub fn executable_path(&self, root: &Path) -> PathBuf {
        self.install_path(root).join(self.executable)
    }
}
