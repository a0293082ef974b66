//! Install state derived from the filesystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::trace;

use super::spec::{ToolId, ToolSpec};
use crate::{Error, Result};

/// File written inside an install directory once an install completes.
pub const INSTALL_RECORD_FILE: &str = ".loam-install.json";

/// Metadata recorded after a successful install.
///
/// Written last, so its presence marks a completed install. It never
/// replaces the executable check in [`InstallState::probe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRecord {
    /// Tool name.
    pub tool: String,
    /// Version token resolved when the install happened, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<String>,
    /// URL the archive was downloaded from.
    pub url: String,
    /// SHA256 of the downloaded archive.
    pub sha256: String,
    /// When the install completed.
    pub installed_at: DateTime<Utc>,
}

impl InstallRecord {
    /// Path of the record inside `install_dir`.
    #[must_use]
    pub fn path(install_dir: &Path) -> PathBuf {
        install_dir.join(INSTALL_RECORD_FILE)
    }

    /// Read the record from `install_dir`.
    ///
    /// Returns `None` when the file is absent or unreadable; a damaged
    /// record is treated the same as a missing one.
    #[must_use]
    pub fn read(install_dir: &Path) -> Option<Self> {
        let path = Self::path(install_dir);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                trace!(?path, error = %e, "Ignoring unreadable install record");
                None
            }
        }
    }

    /// Write the record into `install_dir`.
    pub fn write(&self, install_dir: &Path) -> Result<()> {
        let path = Self::path(install_dir);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::configuration(format!("Failed to serialize install record: {e}")))?;
        std::fs::write(&path, json).map_err(|e| Error::io(e, &path, "write"))
    }
}

/// Observed state of an installed tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallState {
    /// Tool identifier.
    pub tool: ToolId,
    /// Version token from the install record.
    pub version: Option<String>,
    /// Install directory.
    pub install_dir: PathBuf,
}

impl InstallState {
    /// Probe the filesystem for a completed install of `tool` under `root`.
    ///
    /// A tool counts as installed only when its executable exists with the
    /// expected permission bits and its install record is present. A
    /// directory left behind by an interrupted install fails this check.
    #[must_use]
    pub fn probe(tool: ToolId, root: &Path) -> Option<Self> {
        let spec = ToolSpec::get(tool);
        let install_dir = spec.install_path(root);
        let executable = spec.executable_path(root);

        if !executable_ok(&executable, spec.mode) {
            trace!(%tool, ?executable, "Executable missing or not permitted");
            return None;
        }

        let record = InstallRecord::read(&install_dir)?;
        Some(Self {
            tool,
            version: record.version,
            install_dir,
        })
    }
}

#[cfg(unix)]
fn executable_ok(path: &Path, mode: u32) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & mode == mode)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn executable_ok(path: &Path, _mode: u32) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::PigVersion;
    use tempfile::TempDir;

    fn record(version: Option<&str>) -> InstallRecord {
        InstallRecord {
            tool: "pig-0.9".into(),
            version: version.map(String::from),
            url: "file:///tmp/pig-0.9.2.tar.gz".into(),
            sha256: "abc".into(),
            installed_at: Utc::now(),
        }
    }

    fn write_executable(root: &Path, tool: ToolId, mode: u32) {
        let spec = ToolSpec::get(tool);
        let exe = spec.executable_path(root);
        std::fs::create_dir_all(exe.parent().unwrap()).unwrap();
        std::fs::write(&exe, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(mode)).unwrap();
        }
    }

    #[test]
    fn test_probe_empty_root() {
        let temp = TempDir::new().unwrap();
        assert!(InstallState::probe(ToolId::Pig(PigVersion::Pig09), temp.path()).is_none());
    }

    #[test]
    fn test_probe_directory_without_executable() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("pig-0.9")).unwrap();
        assert!(InstallState::probe(ToolId::Pig(PigVersion::Pig09), temp.path()).is_none());
    }

    #[test]
    fn test_probe_executable_without_record() {
        let temp = TempDir::new().unwrap();
        let tool = ToolId::Pig(PigVersion::Pig09);
        write_executable(temp.path(), tool, 0o755);
        assert!(InstallState::probe(tool, temp.path()).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_probe_rejects_missing_exec_bit() {
        let temp = TempDir::new().unwrap();
        let tool = ToolId::Pig(PigVersion::Pig09);
        write_executable(temp.path(), tool, 0o644);
        record(None)
            .write(&ToolSpec::get(tool).install_path(temp.path()))
            .unwrap();
        assert!(InstallState::probe(tool, temp.path()).is_none());
    }

    #[test]
    fn test_probe_complete_install() {
        let temp = TempDir::new().unwrap();
        let tool = ToolId::Pig(PigVersion::Pig09);
        write_executable(temp.path(), tool, 0o755);
        let dir = ToolSpec::get(tool).install_path(temp.path());
        record(Some("0.9.2")).write(&dir).unwrap();

        let state = InstallState::probe(tool, temp.path()).unwrap();
        assert_eq!(state.tool, tool);
        assert_eq!(state.version.as_deref(), Some("0.9.2"));
        assert_eq!(state.install_dir, dir);
    }

    #[test]
    fn test_record_roundtrip_and_corruption() {
        let temp = TempDir::new().unwrap();
        let rec = record(Some("1.0.3"));
        rec.write(temp.path()).unwrap();
        assert_eq!(InstallRecord::read(temp.path()), Some(rec));

        std::fs::write(InstallRecord::path(temp.path()), "{not json").unwrap();
        assert!(InstallRecord::read(temp.path()).is_none());
    }
}
