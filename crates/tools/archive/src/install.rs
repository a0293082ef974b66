//! Per-tool install and update pipeline.
//!
//! Each tool is installed by a linear sequence of fallible steps. A failure
//! aborts the remaining steps and is reported as [`Error::Install`] naming
//! the step:
//!
//! 1. clear staging: remove a leftover archive and staging directory
//! 2. download the archive next to the install directories
//! 3. remove the previous install directory
//! 4. extract into a staging directory (raw files are moved into place)
//! 5. normalize: rename the extracted top-level directory to the canonical name
//! 6. force the executable's permission bits
//! 7. cleanup: delete the archive and staging directory
//! 8. write the install record
//!
//! The record is written last, so an interrupted run leaves a directory
//! that [`InstallState::probe`] rejects and the next run replaces.

use chrono::Utc;
use loam_core::config::LocalConfig;
use loam_core::tools::{ArchiveDirRule, InstallRecord, InstallState, ToolId, ToolSpec};
use loam_core::{Error, InstallStep, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::extract::{self, Extracted};
use crate::fetch::{ArchiveFetcher, Download, archive_file_name};
use crate::version::{RemoteProbe, UrlProbe, VersionOracle, VersionToken};

/// What [`InstallManager::install_or_update`] did for one tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallAction {
    /// Nothing was installed before.
    Installed,
    /// A previous install was replaced.
    Updated,
    /// The tool was already installed and current; nothing was touched.
    Unchanged,
}

impl fmt::Display for InstallAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Installed => "installed",
            Self::Updated => "updated",
            Self::Unchanged => "up to date",
        })
    }
}

/// Outcome for one tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Tool identifier.
    pub tool: ToolId,
    /// What happened.
    pub action: InstallAction,
    /// Install directory.
    pub install_dir: PathBuf,
    /// Recorded version token, if any.
    pub version: Option<String>,
}

/// Installs, updates and verifies tools under the install root.
///
/// Verification results are memoized for the lifetime of the manager,
/// which is one command invocation; an install invalidates its own entry.
pub struct InstallManager {
    config: LocalConfig,
    check_updates: bool,
    fetcher: ArchiveFetcher,
    oracle: VersionOracle,
    verified: HashMap<ToolId, Option<InstallState>>,
}

impl InstallManager {
    /// Create a manager for `config`.
    ///
    /// Remote update checks follow `config.check_updates`.
    pub fn new(config: &LocalConfig) -> Result<Self> {
        let fetcher = ArchiveFetcher::new(config.timeouts.download)?;
        let oracle = VersionOracle::new(Box::new(UrlProbe::new(fetcher.client().clone())));
        Ok(Self {
            config: config.clone(),
            check_updates: config.check_updates,
            fetcher,
            oracle,
            verified: HashMap::new(),
        })
    }

    /// Replace the remote version probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Box<dyn RemoteProbe>) -> Self {
        self.oracle = VersionOracle::new(probe);
        self
    }

    /// Enable or disable remote update checks.
    #[must_use]
    pub fn with_update_checks(mut self, enabled: bool) -> Self {
        self.check_updates = enabled;
        self
    }

    /// Enable or disable remote update checks on an existing manager.
    pub fn set_update_checks(&mut self, enabled: bool) {
        self.check_updates = enabled;
    }

    /// Install root directory.
    #[must_use]
    pub fn install_root(&self) -> &Path {
        &self.config.install_root
    }

    /// Verified install state of `tool`, probing the filesystem once.
    pub fn installed(&mut self, tool: ToolId) -> Option<InstallState> {
        let root = &self.config.install_root;
        self.verified
            .entry(tool)
            .or_insert_with(|| InstallState::probe(tool, root))
            .clone()
    }

    /// Whether `tool` or a tool it bundles is missing or unverified.
    pub fn should_install(&mut self, tool: ToolId) -> bool {
        let missing: Vec<ToolId> = with_bundles(tool)
            .into_iter()
            .filter(|t| self.installed(*t).is_none())
            .collect();
        if !missing.is_empty() {
            debug!(%tool, ?missing, "Install required");
        }
        !missing.is_empty()
    }

    /// Whether a newer distribution is available for `tool` or a tool it
    /// bundles. Always `false` when update checks are disabled.
    pub async fn should_update(&mut self, tool: ToolId) -> bool {
        if !self.check_updates {
            return false;
        }
        for t in with_bundles(tool) {
            let installed = self.installed(t);
            let url = ArchiveFetcher::resolve_url(&self.config, t);
            if self.oracle.is_newer_version(t, &url, installed.as_ref()).await {
                info!(tool = %t, "Update available");
                return true;
            }
        }
        false
    }

    /// Bring `tool` to an installed, current state.
    ///
    /// A no-op when the tool and its bundles are installed and not stale.
    /// Otherwise bundled tools are installed first, then `tool`; every
    /// one must succeed.
    pub async fn install_or_update(&mut self, tool: ToolId) -> Result<Vec<InstallReport>> {
        let install = self.should_install(tool);
        let update = !install && self.should_update(tool).await;

        if !install && !update {
            debug!(%tool, "Already installed and current");
            let state = self.installed(tool);
            return Ok(vec![InstallReport {
                tool,
                action: InstallAction::Unchanged,
                install_dir: ToolSpec::get(tool).install_path(self.install_root()),
                version: state.and_then(|s| s.version),
            }]);
        }

        let mut reports = Vec::new();
        for bundled in ToolSpec::get(tool).bundles {
            reports.push(self.install_one(*bundled).await?);
        }
        reports.push(self.install_one(tool).await?);
        Ok(reports)
    }

    async fn install_one(&mut self, tool: ToolId) -> Result<InstallReport> {
        let spec = ToolSpec::get(tool);
        let url = ArchiveFetcher::resolve_url(&self.config, tool);
        let root = self.config.install_root.clone();
        let install_dir = spec.install_path(&root);
        let previous = self.installed(tool).is_some();
        let at = |step: InstallStep| move |e: Error| Error::install(spec.name, step, e);

        info!(%tool, role = %spec.role, %url, "Installing");

        // 1. clear staging
        let file_name = archive_file_name(&url).map_err(at(InstallStep::Download))?;
        let archive = root.join(&file_name);
        let staging = root.join(format!(".{}.staging", spec.install_dir));
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::io(e, &root, "create"))
            .map_err(at(InstallStep::ClearStaging))?;
        remove_file_if_exists(&archive).map_err(at(InstallStep::ClearStaging))?;
        remove_dir_if_exists(&staging).map_err(at(InstallStep::ClearStaging))?;

        // 2. download
        let download = self
            .fetcher
            .download(&url, &archive)
            .await
            .map_err(at(InstallStep::Download))?;

        // 3. remove previous install
        self.verified.remove(&tool);
        remove_dir_if_exists(&install_dir).map_err(at(InstallStep::RemovePrevious))?;

        // 4-5. extract and normalize
        match spec.archive_dir {
            ArchiveDirRule::RawFile => {
                place_raw(&archive, &spec.executable_path(&root))
                    .map_err(at(InstallStep::Extract))?;
            }
            rule => {
                let extracted = extract_blocking(archive.clone(), staging.clone())
                    .await
                    .map_err(at(InstallStep::Extract))?;
                let dir = extract::extracted_root(&file_name, rule, &extracted)
                    .ok_or_else(|| {
                        Error::corrupt_archive(
                            &archive,
                            format!(
                                "cannot determine top-level directory (found {:?})",
                                extracted.top_level_dirs
                            ),
                        )
                    })
                    .map_err(at(InstallStep::Normalize))?;
                let from = staging.join(&dir);
                debug!(?from, to = ?install_dir, "Normalizing install directory");
                std::fs::rename(&from, &install_dir)
                    .map_err(|e| Error::io(e, &from, "rename"))
                    .map_err(at(InstallStep::Normalize))?;
            }
        }

        // 6. permissions
        let executable = spec.executable_path(&root);
        if !executable.is_file() {
            return Err(at(InstallStep::Permissions)(Error::corrupt_archive(
                &archive,
                format!("archive does not contain {}", spec.executable),
            )));
        }
        set_mode(&executable, spec.mode).map_err(at(InstallStep::Permissions))?;

        // 7. cleanup
        remove_file_if_exists(&archive).map_err(at(InstallStep::Cleanup))?;
        remove_dir_if_exists(&staging).map_err(at(InstallStep::Cleanup))?;

        // 8. record
        let version = recorded_version(&download, &file_name);
        InstallRecord {
            tool: spec.name.to_string(),
            version: version.clone(),
            url: url.clone(),
            sha256: download.sha256.clone(),
            installed_at: Utc::now(),
        }
        .write(&install_dir)
        .map_err(at(InstallStep::Record))?;

        if self.installed(tool).is_none() {
            return Err(at(InstallStep::Record)(Error::configuration(format!(
                "{} did not verify after install",
                executable.display()
            ))));
        }

        let action = if previous {
            InstallAction::Updated
        } else {
            InstallAction::Installed
        };
        info!(%tool, %action, version = version.as_deref().unwrap_or("unknown"), "Install complete");

        Ok(InstallReport {
            tool,
            action,
            install_dir,
            version,
        })
    }
}

fn with_bundles(tool: ToolId) -> Vec<ToolId> {
    let mut tools = ToolSpec::get(tool).bundles.to_vec();
    tools.push(tool);
    tools
}

/// Version token stored in the install record, resolved the same way the
/// update probe resolves the remote one.
fn recorded_version(download: &Download, file_name: &str) -> Option<String> {
    download
        .last_modified
        .map(VersionToken::Date)
        .or_else(|| VersionToken::from_file_name(file_name))
        .map(|token| token.to_string())
}

async fn extract_blocking(archive: PathBuf, dest: PathBuf) -> Result<Extracted> {
    let task_archive = archive.clone();
    tokio::task::spawn_blocking(move || extract::extract(&task_archive, &dest))
        .await
        .map_err(|e| Error::io(std::io::Error::other(e.to_string()), &archive, "extract"))?
}

fn place_raw(archive: &Path, executable: &Path) -> Result<()> {
    if let Some(parent) = executable.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create"))?;
    }
    std::fs::rename(archive, executable).map_err(|e| Error::io(e, archive, "rename"))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| Error::io(e, path, "chmod"))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::io(e, path, "remove")),
        _ => Ok(()),
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::io(e, path, "remove")),
        _ => Ok(()),
    }
}
