//! Archive-based tool provisioning for loam.
//!
//! This crate provides functionality to:
//! - Resolve a tool's distribution URL and stream it to a staging path
//! - Extract tar.gz, zip and raw single-file distributions
//! - Decide whether an installed tool is stale
//! - Install, update and verify tools under the local install root
//!
//! # Example
//!
//! ```ignore
//! use loam_core::config::LocalConfig;
//! use loam_core::tools::ToolId;
//! use loam_tools_archive::InstallManager;
//!
//! let config = LocalConfig::new("/work/project");
//! let mut manager = InstallManager::new(&config)?;
//! manager.install_or_update(ToolId::Sqoop).await?;
//! ```

mod extract;
mod fetch;
mod install;
mod version;

pub use extract::{ArchiveFormat, Extracted, archive_dir_name, extract, extracted_root};
pub use fetch::{ArchiveFetcher, Download, archive_file_name};
pub use install::{InstallAction, InstallManager, InstallReport};
pub use version::{RemoteProbe, UpdateCheck, UrlProbe, VersionOracle, VersionToken};
