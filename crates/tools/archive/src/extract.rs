//! Archive extraction and top-level directory naming.
//!
//! Upstream distributions embed version and platform qualifiers in the
//! name of their single top-level directory. [`archive_dir_name`] derives
//! that name from the archive's file name so the install manager can rename
//! it to the tool's canonical install directory.

use flate2::read::GzDecoder;
use loam_core::tools::ArchiveDirRule;
use loam_core::{Error, Result};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path};
use tar::Archive;
use tracing::{debug, trace};

/// Compression suffixes stripped when deriving a directory name.
const ARCHIVE_SUFFIXES: [&str; 4] = [".tar.gz", ".tgz", ".tar", ".zip"];

/// Distribution format, inferred from the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// gzip-compressed tarball (`.tar.gz`, `.tgz`).
    TarGz,
    /// Uncompressed tarball.
    Tar,
    /// Zip archive.
    Zip,
    /// Any other file; used as-is.
    Raw,
}

impl ArchiveFormat {
    /// Infer the format from a file name.
    #[must_use]
    pub fn from_file_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Self::TarGz
        } else if lower.ends_with(".tar") {
            Self::Tar
        } else if lower.ends_with(".zip") {
            Self::Zip
        } else {
            Self::Raw
        }
    }
}

/// Result of unpacking an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    /// Names of the directories found at the top level of the archive.
    pub top_level_dirs: BTreeSet<String>,
}

/// Name of the top-level directory an archive is expected to contain.
///
/// Returns `None` for [`ArchiveDirRule::RawFile`], which has no directory.
///
/// ```text
/// sqoop-1.4.4.bin__hadoop-1.0.0.tar.gz  StripSuffix          sqoop-1.4.4.bin__hadoop-1.0.0
/// hadoop-1.0.3-bin.tar.gz               KeepDashSegments(2)  hadoop-1.0.3
/// ```
#[must_use]
pub fn archive_dir_name(file_name: &str, rule: ArchiveDirRule) -> Option<String> {
    let stem = ARCHIVE_SUFFIXES
        .iter()
        .find_map(|suffix| file_name.strip_suffix(suffix))
        .unwrap_or(file_name);

    match rule {
        ArchiveDirRule::StripSuffix => Some(stem.to_string()),
        ArchiveDirRule::KeepDashSegments(segments) => Some(
            stem.split('-')
                .take(segments.max(1))
                .collect::<Vec<_>>()
                .join("-"),
        ),
        ArchiveDirRule::RawFile => None,
    }
}

/// Pick the extracted directory to rename into place.
///
/// Prefers the name derived from the archive file name; if the archive
/// holds exactly one top-level directory under a different name, that one
/// is used instead.
#[must_use]
pub fn extracted_root(file_name: &str, rule: ArchiveDirRule, extracted: &Extracted) -> Option<String> {
    let expected = archive_dir_name(file_name, rule)?;
    if extracted.top_level_dirs.contains(&expected) {
        return Some(expected);
    }

    if extracted.top_level_dirs.len() == 1 {
        let only = extracted.top_level_dirs.iter().next().cloned();
        debug!(?expected, found = ?only, "Archive directory differs from file name");
        return only;
    }
    None
}

/// Extract `archive` into `dest`, creating `dest` if needed.
///
/// Fails with [`Error::CorruptArchive`] when the archive cannot be decoded
/// or its format is not recognized.
pub fn extract(archive: &Path, dest: &Path) -> Result<Extracted> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    debug!(?archive, ?dest, "Extracting archive");

    std::fs::create_dir_all(dest).map_err(|e| Error::io(e, dest, "create"))?;
    match ArchiveFormat::from_file_name(name) {
        ArchiveFormat::TarGz => {
            let file = File::open(archive).map_err(|e| Error::io(e, archive, "open"))?;
            extract_tar(archive, GzDecoder::new(file), dest)
        }
        ArchiveFormat::Tar => {
            let file = File::open(archive).map_err(|e| Error::io(e, archive, "open"))?;
            extract_tar(archive, file, dest)
        }
        ArchiveFormat::Zip => extract_zip(archive, dest),
        ArchiveFormat::Raw => Err(Error::corrupt_archive(
            archive,
            "unrecognized archive format (expected .tar.gz, .tgz, .tar or .zip)",
        )),
    }
}

fn extract_tar<R: Read>(archive_path: &Path, reader: R, dest: &Path) -> Result<Extracted> {
    let mut archive = Archive::new(reader);
    let corrupt = |e: std::io::Error| Error::corrupt_archive(archive_path, e.to_string());

    let mut extracted = Extracted::default();
    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let kind = entry.header().entry_type();
        if kind.is_pax_global_extensions() {
            continue;
        }

        let path = entry.path().map_err(corrupt)?.into_owned();
        trace!(?path, "Unpacking entry");
        record_top_level(&mut extracted, &path, kind.is_dir());
        entry.unpack_in(dest).map_err(corrupt)?;
    }

    Ok(extracted)
}

fn extract_zip(archive_path: &Path, dest: &Path) -> Result<Extracted> {
    let file = File::open(archive_path).map_err(|e| Error::io(e, archive_path, "open"))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| Error::corrupt_archive(archive_path, e.to_string()))?;

    let mut extracted = Extracted::default();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| Error::corrupt_archive(archive_path, e.to_string()))?;

        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        record_top_level(&mut extracted, &relative, entry.is_dir());

        let outpath = dest.join(&relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&outpath).map_err(|e| Error::io(e, &outpath, "create"))?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create"))?;
        }
        let mut out = File::create(&outpath).map_err(|e| Error::io(e, &outpath, "create"))?;
        std::io::copy(&mut entry, &mut out)
            .map_err(|e| Error::corrupt_archive(archive_path, e.to_string()))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))
                .map_err(|e| Error::io(e, &outpath, "chmod"))?;
        }
    }

    Ok(extracted)
}

/// Record the first path component if it names a directory.
fn record_top_level(extracted: &mut Extracted, path: &Path, is_dir: bool) {
    let mut parts = path.components().filter_map(|c| match c {
        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
        _ => None,
    });
    let Some(first) = parts.next() else {
        return;
    };
    if is_dir || parts.next().is_some() {
        extracted.top_level_dirs.insert(first);
    }
}
