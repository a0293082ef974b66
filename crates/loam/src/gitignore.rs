//! Keep the install root out of version control.

use loam_core::{Error, Result};
use std::path::Path;
use tracing::{debug, info};

/// Add the install root to the project's `.gitignore`.
///
/// Creates the file when absent. Returns `false` without touching anything
/// when the entry is already present or the install root lies outside the
/// project.
pub fn ensure_ignored(project_root: &Path, install_root: &Path) -> Result<bool> {
    let Ok(relative) = install_root.strip_prefix(project_root) else {
        debug!(install_root = %install_root.display(), "Install root is outside the project");
        return Ok(false);
    };
    let relative = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if relative.is_empty() {
        return Ok(false);
    }

    let path = project_root.join(".gitignore");
    let existing = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(Error::io(e, &path, "read")),
    };

    let accepted = [
        relative.clone(),
        format!("{relative}/"),
        format!("/{relative}"),
        format!("/{relative}/"),
    ];
    if existing
        .lines()
        .map(str::trim)
        .any(|line| accepted.iter().any(|a| a == line))
    {
        return Ok(false);
    }

    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&relative);
    updated.push('\n');
    std::fs::write(&path, updated).map_err(|e| Error::io(e, &path, "write"))?;
    info!(entry = %relative, "Added install root to .gitignore");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_creates_gitignore() {
        let temp = TempDir::new().unwrap();
        let added = ensure_ignored(temp.path(), &temp.path().join(".loam-local")).unwrap();
        assert!(added);
        assert_eq!(
            std::fs::read_to_string(temp.path().join(".gitignore")).unwrap(),
            ".loam-local\n"
        );
    }

    #[test]
    fn test_appends_once() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(".gitignore"), "target").unwrap();
        let root = temp.path().join(".loam-local");

        assert!(ensure_ignored(temp.path(), &root).unwrap());
        assert!(!ensure_ignored(temp.path(), &root).unwrap());
        assert_eq!(
            std::fs::read_to_string(temp.path().join(".gitignore")).unwrap(),
            "target\n.loam-local\n"
        );
    }

    #[test]
    fn test_existing_variants_are_recognized() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(".gitignore"), "/vendor/tools/\n").unwrap();
        assert!(!ensure_ignored(temp.path(), &temp.path().join("vendor/tools")).unwrap());
    }

    #[test]
    fn test_outside_project_is_skipped() {
        let project = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        assert!(!ensure_ignored(project.path(), elsewhere.path()).unwrap());
        assert!(!project.path().join(".gitignore").exists());
    }
}
