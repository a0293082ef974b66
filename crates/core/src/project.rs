//! Project layout and script lookup.
//!
//! A project keeps scripts of each kind in a fixed directory:
//!
//! | Kind | Directory | Extension |
//! |------|-----------|-----------|
//! | pigscript | `pigscripts/` | `.pig` |
//! | controlscript | `controlscripts/` | `.py` |
//! | workflowscript | `workflowscripts/` | `.py` |

use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::{Error, Result};

/// Kind of script stored in a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptKind {
    /// Data-flow script run by the runtime engine.
    PigScript,
    /// Python control script driving the runtime engine.
    ControlScript,
    /// Workflow script run by the system Python interpreter.
    WorkflowScript,
}

impl ScriptKind {
    /// Directory under the project root.
    #[must_use]
    pub fn directory(self) -> &'static str {
        match self {
            Self::PigScript => "pigscripts",
            Self::ControlScript => "controlscripts",
            Self::WorkflowScript => "workflowscripts",
        }
    }

    /// File extension, without the dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::PigScript => "pig",
            Self::ControlScript | Self::WorkflowScript => "py",
        }
    }

    /// Singular label used in messages.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::PigScript => "pigscript",
            Self::ControlScript => "controlscript",
            Self::WorkflowScript => "workflowscript",
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A script resolved to a file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    /// File stem.
    pub name: String,
    /// Kind of script.
    pub kind: ScriptKind,
    /// Absolute path.
    pub path: PathBuf,
    /// Path relative to the project root, with `/` separators.
    pub relative_path: String,
}

/// Script lookup rooted at a project directory.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    /// Create a layout for `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Project root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All scripts of `kind`, sorted by relative path.
    #[must_use]
    pub fn scripts(&self, kind: ScriptKind) -> Vec<Script> {
        let dir = self.root.join(kind.directory());
        if !dir.is_dir() {
            return Vec::new();
        }

        let mut scripts: Vec<Script> = WalkDir::new(&dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry.path().extension().and_then(|e| e.to_str()) == Some(kind.extension())
            })
            .filter_map(|entry| self.to_script(kind, entry.path()))
            .collect();
        scripts.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        scripts
    }

    /// Relative paths of every script of `kind`, sorted.
    #[must_use]
    pub fn list(&self, kind: ScriptKind) -> Vec<String> {
        self.scripts(kind)
            .into_iter()
            .map(|s| s.relative_path)
            .collect()
    }

    /// Find a script of `kind` by bare name, file name or relative path.
    ///
    /// A bare name prefers a script directly inside the kind's directory
    /// over one nested deeper.
    #[must_use]
    pub fn find(&self, kind: ScriptKind, requested: &str) -> Option<Script> {
        let requested = requested.trim().trim_start_matches("./");
        let suffix = format!(".{}", kind.extension());
        let without_ext = requested.strip_suffix(&suffix).unwrap_or(requested);

        let scripts = self.scripts(kind);
        if without_ext.contains('/') {
            let wanted = format!("{without_ext}{suffix}");
            let nested = format!("{}/{wanted}", kind.directory());
            return scripts
                .into_iter()
                .find(|s| s.relative_path == wanted || s.relative_path == nested);
        }

        scripts
            .into_iter()
            .filter(|s| s.name == without_ext)
            .min_by_key(|s| s.relative_path.matches('/').count())
    }

    /// Resolve `requested` against each kind in turn.
    ///
    /// Fails with [`Error::ScriptNotFound`] listing every available script
    /// of the searched kinds.
    pub fn resolve(&self, kinds: &[ScriptKind], requested: &str) -> Result<Script> {
        if let Some(script) = kinds.iter().find_map(|kind| self.find(*kind, requested)) {
            return Ok(script);
        }
        Err(Error::ScriptNotFound {
            requested: requested.to_string(),
            kinds: kinds.iter().map(|k| k.label().to_string()).collect(),
            available: kinds.iter().map(|k| self.list(*k)).collect(),
        })
    }

    fn to_script(&self, kind: ScriptKind, path: &Path) -> Option<Script> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let relative_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let name = path.file_stem()?.to_string_lossy().into_owned();
        Some(Script {
            name,
            kind,
            path: path.to_path_buf(),
            relative_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[test]
    fn test_list_is_sorted_and_filtered() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "pigscripts/zeta.pig");
        touch(temp.path(), "pigscripts/alpha.pig");
        touch(temp.path(), "pigscripts/notes.txt");
        let layout = ProjectLayout::new(temp.path());
        assert_eq!(
            layout.list(ScriptKind::PigScript),
            vec!["pigscripts/alpha.pig", "pigscripts/zeta.pig"]
        );
        assert!(layout.list(ScriptKind::WorkflowScript).is_empty());
    }

    #[test]
    fn test_find_by_name_file_and_path() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "pigscripts/some_script.pig");
        let layout = ProjectLayout::new(temp.path());

        for requested in [
            "some_script",
            "some_script.pig",
            "pigscripts/some_script.pig",
            "./pigscripts/some_script.pig",
            "pigscripts/some_script",
        ] {
            let script = layout.find(ScriptKind::PigScript, requested);
            assert!(script.is_some(), "{requested} should resolve");
            assert_eq!(script.unwrap().name, "some_script");
        }
        assert!(layout.find(ScriptKind::PigScript, "other").is_none());
    }

    #[test]
    fn test_find_nested_control_script() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "controlscripts/lib/characterize_control.py");
        let layout = ProjectLayout::new(temp.path());

        let script = layout
            .find(
                ScriptKind::ControlScript,
                "controlscripts/lib/characterize_control.py",
            )
            .unwrap();
        assert_eq!(
            script.relative_path,
            "controlscripts/lib/characterize_control.py"
        );
        assert!(layout.find(ScriptKind::ControlScript, "characterize_control").is_some());
    }

    #[test]
    fn test_bare_name_prefers_top_level() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "controlscripts/lib/job.py");
        touch(temp.path(), "controlscripts/job.py");
        let layout = ProjectLayout::new(temp.path());
        let script = layout.find(ScriptKind::ControlScript, "job").unwrap();
        assert_eq!(script.relative_path, "controlscripts/job.py");
    }

    #[test]
    fn test_resolve_missing_lists_every_kind() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "pigscripts/my_other_script.pig");
        touch(temp.path(), "controlscripts/my_control_script.py");
        let layout = ProjectLayout::new(temp.path());

        let err = layout
            .resolve(
                &[ScriptKind::PigScript, ScriptKind::ControlScript],
                "pigscripts/my_script.pig",
            )
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unable to find a pigscript or controlscript for pigscripts/my_script.pig\n\n\
             Available pigscripts:\npigscripts/my_other_script.pig\n\n\
             Available controlscripts:\ncontrolscripts/my_control_script.py"
        );
    }

    #[test]
    fn test_resolve_missing_with_no_scripts() {
        let temp = TempDir::new().unwrap();
        let layout = ProjectLayout::new(temp.path());
        let err = layout
            .resolve(&[ScriptKind::WorkflowScript], "foobarbaz")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unable to find a workflowscript for foobarbaz\n\nNo workflowscripts found"
        );
    }
}
