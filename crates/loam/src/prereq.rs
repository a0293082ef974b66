//! System prerequisites loam does not install itself.

use loam_core::config::LocalConfig;
use loam_core::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const JAVA_HELP: &str = "Install a Java runtime and set JAVA_HOME to its location, \
or make sure `java` is on your PATH";

const PYTHON_HELP: &str = "Install Python and make sure `python3` or `python` is on your PATH";

/// Interpreters found on the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemTools {
    /// Java launcher.
    pub java: Option<PathBuf>,
    /// `JAVA_HOME` handed to the runtime engine, if configured.
    pub java_home: Option<PathBuf>,
    /// Python interpreter.
    pub python: Option<PathBuf>,
}

impl SystemTools {
    /// Probe the host for Java and Python.
    #[must_use]
    pub fn detect(config: &LocalConfig) -> Self {
        let tools = Self {
            java: find_java(config.java_home.as_deref()),
            java_home: config.java_home.clone(),
            python: find_python(),
        };
        debug!(java = ?tools.java, python = ?tools.python, "Detected system tools");
        tools
    }

    /// The Java launcher, or [`Error::PrerequisiteMissing`].
    pub fn require_java(&self) -> Result<&Path> {
        self.java
            .as_deref()
            .ok_or_else(|| Error::prerequisite_missing("Java", JAVA_HELP))
    }

    /// The Python interpreter, or [`Error::PrerequisiteMissing`].
    pub fn require_python(&self) -> Result<&Path> {
        self.python
            .as_deref()
            .ok_or_else(|| Error::prerequisite_missing("Python", PYTHON_HELP))
    }
}

fn find_java(java_home: Option<&Path>) -> Option<PathBuf> {
    if let Some(home) = java_home {
        let candidate = home.join("bin").join("java");
        if candidate.is_file() {
            return Some(candidate);
        }
        warn!(java_home = %home.display(), "JAVA_HOME has no bin/java, falling back to PATH");
    }
    which::which("java").ok()
}

fn find_python() -> Option<PathBuf> {
    which::which("python3")
        .or_else(|_| which::which("python"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_java_home_is_preferred() {
        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("java"), "").unwrap();

        assert_eq!(find_java(Some(temp.path())), Some(bin.join("java")));
    }

    #[test]
    fn test_missing_prerequisites_explain_themselves() {
        let tools = SystemTools::default();
        let err = tools.require_java().unwrap_err();
        assert_eq!(err.to_string(), "Java is required but could not be found");
        assert!(matches!(&err, Error::PrerequisiteMissing { help, .. } if help.contains("JAVA_HOME")));

        let err = tools.require_python().unwrap_err();
        assert!(matches!(&err, Error::PrerequisiteMissing { name, .. } if name == "Python"));
    }

    #[test]
    fn test_present_prerequisites() {
        let tools = SystemTools {
            java: Some(PathBuf::from("/usr/bin/java")),
            java_home: None,
            python: Some(PathBuf::from("/usr/bin/python3")),
        };
        assert_eq!(tools.require_java().unwrap(), Path::new("/usr/bin/java"));
        assert_eq!(tools.require_python().unwrap(), Path::new("/usr/bin/python3"));
    }
}
