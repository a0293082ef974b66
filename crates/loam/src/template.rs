//! Script templates.
//!
//! Templates are minijinja sources rendered with strict undefined handling:
//! every variable a template references must be supplied, extra keys are
//! ignored. The `sh` filter single-quotes a value for POSIX shells.

use loam_core::{Error, Result};
use minijinja::{Environment, Template, UndefinedBehavior, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Built-in template that launches the runtime engine.
pub const RUN_PIG: &str = "run_pig.sh";

/// Built-in template that runs a connector export.
pub const SQOOP_EXPORT: &str = "sqoop_export.sh";

/// Values bound into a template, keyed by placeholder name.
pub type TemplateParams = BTreeMap<String, Value>;

/// Renders built-in and on-disk script templates.
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl std::fmt::Debug for TemplateRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRenderer").finish_non_exhaustive()
    }
}

impl TemplateRenderer {
    /// Create a renderer with the built-in templates loaded.
    pub fn new() -> Result<Self> {
        let mut env = configured_environment();
        env.add_template(RUN_PIG, include_str!("../templates/run_pig.sh"))
            .map_err(|e| Error::template(RUN_PIG, e.to_string()))?;
        env.add_template(SQOOP_EXPORT, include_str!("../templates/sqoop_export.sh"))
            .map_err(|e| Error::template(SQOOP_EXPORT, e.to_string()))?;
        Ok(Self { env })
    }

    /// Render the built-in template `name`.
    pub fn render(&self, name: &str, params: &TemplateParams) -> Result<String> {
        let template = self
            .env
            .get_template(name)
            .map_err(|e| Error::template(name, e.to_string()))?;
        render_checked(&template, params)
    }

    /// Every placeholder the built-in template `name` may reference.
    #[cfg(test)]
    fn placeholders(&self, name: &str) -> Result<BTreeSet<String>> {
        let template = self
            .env
            .get_template(name)
            .map_err(|e| Error::template(name, e.to_string()))?;
        Ok(template.undeclared_variables(false).into_iter().collect())
    }
}

fn configured_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env.add_filter("sh", shell_quote);
    env
}

fn render_checked(template: &Template<'_, '_>, params: &TemplateParams) -> Result<String> {
    let referenced: BTreeSet<String> = template.undeclared_variables(false).into_iter().collect();
    if let Some(missing) = referenced.iter().find(|key| !params.contains_key(*key)) {
        return Err(Error::missing_parameter(missing.clone()));
    }
    debug!(
        template = template.name(),
        keys = ?params.keys().collect::<Vec<_>>(),
        "Rendering template"
    );
    template
        .render(params)
        .map_err(|e| Error::template(template.name(), e.to_string()))
}

fn shell_quote(value: Value) -> String {
    format!("'{}'", value.to_string().replace('\'', r"'\''"))
}

/// A rendered script persisted to a private temporary file.
///
/// The file is deleted when this value is dropped.
#[derive(Debug)]
pub struct RenderedScript {
    file: NamedTempFile,
}

impl RenderedScript {
    /// Write `contents` to a new temporary file.
    pub fn write(prefix: &str, contents: &str) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(".sh")
            .tempfile()
            .map_err(|e| Error::io(e, std::env::temp_dir(), "create"))?;
        file.write_all(contents.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| Error::io(e, file.path(), "write"))?;
        Ok(Self { file })
    }

    /// Location of the script on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
