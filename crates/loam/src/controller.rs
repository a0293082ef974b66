//! Toolchain controller.
//!
//! Every user-facing command goes through the same sequence:
//!
//! ```text
//! Uninitialized -> DependenciesVerified -> ParametersAssembled -> Executed -> Succeeded | Failed
//! ```
//!
//! Dependencies are verified first: system prerequisites are checked before
//! anything is downloaded, then each required tool is installed or updated.
//! Parameters are assembled with configuration values ahead of invocation
//! values, and the command is executed through a [`ScriptRunner`], usually
//! via a rendered runner script. The child's exit outcome is returned
//! unchanged.

use loam_core::config::LocalConfig;
use loam_core::params::ParameterSet;
use loam_core::project::{ProjectLayout, Script, ScriptKind};
use loam_core::tools::{PigVersion, ToolId, ToolSpec};
use loam_core::{Error, Result};
use loam_tools_archive::{InstallManager, InstallReport};
use minijinja::Value;
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::gitignore;
use crate::prereq::SystemTools;
use crate::runner::{ExitOutcome, Invocation, ScriptRunner};
use crate::template::{RUN_PIG, RenderedScript, SQOOP_EXPORT, TemplateParams, TemplateRenderer};

/// Control script run by `characterize`.
pub const CHARACTERIZE_SCRIPT: &str = "controlscripts/lib/characterize_control.py";

/// Shell used to execute rendered scripts.
const SHELL: &str = "/bin/sh";

/// Where a controller is in its per-invocation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Nothing checked yet.
    Uninitialized,
    /// Prerequisites found and every required tool installed.
    DependenciesVerified,
    /// Configuration and invocation parameters concatenated.
    ParametersAssembled,
    /// The child process finished.
    Executed,
    /// The command completed with exit status zero.
    Succeeded,
    /// The command failed or was interrupted.
    Failed,
}

/// Options for a connector export.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// JDBC connection string.
    pub connection: String,
    /// Table to export.
    pub table: String,
    /// Destination URI.
    pub destination: String,
    /// Database user.
    pub username: Option<String>,
    /// Database password.
    pub password: Option<SecretString>,
    /// JDBC driver class.
    pub jdbc_driver: Option<String>,
    /// Use the database's direct export path.
    pub direct: bool,
}

/// A user-facing command.
#[derive(Debug, Clone)]
pub enum Request {
    /// Install the toolchain without running anything.
    Configure,
    /// Run a pigscript or control script.
    Run {
        /// Script name or path.
        script: String,
    },
    /// Check a script's syntax.
    Validate {
        /// Script name or path.
        script: String,
    },
    /// Illustrate data flow through a pigscript.
    Illustrate {
        /// Script name or path.
        script: String,
        /// Alias to illustrate; every alias when absent.
        alias: Option<String>,
        /// Keep full illustrate output instead of pruning it.
        skip_pruning: bool,
        /// File to write illustrate output to.
        output: Option<PathBuf>,
    },
    /// Profile input data with the characterize control script.
    Characterize,
    /// Interactive runtime engine shell.
    Repl,
    /// Run a workflow script with the host Python.
    Workflow {
        /// Script name or path.
        script: String,
        /// Arguments passed through after the parameters.
        args: Vec<String>,
    },
    /// Export a database table through the connector.
    Export(ExportRequest),
}

impl Request {
    /// Command name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Configure => "configure",
            Self::Run { .. } => "run",
            Self::Validate { .. } => "validate",
            Self::Illustrate { .. } => "illustrate",
            Self::Characterize => "characterize",
            Self::Repl => "repl",
            Self::Workflow { .. } => "workflow",
            Self::Export(_) => "export",
        }
    }

    fn script_lookup(&self) -> Option<(&[ScriptKind], &str)> {
        const PIG_OR_CONTROL: &[ScriptKind] = &[ScriptKind::PigScript, ScriptKind::ControlScript];
        match self {
            Self::Run { script } | Self::Validate { script } => Some((PIG_OR_CONTROL, script)),
            Self::Illustrate { script, .. } => Some((&[ScriptKind::PigScript], script)),
            Self::Characterize => Some((&[ScriptKind::ControlScript], CHARACTERIZE_SCRIPT)),
            Self::Workflow { script, .. } => Some((&[ScriptKind::WorkflowScript], script)),
            Self::Configure | Self::Repl | Self::Export(_) => None,
        }
    }
}

/// What a request needs before it can run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirements {
    /// Tools to install or update, in order.
    pub tools: Vec<ToolId>,
    /// Whether Java must be present.
    pub java: bool,
    /// Whether Python must be present.
    pub python: bool,
    /// Whether to check for newer distributions regardless of configuration.
    pub check_updates: bool,
}

impl Requirements {
    /// Requirements of `request` with the runtime engine at `version`.
    /// `script` is the resolved script, when the request takes one.
    #[must_use]
    pub fn for_request(request: &Request, version: PigVersion, script: Option<&Script>) -> Self {
        let pig = ToolId::Pig(version);
        let control = script.is_some_and(|s| s.kind == ScriptKind::ControlScript);
        let engine = |python: bool| Self {
            tools: if control {
                vec![pig, ToolId::Jython]
            } else {
                vec![pig]
            },
            java: true,
            python,
            check_updates: false,
        };
        match request {
            Request::Configure => Self {
                tools: vec![pig, ToolId::Jython],
                java: true,
                python: true,
                check_updates: true,
            },
            Request::Run { .. } => engine(control),
            Request::Validate { .. } | Request::Illustrate { .. } | Request::Repl => engine(false),
            Request::Characterize => Self {
                tools: vec![pig, ToolId::Jython],
                java: true,
                python: true,
                check_updates: false,
            },
            Request::Workflow { .. } => Self {
                tools: Vec::new(),
                java: false,
                python: true,
                check_updates: false,
            },
            Request::Export(_) => Self {
                tools: vec![ToolId::Sqoop],
                java: true,
                python: false,
                check_updates: false,
            },
        }
    }
}

/// Runtime engine sub-commands.
enum PigCommand<'a> {
    Run(&'a Script),
    Check(&'a Script),
    Illustrate {
        script: &'a Script,
        alias: Option<&'a str>,
        skip_pruning: bool,
        output: Option<&'a Path>,
    },
    Repl,
}

impl PigCommand<'_> {
    fn args(&self, param_file: &Path) -> Vec<String> {
        let param_file = param_file.display().to_string();
        let mut args = vec!["-x".to_string(), "local".to_string()];
        match self {
            Self::Run(script) => {
                args.extend(["-f".into(), script.relative_path.clone()]);
                args.extend(["-param_file".into(), param_file]);
            }
            Self::Check(script) => {
                args.extend(["-check".into(), script.relative_path.clone()]);
                args.extend(["-param_file".into(), param_file]);
            }
            Self::Illustrate {
                script,
                alias,
                skip_pruning,
                output,
            } => {
                // -e consumes the rest of the command line
                args.extend(["-param_file".into(), param_file]);
                args.extend(["-e".into(), "illustrate".into()]);
                if *skip_pruning {
                    args.push("-skipPruning".into());
                }
                if let Some(output) = output {
                    args.extend(["-out".into(), output.display().to_string()]);
                }
                args.extend(["-script".into(), script.relative_path.clone()]);
                if let Some(alias) = alias {
                    args.push((*alias).to_string());
                }
            }
            Self::Repl => {
                args.extend(["-param_file".into(), param_file]);
            }
        }
        args
    }
}

/// Sequences dependency checks, parameter assembly and execution for one
/// command invocation.
pub struct ToolchainController {
    config: LocalConfig,
    pig_version: PigVersion,
    manager: InstallManager,
    runner: Box<dyn ScriptRunner>,
    system: SystemTools,
    templates: TemplateRenderer,
    layout: ProjectLayout,
    state: ControllerState,
    reports: Vec<InstallReport>,
}

impl fmt::Debug for ToolchainController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolchainController")
            .field("project_root", &self.config.project_root)
            .field("pig_version", &self.pig_version)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ToolchainController {
    /// Create a controller for `config` that executes through `runner`.
    ///
    /// Host prerequisites are detected once, here.
    pub fn new(config: LocalConfig, runner: Box<dyn ScriptRunner>) -> Result<Self> {
        let manager = InstallManager::new(&config)?;
        let system = SystemTools::detect(&config);
        Ok(Self {
            layout: ProjectLayout::new(&config.project_root),
            config,
            pig_version: PigVersion::default(),
            manager,
            runner,
            system,
            templates: TemplateRenderer::new()?,
            state: ControllerState::Uninitialized,
            reports: Vec::new(),
        })
    }

    /// Select the runtime engine version.
    #[must_use]
    pub fn with_pig_version(mut self, version: PigVersion) -> Self {
        self.pig_version = version;
        self
    }

    /// Replace the install manager.
    #[must_use]
    pub fn with_install_manager(mut self, manager: InstallManager) -> Self {
        self.manager = manager;
        self
    }

    /// Replace the detected host prerequisites.
    #[must_use]
    pub fn with_system_tools(mut self, system: SystemTools) -> Self {
        self.system = system;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// What the install manager did during [`Self::execute`].
    #[must_use]
    pub fn install_reports(&self) -> &[InstallReport] {
        &self.reports
    }

    /// Run `request` with `parameters` from the invocation.
    ///
    /// A non-zero child exit is returned as an outcome, not an error.
    pub async fn execute(
        &mut self,
        request: Request,
        parameters: ParameterSet,
    ) -> Result<ExitOutcome> {
        info!(command = request.name(), pig_version = %self.pig_version, "Executing");
        let result = self.drive(&request, &parameters).await;
        let terminal = match &result {
            Ok(outcome) if outcome.is_success() => ControllerState::Succeeded,
            _ => ControllerState::Failed,
        };
        self.advance(terminal);
        result
    }

    async fn drive(&mut self, request: &Request, parameters: &ParameterSet) -> Result<ExitOutcome> {
        let script = match request.script_lookup() {
            Some((kinds, name)) => Some(self.layout.resolve(kinds, name)?),
            None => None,
        };
        let requirements = Requirements::for_request(request, self.pig_version, script.as_ref());
        self.verify_dependencies(&requirements).await?;

        if matches!(request, Request::Configure) {
            gitignore::ensure_ignored(&self.config.project_root, &self.config.install_root)?;
            self.advance(ControllerState::Executed);
            return Ok(ExitOutcome::success());
        }

        let params = ParameterSet::assemble(&self.config.parameters, parameters);
        self.advance(ControllerState::ParametersAssembled);
        debug!(parameters = ?params.names(), "Parameters assembled");

        let uses_jython = requirements.tools.contains(&ToolId::Jython);
        let outcome = match (request, script.as_ref()) {
            (Request::Run { .. } | Request::Characterize, Some(script)) => {
                self.run_pig(&PigCommand::Run(script), params, uses_jython)
                    .await?
            }
            (Request::Validate { .. }, Some(script)) => {
                self.run_pig(&PigCommand::Check(script), params, uses_jython)
                    .await?
            }
            (
                Request::Illustrate {
                    alias,
                    skip_pruning,
                    output,
                    ..
                },
                Some(script),
            ) => {
                let command = PigCommand::Illustrate {
                    script,
                    alias: alias.as_deref(),
                    skip_pruning: *skip_pruning,
                    output: output.as_deref(),
                };
                self.run_pig(&command, params, uses_jython).await?
            }
            (Request::Repl, _) => self.run_pig(&PigCommand::Repl, params, uses_jython).await?,
            (Request::Workflow { args, .. }, Some(script)) => {
                self.run_workflow(script, params, args).await?
            }
            (Request::Export(export), _) => self.run_export(export).await?,
            (request, _) => {
                return Err(Error::configuration(format!(
                    "{} requires a script",
                    request.name()
                )));
            }
        };
        self.advance(ControllerState::Executed);
        Ok(outcome)
    }

    async fn verify_dependencies(&mut self, requirements: &Requirements) -> Result<()> {
        if requirements.java {
            self.system.require_java()?;
        }
        if requirements.python {
            self.system.require_python()?;
        }

        self.manager
            .set_update_checks(self.config.check_updates || requirements.check_updates);
        for tool in &requirements.tools {
            let reports = self.manager.install_or_update(*tool).await?;
            for report in &reports {
                info!(tool = %report.tool, action = %report.action, "Tool ready");
            }
            self.reports.extend(reports);
        }
        self.advance(ControllerState::DependenciesVerified);
        Ok(())
    }

    async fn run_pig(
        &self,
        command: &PigCommand<'_>,
        params: ParameterSet,
        uses_jython: bool,
    ) -> Result<ExitOutcome> {
        let param_file = write_param_file(&params)?;
        let root = &self.config.install_root;
        let pig = ToolSpec::get(ToolId::Pig(self.pig_version));
        let classpath = if uses_jython {
            path_value(&ToolSpec::get(ToolId::Jython).executable_path(root))
        } else {
            Value::from("")
        };

        let mut values = TemplateParams::new();
        values.insert("java_home".into(), self.java_home_value());
        values.insert("pig_home".into(), path_value(&pig.install_path(root)));
        values.insert("pig_executable".into(), path_value(&pig.executable_path(root)));
        values.insert("classpath".into(), classpath);
        values.insert("pig_opts".into(), Value::from(self.pig_opts()));
        values.insert("project_root".into(), path_value(&self.config.project_root));
        values.insert(
            "pig_args".into(),
            Value::from(command.args(param_file.path())),
        );

        let body = self.templates.render(RUN_PIG, &values)?;
        let script = RenderedScript::write("loam-pig-", &body)?;
        let invocation = Invocation::new(SHELL)
            .arg(script.path())
            .current_dir(&self.config.project_root)
            .parameters(params);
        self.runner.run(&invocation).await
    }

    async fn run_workflow(
        &self,
        script: &Script,
        params: ParameterSet,
        args: &[String],
    ) -> Result<ExitOutcome> {
        let python = self.system.require_python()?;
        let mut invocation = Invocation::new(python).arg(&script.path);
        for param in &params.sorted_by_name() {
            invocation = invocation
                .arg(format!("--{}", param.name))
                .arg(&param.value);
        }
        let invocation = invocation
            .args(args)
            .current_dir(&self.config.project_root)
            .parameters(params);
        self.runner.run(&invocation).await
    }

    async fn run_export(&self, export: &ExportRequest) -> Result<ExitOutcome> {
        let root = &self.config.install_root;
        let sqoop = ToolSpec::get(ToolId::Sqoop);
        let hadoop = ToolSpec::get(ToolId::Hadoop);

        let mut values = TemplateParams::new();
        values.insert("java_home".into(), self.java_home_value());
        values.insert("hadoop_home".into(), path_value(&hadoop.install_path(root)));
        values.insert("sqoop_home".into(), path_value(&sqoop.install_path(root)));
        values.insert("sqoop_executable".into(), path_value(&sqoop.executable_path(root)));
        values.insert("sqoop_opts".into(), Value::from_serialize(self.storage_options()));
        values.insert("jdbc_conn".into(), Value::from(export.connection.as_str()));
        values.insert("dbtable".into(), Value::from(export.table.as_str()));
        values.insert("destination".into(), Value::from(export.destination.as_str()));
        values.insert(
            "dbuser".into(),
            Value::from(export.username.as_deref().unwrap_or_default()),
        );
        values.insert(
            "dbpass".into(),
            Value::from(
                export
                    .password
                    .as_ref()
                    .map(|p| p.expose_secret())
                    .unwrap_or_default(),
            ),
        );
        values.insert(
            "jdbcdriver".into(),
            Value::from(export.jdbc_driver.as_deref().unwrap_or_default()),
        );
        values.insert("direct_import".into(), Value::from(export.direct));

        let body = self.templates.render(SQOOP_EXPORT, &values)?;
        let script = RenderedScript::write("loam-export-", &body)?;
        let invocation = Invocation::new(SHELL)
            .arg(script.path())
            .current_dir(&self.config.project_root);
        self.runner.run(&invocation).await
    }

    fn java_home_value(&self) -> Value {
        self.system
            .java_home
            .as_deref()
            .map_or_else(|| Value::from(""), path_value)
    }

    /// Storage credentials as Hadoop configuration properties.
    fn storage_options(&self) -> BTreeMap<&'static str, String> {
        let mut opts = BTreeMap::new();
        let credentials = &self.config.credentials;
        if let Some(key) = &credentials.access_key {
            let key = key.expose_secret().to_string();
            opts.insert("fs.s3.awsAccessKeyId", key.clone());
            opts.insert("fs.s3n.awsAccessKeyId", key);
        }
        if let Some(secret) = &credentials.secret_key {
            let secret = secret.expose_secret().to_string();
            opts.insert("fs.s3.awsSecretAccessKey", secret.clone());
            opts.insert("fs.s3n.awsSecretAccessKey", secret);
        }
        opts
    }

    fn pig_opts(&self) -> String {
        let root = &self.config.project_root;
        let mut opts = vec![format!(
            "-Dpig.import.search.path={},{}",
            root.join("macros").display(),
            root.join(ScriptKind::PigScript.directory()).display()
        )];
        opts.extend(
            self.storage_options()
                .into_iter()
                .map(|(key, value)| format!("-D{key}={value}")),
        );
        opts.join(" ")
    }

    fn advance(&mut self, next: ControllerState) {
        debug!(from = ?self.state, to = ?next, "Controller state");
        self.state = next;
    }
}

fn path_value(path: &Path) -> Value {
    Value::from(path.display().to_string())
}

fn write_param_file(params: &ParameterSet) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("loam-params-")
        .suffix(".params")
        .tempfile()
        .map_err(|e| Error::io(e, std::env::temp_dir(), "create"))?;
    file.write_all(params.to_param_file().as_bytes())
        .and_then(|()| file.flush())
        .map_err(|e| Error::io(e, file.path(), "write"))?;
    Ok(file)
}
