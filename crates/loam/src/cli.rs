//! Command-line surface and exit codes.

use clap::{Args, Parser, Subcommand};
use loam_core::tools::PigVersion;
use miette::{Diagnostic, Report};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

use crate::tracing::{LogLevel, TracingFormat};

/// Exit codes for the CLI application
pub const EXIT_OK: i32 = 0;
/// Usage, configuration or script lookup error exit code
pub const EXIT_CLI: i32 = 2;
/// Install, prerequisite or other runtime error exit code
pub const EXIT_FAILURE: i32 = 3;
/// Exit code after an interrupt (128 + SIGINT)
pub const EXIT_SIGINT: i32 = 130;

/// CLI-specific error types with proper exit code mapping
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum CliError {
    /// Usage or configuration error (exit code 2)
    #[error("{message}")]
    #[diagnostic(code(loam::cli::config))]
    Config {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
    /// The command could not complete (exit code 3)
    #[error("{message}")]
    #[diagnostic(code(loam::cli::failed))]
    Failed {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
    /// The script ran and exited unsuccessfully (exit code is the child's)
    #[error("Command exited with status {code}")]
    #[diagnostic(code(loam::cli::child_exit), help("Check the output above for details"))]
    ChildExit {
        /// Child exit code
        code: i32,
    },
}

impl CliError {
    /// Create a new configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a new configuration error with help text
    #[must_use]
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create a new failure
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            help: None,
        }
    }
}

/// Convert `loam_core::Error` to the matching `CliError` variant.
///
/// - configuration and script lookup errors -> Config (exit code 2)
/// - a child's non-zero exit -> ChildExit (the child's exit code)
/// - everything else -> Failed (exit code 3)
impl From<loam_core::Error> for CliError {
    fn from(err: loam_core::Error) -> Self {
        let help = err.help().map(|h| h.to_string());
        match err {
            loam_core::Error::Configuration { message, help } => Self::Config { message, help },
            loam_core::Error::ScriptNotFound { .. } => Self::Config {
                message: err.to_string(),
                help,
            },
            loam_core::Error::NonZeroExit { code } => Self::ChildExit { code },
            loam_core::Error::Io {
                ref source,
                ref path,
                ref operation,
            } => {
                let path_str = path
                    .as_ref()
                    .map_or(String::new(), |p| format!(" on {}", p.display()));
                Self::Failed {
                    message: format!("I/O {operation} failed{path_str}: {source}"),
                    help,
                }
            }
            other => Self::Failed {
                message: other.to_string(),
                help,
            },
        }
    }
}

/// Map CLI error to appropriate exit code
#[must_use]
pub const fn exit_code_for(err: &CliError) -> i32 {
    match err {
        CliError::Config { .. } => EXIT_CLI,
        CliError::Failed { .. } => EXIT_FAILURE,
        CliError::ChildExit { code } => *code,
    }
}

/// Error response envelope for JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope<E> {
    /// Status indicator - always "error" for failures
    pub status: &'static str,
    /// The error details
    pub error: E,
}

impl<E> ErrorEnvelope<E> {
    /// Create a new error envelope
    #[must_use]
    pub const fn new(error: E) -> Self {
        Self {
            status: "error",
            error,
        }
    }
}

/// Render error appropriately based on JSON flag
pub fn render_error(err: &CliError, json_mode: bool) {
    if json_mode {
        let error_envelope = ErrorEnvelope::new(serde_json::json!({
            "code": match err {
                CliError::Config { .. } => "config",
                CliError::Failed { .. } => "failed",
                CliError::ChildExit { .. } => "child_exit",
            },
            "exit_code": exit_code_for(err),
            "message": err.to_string()
        }));

        match serde_json::to_string(&error_envelope) {
            Ok(json) => println!("{json}"),
            Err(_) => eprintln!("Error serializing error response"),
        }
    } else {
        let report = Report::new(err.clone());
        eprintln!("{report:?}");
        let _ = io::stderr().flush();
    }
}

/// Run Pig, control and workflow scripts against a local toolchain.
///
/// loam installs the runtime engine and its companions under the project's
/// install root on first use and runs every script in local mode.
#[derive(Parser, Debug)]
#[command(name = "loam")]
#[command(about = "Run Pig, control and workflow scripts against a locally provisioned toolchain")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Logging verbosity level.
    #[arg(
        short = 'L',
        long,
        global = true,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub level: LogLevel,

    /// Emit logs and errors as JSON.
    #[arg(long, global = true, help = "Emit logs and errors as JSON")]
    pub json: bool,

    /// Log output format.
    #[arg(
        long = "log-format",
        global = true,
        help = "Log output format",
        default_value = "compact",
        value_enum
    )]
    pub log_format: TracingFormat,

    /// Project root, when not the current directory.
    #[arg(
        long = "project-root",
        global = true,
        value_name = "PROJECTDIR",
        help = "The root directory of the project if not the current directory"
    )]
    pub project_root: Option<PathBuf>,

    /// Ask the distribution sources whether installed tools are stale.
    #[arg(
        long = "check-updates",
        global = true,
        help = "Check for newer tool distributions before running"
    )]
    pub check_updates: bool,
}

impl Cli {
    /// Effective log format: `--json` wins over `--log-format`.
    #[must_use]
    pub fn tracing_format(&self) -> TracingFormat {
        if self.json {
            TracingFormat::Json
        } else {
            self.log_format
        }
    }
}

/// Script parameter flags shared by the engine commands.
#[derive(Args, Debug, Clone, Default)]
pub struct ParamArgs {
    /// `NAME=VALUE` assignments, in order.
    #[arg(
        short = 'p',
        long = "parameter",
        value_name = "NAME=VALUE",
        help = "Set a script parameter value (repeatable)"
    )]
    pub parameters: Vec<String>,

    /// File of `NAME=VALUE` lines.
    #[arg(
        short = 'f',
        long = "param-file",
        value_name = "PARAMFILE",
        help = "Load script parameter values from a file"
    )]
    pub param_file: Option<PathBuf>,
}

/// Runtime engine version selection.
#[derive(Args, Debug, Clone, Default)]
pub struct EngineArgs {
    /// Runtime engine version.
    #[arg(
        short = 'g',
        long = "pigversion",
        value_name = "PIG_VERSION",
        default_value_t = PigVersion::default(),
        help = "Set the pig version (0.9 or 0.12)"
    )]
    pub pig_version: PigVersion,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install the local toolchain.
    #[command(
        about = "Install the local toolchain; other commands also do this automatically"
    )]
    Configure {
        /// Engine selection.
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Run a pigscript or control script locally.
    #[command(about = "Run a pigscript or control script locally")]
    Run {
        /// Script name or path.
        #[arg(value_name = "SCRIPT")]
        script: String,
        /// Parameters.
        #[command(flatten)]
        params: ParamArgs,
        /// Engine selection.
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Check the syntax of a script.
    #[command(about = "Check the syntax of a script")]
    Validate {
        /// Script name or path.
        #[arg(value_name = "SCRIPT")]
        script: String,
        /// Parameters.
        #[command(flatten)]
        params: ParamArgs,
        /// Engine selection.
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Illustrate the data flow of a pigscript.
    #[command(about = "Illustrate the data flow of a pigscript, optionally up to one alias")]
    Illustrate {
        /// Pigscript name or path.
        #[arg(value_name = "PIGSCRIPT")]
        script: String,
        /// Alias to illustrate.
        #[arg(value_name = "ALIAS")]
        alias: Option<String>,
        /// Keep the full illustrate output.
        #[arg(
            short = 's',
            long = "skip-pruning",
            help = "Don't reduce the illustrate results to the smallest size possible"
        )]
        skip_pruning: bool,
        /// File receiving illustrate output.
        #[arg(long = "out", value_name = "FILE", help = "Write illustrate output to FILE")]
        output: Option<PathBuf>,
        /// Parameters.
        #[command(flatten)]
        params: ParamArgs,
        /// Engine selection.
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Profile input data.
    #[command(about = "Infer a schema and emit statistics about input data")]
    Characterize {
        /// Parameter file naming LOADER, INPUT_SRC, OUTPUT_PATH and INFER_TYPES.
        #[arg(
            short = 'f',
            long = "param-file",
            value_name = "PARAMFILE",
            help = "Parameter file (LOADER, INPUT_SRC, OUTPUT_PATH, INFER_TYPES)"
        )]
        param_file: PathBuf,
        /// Engine selection.
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Start an interactive engine shell.
    #[command(about = "Start a local Pig shell")]
    Repl {
        /// Parameters.
        #[command(flatten)]
        params: ParamArgs,
        /// Engine selection.
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Run a workflow script.
    #[command(about = "Run a workflow script with the local Python; arguments after -- are passed through")]
    Workflow {
        /// Workflow script name or path.
        #[arg(value_name = "SCRIPT")]
        script: String,
        /// Parameters, passed as `--NAME VALUE`.
        #[command(flatten)]
        params: ParamArgs,
        /// Extra arguments for the script.
        #[arg(last = true, value_name = "ARGS")]
        args: Vec<String>,
    },
    /// Export a database table.
    #[command(about = "Export a database table to storage through the connector")]
    Export {
        /// JDBC connection string.
        #[arg(value_name = "CONNECTION")]
        connection: String,
        /// Table to export.
        #[arg(value_name = "TABLE")]
        table: String,
        /// Destination URI.
        #[arg(value_name = "DESTINATION")]
        destination: String,
        /// Database user.
        #[arg(long, help = "Database user")]
        username: Option<String>,
        /// Database password.
        #[arg(
            long,
            env = "LOAM_DB_PASSWORD",
            hide_env_values = true,
            help = "Database password"
        )]
        password: Option<String>,
        /// JDBC driver class.
        #[arg(long = "jdbc-driver", value_name = "CLASS", help = "JDBC driver class")]
        jdbc_driver: Option<String>,
        /// Use the database's direct path.
        #[arg(long, help = "Use the database's direct export path")]
        direct: bool,
    },
}

impl Commands {
    /// Command name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Configure { .. } => "configure",
            Self::Run { .. } => "run",
            Self::Validate { .. } => "validate",
            Self::Illustrate { .. } => "illustrate",
            Self::Characterize { .. } => "characterize",
            Self::Repl { .. } => "repl",
            Self::Workflow { .. } => "workflow",
            Self::Export { .. } => "export",
        }
    }
}

/// Parse command line arguments
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use loam_core::Error;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_with_parameters() {
        let cli = Cli::try_parse_from([
            "loam", "run", "pigscripts/a.pig", "-p", "first=1", "-p", "second=2", "-g", "0.12",
        ])
        .unwrap();
        let Commands::Run {
            script,
            params,
            engine,
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(script, "pigscripts/a.pig");
        assert_eq!(params.parameters, vec!["first=1", "second=2"]);
        assert_eq!(engine.pig_version, PigVersion::Pig012);
    }

    #[test]
    fn test_unknown_pig_version_is_rejected() {
        let err = Cli::try_parse_from(["loam", "repl", "-g", "0.13"]).unwrap_err();
        assert!(err.to_string().contains("0.9 (default), 0.12"));
    }

    #[test]
    fn test_characterize_requires_param_file() {
        assert!(Cli::try_parse_from(["loam", "characterize"]).is_err());
        assert!(Cli::try_parse_from(["loam", "characterize", "-f", "c.params"]).is_ok());
    }

    #[test]
    fn test_workflow_trailing_args() {
        let cli = Cli::try_parse_from([
            "loam", "workflow", "recsys", "-p", "date=2012-04", "--", "--workers", "2",
        ])
        .unwrap();
        let Commands::Workflow { args, params, .. } = cli.command else {
            panic!("expected workflow");
        };
        assert_eq!(args, vec!["--workers", "2"]);
        assert_eq!(params.parameters, vec!["date=2012-04"]);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "loam",
            "configure",
            "--project-root",
            "/tmp/project",
            "--check-updates",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.project_root, Some(PathBuf::from("/tmp/project")));
        assert!(cli.check_updates);
        assert_eq!(cli.tracing_format(), TracingFormat::Json);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(&CliError::config("bad")), EXIT_CLI);
        assert_eq!(exit_code_for(&CliError::failed("broken")), EXIT_FAILURE);
        assert_eq!(exit_code_for(&CliError::ChildExit { code: 7 }), 7);
    }

    #[test]
    fn test_core_error_mapping() {
        let err: CliError = Error::configuration("No such directory /foo/baz").into();
        assert!(matches!(&err, CliError::Config { message, .. } if message == "No such directory /foo/baz"));

        let err: CliError = Error::ScriptNotFound {
            requested: "missing".into(),
            kinds: vec!["pigscript".into()],
            available: vec![vec![]],
        }
        .into();
        assert_eq!(exit_code_for(&err), EXIT_CLI);
        assert!(err.to_string().contains("No pigscripts found"));

        let err: CliError = Error::NonZeroExit { code: 5 }.into();
        assert_eq!(exit_code_for(&err), 5);

        let err: CliError = Error::prerequisite_missing("Java", "install java").into();
        assert_eq!(exit_code_for(&err), EXIT_FAILURE);
        assert!(matches!(&err, CliError::Failed { help: Some(h), .. } if h == "install java"));
    }
}
