//! Dispatch from parsed arguments to the toolchain controller.

use loam_core::config::{EnvSource, LocalConfig, ProcessEnv};
use loam_core::params::ParameterSet;
use loam_core::tools::{PigVersion, ToolSpec};
use loam_tools_archive::{InstallAction, InstallReport};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use tracing::Instrument;

use crate::cli::{CliError, Cli, Commands, ParamArgs};
use crate::controller::{ExportRequest, Request, ToolchainController};
use crate::runner::{ExitOutcome, ProcessRunner};

/// A parsed command ready for the controller.
#[derive(Debug)]
pub struct PreparedCommand {
    /// What to do.
    pub request: Request,
    /// Runtime engine version.
    pub pig_version: PigVersion,
    /// Parameters from the command line: the parameter file, then `-p` flags.
    pub parameters: ParameterSet,
}

/// Translate a parsed subcommand into a controller request.
///
/// Relative parameter file paths are resolved against `cwd`.
pub fn prepare(command: Commands, cwd: &Path) -> Result<PreparedCommand, CliError> {
    let prepared = match command {
        Commands::Configure { engine } => PreparedCommand {
            request: Request::Configure,
            pig_version: engine.pig_version,
            parameters: ParameterSet::new(),
        },
        Commands::Run {
            script,
            params,
            engine,
        } => PreparedCommand {
            request: Request::Run { script },
            pig_version: engine.pig_version,
            parameters: invocation_parameters(&params, cwd)?,
        },
        Commands::Validate {
            script,
            params,
            engine,
        } => PreparedCommand {
            request: Request::Validate { script },
            pig_version: engine.pig_version,
            parameters: invocation_parameters(&params, cwd)?,
        },
        Commands::Illustrate {
            script,
            alias,
            skip_pruning,
            output,
            params,
            engine,
        } => PreparedCommand {
            request: Request::Illustrate {
                script,
                alias,
                skip_pruning,
                output: output.map(|o| absolutize(cwd, &o)),
            },
            pig_version: engine.pig_version,
            parameters: invocation_parameters(&params, cwd)?,
        },
        Commands::Characterize { param_file, engine } => PreparedCommand {
            request: Request::Characterize,
            pig_version: engine.pig_version,
            parameters: invocation_parameters(
                &ParamArgs {
                    parameters: Vec::new(),
                    param_file: Some(param_file),
                },
                cwd,
            )?,
        },
        Commands::Repl { params, engine } => PreparedCommand {
            request: Request::Repl,
            pig_version: engine.pig_version,
            parameters: invocation_parameters(&params, cwd)?,
        },
        Commands::Workflow {
            script,
            params,
            args,
        } => PreparedCommand {
            request: Request::Workflow { script, args },
            pig_version: PigVersion::default(),
            parameters: invocation_parameters(&params, cwd)?,
        },
        Commands::Export {
            connection,
            table,
            destination,
            username,
            password,
            jdbc_driver,
            direct,
        } => PreparedCommand {
            request: Request::Export(ExportRequest {
                connection,
                table,
                destination,
                username,
                password: password.map(SecretString::from),
                jdbc_driver,
                direct,
            }),
            pig_version: PigVersion::default(),
            parameters: ParameterSet::new(),
        },
    };
    Ok(prepared)
}

/// Parameter file contents followed by `-p` assignments.
pub fn invocation_parameters(args: &ParamArgs, cwd: &Path) -> Result<ParameterSet, CliError> {
    let mut parameters = match &args.param_file {
        Some(path) => ParameterSet::load_param_file(&absolutize(cwd, path))?,
        None => ParameterSet::new(),
    };
    parameters.extend(ParameterSet::from_assignments(&args.parameters)?);
    Ok(parameters)
}

/// The project root: `--project-root` if given, else `cwd`.
pub fn project_root(requested: Option<&Path>, cwd: &Path) -> Result<PathBuf, CliError> {
    let Some(requested) = requested else {
        return Ok(cwd.to_path_buf());
    };
    let root = absolutize(cwd, requested);
    if !root.is_dir() {
        return Err(CliError::config(format!(
            "No such directory {}",
            requested.display()
        )));
    }
    Ok(root)
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// Run the parsed command line to completion.
pub async fn run(cli: Cli) -> Result<ExitOutcome, CliError> {
    run_with_env(cli, &ProcessEnv).await
}

/// Run the parsed command line with an explicit environment source.
pub async fn run_with_env(cli: Cli, env: &dyn EnvSource) -> Result<ExitOutcome, CliError> {
    let cwd = std::env::current_dir()
        .map_err(|e| CliError::failed(format!("Cannot read the current directory: {e}")))?;
    let root = project_root(cli.project_root.as_deref(), &cwd)?;
    let command_name = cli.command.name();
    let prepared = prepare(cli.command, &cwd)?;

    let mut config = LocalConfig::resolve(&root, env)?;
    config.check_updates |= cli.check_updates;
    let runner = ProcessRunner::new(config.timeouts.run);
    let mut controller = ToolchainController::new(config, Box::new(runner))?
        .with_pig_version(prepared.pig_version);

    let configure = matches!(prepared.request, Request::Configure);
    let outcome = controller
        .execute(prepared.request, prepared.parameters)
        .instrument(crate::command_span!(command_name))
        .await?;

    if configure {
        report_installs(&controller);
    }
    Ok(outcome.into_result()?)
}

#[allow(clippy::print_stdout)]
fn report_installs(controller: &ToolchainController) {
    for report in controller.install_reports() {
        println!("{}", install_line(report));
    }
}

fn install_line(report: &InstallReport) -> String {
    let role = ToolSpec::get(report.tool).role;
    let version = report
        .version
        .as_deref()
        .map_or(String::new(), |v| format!(" ({v})"));
    match report.action {
        InstallAction::Unchanged => format!("{} [{role}] is up to date{version}", report.tool),
        action => format!(
            "{} [{role}] {action} in {}{version}",
            report.tool,
            report.install_dir.display()
        ),
    }
}
