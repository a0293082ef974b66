//! Controller lifecycle tests against a pre-provisioned install root.
#![cfg(unix)]

use async_trait::async_trait;
use chrono::Utc;
use loam::controller::{ControllerState, ExportRequest, Request, ToolchainController};
use loam::prereq::SystemTools;
use loam::runner::{ExitOutcome, Invocation, ProcessRunner, ScriptRunner};
use loam_core::config::LocalConfig;
use loam_core::params::{Parameter, ParameterSet};
use loam_core::tools::{InstallRecord, PigVersion, ToolId, ToolSpec};
use loam_core::{Error, Result};
use loam_tools_archive::{InstallAction, InstallManager, RemoteProbe, VersionToken};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const PIG: ToolId = ToolId::Pig(PigVersion::Pig09);

/// What the runner saw, captured while the temporary files still existed.
#[derive(Debug, Clone)]
struct Recorded {
    program: PathBuf,
    args: Vec<String>,
    script: Option<String>,
    param_file: Option<String>,
}

#[derive(Clone)]
struct RecordingRunner {
    calls: Arc<Mutex<Vec<Recorded>>>,
    exit_code: i32,
}

impl RecordingRunner {
    fn new(exit_code: i32) -> Self {
        Self {
            calls: Arc::default(),
            exit_code,
        }
    }

    fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScriptRunner for RecordingRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ExitOutcome> {
        let args: Vec<String> = invocation
            .args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let script = args
            .first()
            .filter(|a| a.ends_with(".sh"))
            .and_then(|path| std::fs::read_to_string(path).ok());
        let param_file = script
            .as_deref()
            .and_then(quoted_after("'-param_file' '"))
            .and_then(|path| std::fs::read_to_string(path).ok());
        self.calls.lock().unwrap().push(Recorded {
            program: invocation.program.clone(),
            args,
            script,
            param_file,
        });
        Ok(ExitOutcome::exited(self.exit_code))
    }
}

fn quoted_after(marker: &'static str) -> impl Fn(&str) -> Option<String> {
    move |text: &str| {
        let start = text.find(marker)? + marker.len();
        let end = text[start..].find('\'')?;
        Some(text[start..start + end].to_string())
    }
}

struct NoUpdates;

#[async_trait]
impl RemoteProbe for NoUpdates {
    async fn remote_version(&self, _url: &str) -> Result<Option<VersionToken>> {
        Ok(None)
    }
}

struct Project {
    _temp: TempDir,
    config: LocalConfig,
}

impl Project {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("project");
        std::fs::create_dir_all(&root).unwrap();
        let mut config = LocalConfig::new(&root);
        // Nothing should ever be downloaded in these tests.
        for tool in [PIG, ToolId::Jython, ToolId::Hadoop, ToolId::Sqoop] {
            config
                .url_overrides
                .insert(tool, format!("file://{}/missing/{tool}.tar.gz", temp.path().display()));
        }
        Self {
            _temp: temp,
            config,
        }
    }

    fn root(&self) -> &Path {
        &self.config.project_root
    }

    fn touch(&self, rel: &str, contents: &str) {
        let path = self.root().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    /// Lay down a tool as if a previous run had installed it.
    fn preinstall(&self, tool: ToolId, body: &str) {
        let spec = ToolSpec::get(tool);
        let root = &self.config.install_root;
        let exe = spec.executable_path(root);
        std::fs::create_dir_all(exe.parent().unwrap()).unwrap();
        std::fs::write(&exe, body).unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();
        InstallRecord {
            tool: spec.name.to_string(),
            version: Some("20240101000000".into()),
            url: "file:///mirror".into(),
            sha256: "0".repeat(64),
            installed_at: Utc::now(),
        }
        .write(&spec.install_path(root))
        .unwrap();
    }

    fn controller(&self, runner: impl ScriptRunner + 'static) -> ToolchainController {
        let manager = InstallManager::new(&self.config)
            .unwrap()
            .with_probe(Box::new(NoUpdates));
        ToolchainController::new(self.config.clone(), Box::new(runner))
            .unwrap()
            .with_install_manager(manager)
            .with_system_tools(SystemTools {
                java: Some(PathBuf::from("/usr/bin/java")),
                java_home: None,
                python: Some(PathBuf::from("/usr/bin/python3")),
            })
    }
}

fn params(pairs: &[(&str, &str)]) -> ParameterSet {
    pairs.iter().map(|(k, v)| Parameter::new(*k, *v)).collect()
}

#[tokio::test]
async fn test_run_pigscript_invokes_runner_once() {
    let mut project = Project::new();
    project.touch("pigscripts/wordcount.pig", "a = LOAD '$INPUT';\n");
    project.preinstall(PIG, "#!/bin/sh\n");
    project.config.parameters = params(&[("INPUT", "from-config"), ("OUTPUT", "out")]);

    let runner = RecordingRunner::new(0);
    let mut controller = project.controller(runner.clone());
    let outcome = controller
        .execute(
            Request::Run {
                script: "wordcount".into(),
            },
            params(&[("INPUT", "from-cli")]),
        )
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(controller.state(), ControllerState::Succeeded);

    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].program, PathBuf::from("/bin/sh"));

    let script = calls[0].script.as_deref().unwrap();
    assert!(script.contains("'-x' 'local' '-f' 'pigscripts/wordcount.pig' '-param_file'"));
    assert!(script.contains("export PIG_CLASSPATH=''"));
    assert!(!script.contains("JAVA_HOME"));

    // Configuration values come first so the invocation's win.
    assert_eq!(
        calls[0].param_file.as_deref(),
        Some("INPUT=from-config\nOUTPUT=out\nINPUT=from-cli\n")
    );

    let reports = controller.install_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].action, InstallAction::Unchanged);
}

#[tokio::test]
async fn test_nonzero_exit_is_returned_unchanged() {
    let project = Project::new();
    project.touch("pigscripts/broken.pig", "");
    project.preinstall(PIG, "#!/bin/sh\n");

    let mut controller = project.controller(RecordingRunner::new(4));
    let outcome = controller
        .execute(
            Request::Validate {
                script: "broken".into(),
            },
            ParameterSet::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.exit_code, 4);
    assert_eq!(controller.state(), ControllerState::Failed);
    assert!(matches!(outcome.into_result(), Err(Error::NonZeroExit { code: 4 })));
}

#[tokio::test]
async fn test_missing_java_fails_before_install() {
    let project = Project::new();
    project.touch("pigscripts/wordcount.pig", "");

    let runner = RecordingRunner::new(0);
    let mut controller = project
        .controller(runner.clone())
        .with_system_tools(SystemTools::default());
    let err = controller
        .execute(
            Request::Run {
                script: "wordcount".into(),
            },
            ParameterSet::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(&err, Error::PrerequisiteMissing { name, .. } if name == "Java"));
    assert_eq!(controller.state(), ControllerState::Failed);
    assert!(runner.calls().is_empty());
    assert!(!project.config.install_root.exists());
}

#[tokio::test]
async fn test_missing_script_lists_available() {
    let project = Project::new();
    project.touch("pigscripts/alpha.pig", "");
    project.touch("controlscripts/beta.py", "");

    let runner = RecordingRunner::new(0);
    let mut controller = project.controller(runner.clone());
    let err = controller
        .execute(
            Request::Run {
                script: "gamma".into(),
            },
            ParameterSet::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ScriptNotFound { .. }));
    let message = err.to_string();
    assert!(message.contains("Unable to find a pigscript or controlscript for gamma"));
    assert!(message.contains("pigscripts/alpha.pig"));
    assert!(message.contains("controlscripts/beta.py"));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_control_script_puts_jython_on_classpath() {
    let project = Project::new();
    project.touch("controlscripts/loop.py", "");
    project.preinstall(PIG, "#!/bin/sh\n");
    project.preinstall(ToolId::Jython, "");

    let runner = RecordingRunner::new(0);
    let mut controller = project.controller(runner.clone());
    controller
        .execute(
            Request::Run {
                script: "loop".into(),
            },
            ParameterSet::new(),
        )
        .await
        .unwrap();

    let jar = ToolSpec::get(ToolId::Jython).executable_path(&project.config.install_root);
    let script = runner.calls()[0].script.clone().unwrap();
    assert!(script.contains(&format!("export PIG_CLASSPATH='{}'", jar.display())));
    assert!(script.contains("'-f' 'controlscripts/loop.py'"));
}

#[tokio::test]
async fn test_workflow_argument_order() {
    let project = Project::new();
    project.touch("workflowscripts/daily.py", "");

    let runner = RecordingRunner::new(0);
    let mut controller = project.controller(runner.clone());
    controller
        .execute(
            Request::Workflow {
                script: "daily".into(),
                args: vec!["--dry-run".into()],
            },
            params(&[("DATE", "2024-01-01"), ("BUCKET", "b")]),
        )
        .await
        .unwrap();

    let calls = runner.calls();
    assert_eq!(calls[0].program, PathBuf::from("/usr/bin/python3"));
    let script = project.root().join("workflowscripts/daily.py");
    assert_eq!(
        calls[0].args,
        vec![
            script.display().to_string(),
            "--BUCKET".into(),
            "b".into(),
            "--DATE".into(),
            "2024-01-01".into(),
            "--dry-run".into(),
        ]
    );
    assert!(controller.install_reports().is_empty());
}

#[tokio::test]
async fn test_export_renders_connector_command() {
    let project = Project::new();
    project.preinstall(ToolId::Hadoop, "#!/bin/sh\n");
    project.preinstall(ToolId::Sqoop, "#!/bin/sh\n");

    let runner = RecordingRunner::new(0);
    let mut controller = project.controller(runner.clone());
    controller
        .execute(
            Request::Export(ExportRequest {
                connection: "jdbc:postgresql://db/app".into(),
                table: "users".into(),
                destination: "s3n://bucket/users".into(),
                username: Some("etl".into()),
                password: None,
                jdbc_driver: None,
                direct: true,
            }),
            ParameterSet::new(),
        )
        .await
        .unwrap();

    let script = runner.calls()[0].script.clone().unwrap();
    assert!(script.contains("--connect 'jdbc:postgresql://db/app'"));
    assert!(script.contains("--table 'users'"));
    assert!(script.contains("--username 'etl'"));
    assert!(script.contains("--direct"));
    assert!(!script.contains("--password"));
}

#[tokio::test]
async fn test_configure_ignores_install_root() {
    let project = Project::new();
    project.preinstall(PIG, "#!/bin/sh\n");
    project.preinstall(ToolId::Jython, "");

    let runner = RecordingRunner::new(0);
    let mut controller = project.controller(runner.clone());
    let outcome = controller
        .execute(Request::Configure, ParameterSet::new())
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert!(runner.calls().is_empty());
    let tools: Vec<ToolId> = controller.install_reports().iter().map(|r| r.tool).collect();
    assert_eq!(tools, vec![PIG, ToolId::Jython]);
    assert_eq!(
        std::fs::read_to_string(project.root().join(".gitignore")).unwrap(),
        ".loam-local\n"
    );
}

#[tokio::test]
async fn test_process_runner_propagates_child_exit() {
    let project = Project::new();
    project.touch("pigscripts/wordcount.pig", "");
    project.preinstall(
        PIG,
        "#!/bin/sh\n\
         printf '%s\\n' \"$@\" > captured.args\n\
         while [ $# -gt 0 ]; do\n\
           if [ \"$1\" = \"-param_file\" ]; then cp \"$2\" captured.params; fi\n\
           shift\n\
         done\n\
         exit 7\n",
    );

    let mut controller = project.controller(ProcessRunner::new(None));
    let outcome = controller
        .execute(
            Request::Run {
                script: "wordcount".into(),
            },
            params(&[("OUTPUT", "it's here")]),
        )
        .await
        .unwrap();

    assert_eq!(outcome.exit_code, 7);
    assert!(!outcome.interrupted);
    assert_eq!(controller.state(), ControllerState::Failed);

    let args = std::fs::read_to_string(project.root().join("captured.args")).unwrap();
    let args: Vec<&str> = args.lines().collect();
    assert_eq!(&args[..4], &["-x", "local", "-f", "pigscripts/wordcount.pig"]);
    assert_eq!(args[4], "-param_file");
    assert!(!Path::new(args[5]).exists(), "param file outlived the run");
    assert_eq!(
        std::fs::read_to_string(project.root().join("captured.params")).unwrap(),
        "OUTPUT=it's here\n"
    );
}
