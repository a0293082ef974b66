//! Child process execution.
//!
//! [`ScriptRunner`] is the seam between the controller and the operating
//! system. [`ProcessRunner`] inherits stdio so long jobs stream their output
//! straight to the terminal, forwards SIGINT/SIGTERM the terminal did not
//! already deliver to the child, and reports the exit status instead of
//! failing on it. A run counts as interrupted only when the child itself
//! died from the signal.

use async_trait::async_trait;
use loam_core::params::ParameterSet;
use loam_core::{Error, Result};
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::signals::{self, SignalListener};

/// Base added to the signal number when a child is killed by a signal.
pub const SIGNAL_EXIT_BASE: i32 = 128;

/// A process to start.
#[derive(Clone, Default)]
pub struct Invocation {
    /// Program to execute.
    pub program: PathBuf,
    /// Arguments, in order.
    pub args: Vec<OsString>,
    /// Extra environment variables for the child.
    pub env: Vec<(String, String)>,
    /// Working directory, if different from the parent's.
    pub current_dir: Option<PathBuf>,
    /// Script parameters bound into this invocation.
    pub parameters: ParameterSet,
}

impl Invocation {
    /// Invocation of `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Append an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run the child in `dir`.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Record the parameters this invocation carries.
    #[must_use]
    pub fn parameters(mut self, parameters: ParameterSet) -> Self {
        self.parameters = parameters;
        self
    }
}

// Environment values and parameter values may hold credentials; only
// names are printed.
impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &self.env.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("current_dir", &self.current_dir)
            .field("parameters", &self.parameters.names())
            .finish()
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code; [`SIGNAL_EXIT_BASE`] plus the signal number when the
    /// child was killed by a signal.
    pub exit_code: i32,
    /// Whether the child died from SIGINT or SIGTERM.
    pub interrupted: bool,
}

impl ExitOutcome {
    /// Successful outcome.
    #[must_use]
    pub fn success() -> Self {
        Self {
            exit_code: 0,
            interrupted: false,
        }
    }

    /// Outcome with `exit_code`.
    #[must_use]
    pub fn exited(exit_code: i32) -> Self {
        Self {
            exit_code,
            interrupted: false,
        }
    }

    /// Whether the child exited with status zero and was not interrupted.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && !self.interrupted
    }

    /// Convert a failed run into [`Error::NonZeroExit`].
    ///
    /// Interrupted runs are returned unchanged so the caller can exit with
    /// the conventional interrupt status.
    pub fn into_result(self) -> Result<Self> {
        if self.exit_code != 0 && !self.interrupted {
            return Err(Error::NonZeroExit {
                code: self.exit_code,
            });
        }
        Ok(self)
    }
}

/// Executes an [`Invocation`] and waits for it to finish.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Run to completion. A non-zero exit is reported in the outcome, not
    /// as an error.
    async fn run(&self, invocation: &Invocation) -> Result<ExitOutcome>;
}

/// Runs invocations as real child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    /// Create a runner. `timeout` bounds each run.
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ScriptRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ExitOutcome> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &invocation.current_dir {
            cmd.current_dir(dir);
        }

        info!(
            program = %invocation.program.display(),
            args = invocation.args.len(),
            parameters = ?invocation.parameters.names(),
            "Starting child process"
        );

        let mut listener = SignalListener::install()?;
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::io(e, &invocation.program, "spawn"))?;
        let pid = child.id();
        let deadline = async {
            match self.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let status = loop {
            tokio::select! {
                status = child.wait() => {
                    break status.map_err(|e| Error::io(e, &invocation.program, "wait"))?;
                }
                signal = listener.recv() => {
                    match pid {
                        Some(_) if signals::delivered_by_terminal(signal) => {
                            debug!(?signal, "Child shares the terminal's process group");
                        }
                        Some(pid) => signals::forward(pid, signal),
                        None => debug!(?signal, "Child already reaped"),
                    }
                }
                () = &mut deadline => {
                    let seconds = self.timeout.map_or(0, |t| t.as_secs());
                    warn!(seconds, "Run timed out, killing child");
                    child
                        .kill()
                        .await
                        .map_err(|e| Error::io(e, &invocation.program, "kill"))?;
                    return Err(Error::Timeout {
                        operation: format!("Run of {}", invocation.program.display()),
                        seconds,
                    });
                }
            }
        };

        let outcome = ExitOutcome::from_status(status);
        debug!(
            exit_code = outcome.exit_code,
            interrupted = outcome.interrupted,
            "Child exited"
        );
        Ok(outcome)
    }
}

impl ExitOutcome {
    /// Outcome of a finished child. Only a child that was itself killed by
    /// SIGINT or SIGTERM counts as interrupted; one that handled the signal
    /// and exited keeps its own status.
    #[cfg(unix)]
    #[must_use]
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(exit_code), _) => Self::exited(exit_code),
            (None, Some(signal)) => Self {
                exit_code: SIGNAL_EXIT_BASE + signal,
                interrupted: signal == libc::SIGINT || signal == libc::SIGTERM,
            },
            (None, None) => Self::exited(SIGNAL_EXIT_BASE),
        }
    }

    /// Outcome of a finished child.
    #[cfg(not(unix))]
    #[must_use]
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        Self::exited(status.code().unwrap_or(1))
    }
}
