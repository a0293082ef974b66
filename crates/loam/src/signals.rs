//! Forwarding of interrupt signals to a running child.

use loam_core::{Error, Result};
use tracing::{debug, warn};

/// A signal loam relays to the child it is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardedSignal {
    /// SIGINT (Ctrl+C).
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl ForwardedSignal {
    /// Raw signal number.
    #[cfg(unix)]
    #[must_use]
    pub fn as_raw(self) -> i32 {
        match self {
            Self::Interrupt => libc::SIGINT,
            Self::Terminate => libc::SIGTERM,
        }
    }
}

/// Listens for SIGINT and SIGTERM while a child runs.
///
/// Creating the listener replaces the default disposition, so the parent
/// stays alive to reap the child and clean up temporary files.
pub struct SignalListener {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl std::fmt::Debug for SignalListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalListener").finish_non_exhaustive()
    }
}

impl SignalListener {
    /// Install the handlers. Requires a running tokio runtime.
    #[cfg(unix)]
    pub fn install() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        let interrupt = signal(SignalKind::interrupt()).map_err(|e| Error::Io {
            source: e,
            path: None,
            operation: "install SIGINT handler".to_string(),
        })?;
        let terminate = signal(SignalKind::terminate()).map_err(|e| Error::Io {
            source: e,
            path: None,
            operation: "install SIGTERM handler".to_string(),
        })?;
        Ok(Self {
            interrupt,
            terminate,
        })
    }

    /// Install the handlers. Requires a running tokio runtime.
    #[cfg(not(unix))]
    pub fn install() -> Result<Self> {
        Ok(Self {})
    }

    /// Wait for the next signal.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> ForwardedSignal {
        tokio::select! {
            _ = self.interrupt.recv() => ForwardedSignal::Interrupt,
            _ = self.terminate.recv() => ForwardedSignal::Terminate,
        }
    }

    /// Wait for the next signal.
    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> ForwardedSignal {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        ForwardedSignal::Interrupt
    }
}

/// Send `signal` to the process `pid`.
///
/// A child that has already exited is not an error.
#[cfg(unix)]
pub fn forward(pid: u32, signal: ForwardedSignal) {
    let Ok(raw_pid) = i32::try_from(pid) else {
        warn!(pid, "Child pid out of range; signal not forwarded");
        return;
    };
    debug!(pid, ?signal, "Forwarding signal to child");
    // SAFETY: kill(2) has no memory-safety preconditions. The pid belongs to
    // a child this process spawned and has not yet reaped.
    #[expect(unsafe_code, reason = "Required for POSIX signal handling")]
    let rc = unsafe { libc::kill(raw_pid, signal.as_raw()) };
    if rc != 0 {
        debug!(pid, error = %std::io::Error::last_os_error(), "Signal not delivered");
    }
}

/// Whether the terminal already delivered `signal` to the child.
///
/// Ctrl+C reaches every process in the terminal's foreground process group.
/// A child spawned by loam inherits loam's group, so when that group owns
/// the terminal an interrupt must not be sent a second time.
#[cfg(unix)]
#[must_use]
pub fn delivered_by_terminal(signal: ForwardedSignal) -> bool {
    if signal != ForwardedSignal::Interrupt {
        return false;
    }
    // SAFETY: tcgetpgrp(3) and getpgrp(2) only read process state and
    // report failure through their return value.
    #[expect(unsafe_code, reason = "Required to query the terminal's process group")]
    let (foreground, own) = unsafe { (libc::tcgetpgrp(libc::STDIN_FILENO), libc::getpgrp()) };
    foreground > 0 && foreground == own
}

/// Whether the terminal already delivered `signal` to the child.
#[cfg(not(unix))]
#[must_use]
pub fn delivered_by_terminal(_signal: ForwardedSignal) -> bool {
    false
}

/// Send `signal` to the process `pid`.
#[cfg(not(unix))]
pub fn forward(pid: u32, signal: ForwardedSignal) {
    debug!(pid, ?signal, "Signal forwarding is unsupported on this platform");
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_raw_numbers() {
        assert_eq!(ForwardedSignal::Interrupt.as_raw(), libc::SIGINT);
        assert_eq!(ForwardedSignal::Terminate.as_raw(), libc::SIGTERM);
    }

    #[test]
    fn test_terminate_is_never_delivered_by_terminal() {
        assert!(!delivered_by_terminal(ForwardedSignal::Terminate));
    }

    #[tokio::test]
    async fn test_forward_terminates_child() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        forward(child.id().unwrap(), ForwardedSignal::Terminate);
        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }
}
