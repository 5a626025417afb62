//! Launching and signalling emulator processes.
//!
//! Architecture:
//! - [`Launcher`] turns a program plus arguments into a `tokio::process`
//!   command.  On systems that refuse to execute files from the data
//!   partition, the program is run through the platform's dynamic linker
//!   (`linker64 /path/to/qemu-system-x86_64 ...`).
//! - [`EmulatorProcess`] owns the spawned child.  stdout and stderr are
//!   drained by background tasks into an [`OutputTail`] so the child never
//!   blocks on a full pipe.
//! - Termination is a polite SIGTERM on unix.  Whether and when to escalate
//!   is the caller's decision.

pub mod output;

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;

pub use output::OutputTail;

/// How long to wait for the output drains after the child has exited.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Builds commands with the loader prefix, environment and working
/// directory every emulator-related program needs.
#[derive(Debug, Clone, Default)]
pub struct Launcher {
    /// Dynamic linker used to start binaries indirectly.
    pub loader: Option<PathBuf>,
    /// Variables added to the inherited environment.
    pub environment: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
}

impl Launcher {
    /// Prepares `program args...`, prefixed with the loader if one is set.
    pub fn command<I, S>(&self, program: &Path, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut command = match &self.loader {
            Some(loader) => {
                let mut command = Command::new(loader);
                command.arg(program);
                command
            }
            None => Command::new(program),
        };
        command.args(args);
        command.envs(self.environment.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

/// A running emulator child process.
pub struct EmulatorProcess {
    child: Child,
    output: OutputTail,
    drains: Vec<JoinHandle<()>>,
}

impl EmulatorProcess {
    /// Spawns `command` with piped output.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(mut command: Command, machine: &str) -> io::Result<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command.spawn()?;

        let output = OutputTail::default();
        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(tokio::spawn(output.clone().drain(
                stdout,
                machine.to_string(),
                "stdout",
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(tokio::spawn(output.clone().drain(
                stderr,
                machine.to_string(),
                "stderr",
            )));
        }

        Ok(Self {
            child,
            output,
            drains,
        })
    }

    /// OS process id, if the child has not been reaped yet.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Polls the child without blocking.  A wait error counts as dead.
    pub fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(%status, "emulator process has exited");
                false
            }
            Err(e) => {
                debug!(error = %e, "could not poll emulator process");
                false
            }
        }
    }

    /// Waits briefly for the output drains to reach EOF, then returns the
    /// captured output.  Use after the child has exited.
    pub async fn collect_output(&mut self) -> String {
        for drain in self.drains.drain(..) {
            if time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
                debug!("output drain still running after exit");
            }
        }
        self.output.snapshot()
    }

    /// Asks the process to exit.
    ///
    /// Sends SIGTERM on unix; elsewhere there is no polite signal and the
    /// process is killed.
    pub fn terminate(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            match self.child.id() {
                Some(pid) => send_sigterm(pid),
                // Already reaped.
                None => Ok(()),
            }
        }
        #[cfg(not(unix))]
        {
            self.child.start_kill()
        }
    }

    /// Waits for the process to exit.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Kills the process and waits for it.
    pub async fn kill(&mut self) -> io::Result<ExitStatus> {
        self.child.kill().await?;
        self.child.wait().await
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) takes plain integers and touches no memory we own.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
