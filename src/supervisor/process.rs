//! Host process launching and termination

use std::ffi::OsString;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};

/// A running host process
///
/// The host shares the supervisor's console: stdio is inherited so that
/// interactive use and terminal signals reach it unmodified.
pub struct HostProcess {
    child: Child,
    pid: u32,
}

impl HostProcess {
    /// Start `program` with `args` in `working_dir`
    pub fn launch(
        program: &Path,
        working_dir: &Path,
        args: &[OsString],
    ) -> Result<Self, LaunchError> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.current_dir(working_dir);
        cmd.stdin(Stdio::inherit());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
        // Never leave a host behind if the supervisor unwinds
        cmd.kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            program: program.display().to_string(),
            source,
        })?;
        // Only None once the child has been reaped, which cannot happen before the first wait
        let pid = child.id().ok_or(LaunchError::NoPid)?;

        Ok(Self { child, pid })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wait for the host to exit and return its exit code
    ///
    /// Cancel safe: dropping the future leaves the process running.
    pub async fn wait(&mut self) -> Result<i32, LaunchError> {
        let status = self.child.wait().await.map_err(LaunchError::Wait)?;
        Ok(exit_code(status))
    }

    /// Request immediate termination
    ///
    /// Returns false if the host had already exited, which is not an error.
    pub fn terminate(&mut self) -> bool {
        if let Ok(Some(_)) = self.child.try_wait() {
            log::debug!("Host PID {} already exited, nothing to kill", self.pid);
            return false;
        }

        match self.child.start_kill() {
            Ok(()) => {
                log::debug!("Sent kill to host PID {}", self.pid);
                true
            }
            Err(e) => {
                log::debug!("Kill of host PID {} raced its exit: {}", self.pid, e);
                false
            }
        }
    }
}

/// Numeric exit code of a finished process
///
/// Processes killed by a signal report `128 + signal`, like a shell does.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Host process has no PID")]
    NoPid,

    #[error("Failed waiting for host process: {0}")]
    Wait(#[source] std::io::Error),
}
