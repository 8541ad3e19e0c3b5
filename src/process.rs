//! Process control for the Asterisk server.
//!
//! The server runs in the foreground as a child process. Everything else
//! goes through its remote console: `asterisk -C <conf> -rx <command>`
//! connects to the running server, runs one CLI command and exits.
//!
//! ## Boot
//!
//! After spawning, readiness is polled with `core waitfullybooted` under a
//! [`BootPolicy`]: each attempt sleeps, then queries. Any failure counts as
//! an attempt. When the attempts run out the child is killed and
//! [`Error::BootTimeout`] is returned.
//!
//! ## Shutdown
//!
//! `core stop gracefully` is issued (its failure is logged and ignored, the
//! server may already be exiting) and the child is awaited.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::constants::{
    BOOT_DELAY_MS, BOOT_MAX_ATTEMPTS, CMD_STOP_GRACEFULLY, CMD_WAIT_FULLY_BOOTED,
};
use crate::error::{Error, Result};

/// Bounded retry policy for the readiness poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootPolicy {
    /// Maximum number of readiness queries.
    pub max_attempts: u32,
    /// Delay before each query.
    pub delay: Duration,
}

impl Default for BootPolicy {
    fn default() -> Self {
        Self {
            max_attempts: BOOT_MAX_ATTEMPTS,
            delay: Duration::from_millis(BOOT_DELAY_MS),
        }
    }
}

/// Captured output of a successful CLI command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Resolve the server binary, searching `PATH` for bare names.
///
/// # Errors
///
/// Returns [`Error::BinaryNotFound`] if nothing executable matches `name`.
pub fn resolve_binary(name: &Path) -> Result<PathBuf> {
    which::which(name).map_err(|e| Error::BinaryNotFound {
        name: name.display().to_string(),
        reason: e.to_string(),
    })
}

/// Spawns, polls and stops one server process.
#[derive(Debug)]
pub struct ProcessController {
    binary: Option<PathBuf>,
    conf: PathBuf,
    child: Option<Child>,
}

impl ProcessController {
    /// Create a controller for the server configured by `conf`.
    pub fn new(conf: impl Into<PathBuf>) -> Self {
        Self {
            binary: None,
            conf: conf.into(),
            child: None,
        }
    }

    /// Set the resolved server binary.
    pub fn set_binary(&mut self, binary: impl Into<PathBuf>) {
        self.binary = Some(binary.into());
    }

    /// The resolved server binary, if any.
    #[must_use]
    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }

    /// Returns true while a spawned child is held.
    #[must_use]
    pub fn has_process(&self) -> bool {
        self.child.is_some()
    }

    /// OS process id of the held child.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Spawn the server and wait until it reports full initialization.
    ///
    /// Returns the number of readiness attempts that failed before success.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotStarted`] without a binary, [`Error::Spawn`] if
    /// the child cannot be created, or [`Error::BootTimeout`] once the
    /// policy is exhausted. On timeout the child is killed and released.
    pub async fn start(&mut self, policy: BootPolicy) -> Result<u32> {
        let binary = self.binary.clone().ok_or(Error::NotStarted)?;

        let child = Command::new(&binary)
            .arg("-f")
            .arg("-C")
            .arg(&self.conf)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::spawn(&binary, e))?;
        info!(binary = %binary.display(), pid = child.id(), "Spawned asterisk");
        self.child = Some(child);

        match self.wait_fully_booted(policy).await {
            Ok(failed) => Ok(failed),
            Err(e) => {
                if let Some(mut child) = self.child.take() {
                    if let Err(kill_err) = child.kill().await {
                        warn!(error = %kill_err, "Failed to kill asterisk after boot failure");
                    }
                }
                Err(e)
            },
        }
    }

    /// Poll `core waitfullybooted` until it succeeds or the policy runs out.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BootTimeout`] after `policy.max_attempts` failures.
    pub async fn wait_fully_booted(&self, policy: BootPolicy) -> Result<u32> {
        let mut attempt = 0u32;
        while attempt < policy.max_attempts {
            tokio::time::sleep(policy.delay).await;
            match self.cli_command(CMD_WAIT_FULLY_BOOTED).await {
                Ok(_) => {
                    debug!(failed_attempts = attempt, "Asterisk fully booted");
                    return Ok(attempt);
                },
                Err(e) => {
                    attempt += 1;
                    debug!(attempt, max_attempts = policy.max_attempts, error = %e, "Not booted yet");
                },
            }
        }

        warn!(attempts = attempt, "Asterisk failed to boot");
        Err(Error::BootTimeout { attempts: attempt })
    }

    /// Run one CLI command against the running server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotStarted`] without a binary, [`Error::Spawn`] if
    /// the command cannot run, or [`Error::CommandFailed`] on non-zero exit.
    pub async fn cli_command(&self, command: &str) -> Result<CommandOutput> {
        let binary = self.binary.as_ref().ok_or(Error::NotStarted)?;

        let output = Command::new(binary)
            .arg("-C")
            .arg(&self.conf)
            .arg("-rx")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::spawn(binary, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: command.to_string(),
                status: output.status,
                stderr,
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }

    /// Stop the server gracefully and wait for it to exit.
    ///
    /// The child is released before anything is awaited, so a second call
    /// is a no-op. `grace` delays the stop command when set.
    ///
    /// Returns `false` if there was no process to stop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Process`] if waiting on the child fails.
    pub async fn stop(&mut self, grace: Option<Duration>) -> Result<bool> {
        let Some(mut child) = self.child.take() else {
            return Ok(false);
        };

        if let Some(grace) = grace {
            info!(?grace, "Delaying shutdown for refs debug log");
            tokio::time::sleep(grace).await;
        }

        if let Err(e) = self.cli_command(CMD_STOP_GRACEFULLY).await {
            warn!(error = %e, "Graceful stop command failed");
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::process("wait for asterisk exit", e))?;
        info!(%status, "Asterisk exited");
        Ok(true)
    }
}

/// Run the refcounter script over a refs debug log.
///
/// # Errors
///
/// Returns [`Error::LeakDetected`] when the script exits non-zero, or
/// [`Error::Spawn`] if the interpreter cannot be run.
pub async fn run_refcounter(python: &Path, script: &Path, log: &Path) -> Result<()> {
    let output = Command::new(python)
        .arg(script)
        .arg("-f")
        .arg(log)
        .arg("-n")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::spawn(python, e))?;

    if output.status.success() {
        return Ok(());
    }

    let mut report = String::from_utf8_lossy(&output.stdout).into_owned();
    report.push_str(&String::from_utf8_lossy(&output.stderr));
    Err(Error::LeakDetected {
        log: log.to_path_buf(),
        report: report.trim().to_string(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Write an executable shell script into `dir`.
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn quick() -> BootPolicy {
        BootPolicy {
            max_attempts: 5,
            delay: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_cli_command_requires_binary() {
        let controller = ProcessController::new("/tmp/asterisk.conf");
        assert!(matches!(
            controller.cli_command("core show version").await,
            Err(Error::NotStarted)
        ));
    }

    #[tokio::test]
    async fn test_cli_command_passes_arguments() {
        let dir = TempDir::new().unwrap();
        let bin = script(dir.path(), "asterisk", "echo \"$1|$2|$3|$4\"\n");

        let mut controller = ProcessController::new("/etc/asterisk.conf");
        controller.set_binary(&bin);
        let out = controller.cli_command("core show channels").await.unwrap();
        assert_eq!(out.stdout, "-C|/etc/asterisk.conf|-rx|core show channels\n");
    }

    #[tokio::test]
    async fn test_cli_command_failure() {
        let dir = TempDir::new().unwrap();
        let bin = script(dir.path(), "asterisk", "echo nope >&2\nexit 3\n");

        let mut controller = ProcessController::new("/etc/asterisk.conf");
        controller.set_binary(&bin);
        let err = controller.cli_command("core show version").await.unwrap_err();
        match err {
            Error::CommandFailed { command, stderr, .. } => {
                assert_eq!(command, "core show version");
                assert_eq!(stderr, "nope\n");
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_boot_timeout_kills_process() {
        let dir = TempDir::new().unwrap();
        // Foreground mode sleeps forever; every CLI query fails.
        let bin = script(
            dir.path(),
            "asterisk",
            "if [ \"$1\" = \"-f\" ]; then exec sleep 600; fi\nexit 1\n",
        );

        let mut controller = ProcessController::new(dir.path().join("asterisk.conf"));
        controller.set_binary(&bin);
        let err = controller.start(quick()).await.unwrap_err();

        assert!(matches!(err, Error::BootTimeout { attempts: 5 }));
        assert!(!controller.has_process());
        assert!(!controller.stop(None).await.unwrap());
    }

    #[tokio::test]
    async fn test_boot_counts_failed_attempts() {
        let dir = TempDir::new().unwrap();
        let counter = dir.path().join("count");
        let body = format!(
            "if [ \"$1\" = \"-f\" ]; then exec sleep 600; fi\n\
             echo x >> {c}\n\
             [ $(wc -l < {c}) -ge 3 ]\n",
            c = counter.display()
        );
        let bin = script(dir.path(), "asterisk", &body);

        let mut controller = ProcessController::new(dir.path().join("asterisk.conf"));
        controller.set_binary(&bin);
        let failed = controller.start(quick()).await.unwrap();
        assert_eq!(failed, 2);
        assert!(controller.has_process());

        // The stop command is a no-op here, so kill the child directly.
        if let Some(mut child) = controller.child.take() {
            child.kill().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_refcounter_success_and_leak() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("refs");
        std::fs::write(&log, "").unwrap();

        let ok = script(dir.path(), "ok.sh", "exit 0\n");
        run_refcounter(Path::new("/bin/sh"), &ok, &log).await.unwrap();

        let leak = script(dir.path(), "leak.sh", "echo \"leaked: $2\"\nexit 1\n");
        let err = run_refcounter(Path::new("/bin/sh"), &leak, &log)
            .await
            .unwrap_err();
        match err {
            Error::LeakDetected { log: reported, report } => {
                assert_eq!(reported, log);
                assert_eq!(report, format!("leaked: {}", log.display()));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_binary_missing() {
        let err = resolve_binary(Path::new("definitely-not-asterisk-binary")).unwrap_err();
        assert!(matches!(err, Error::BinaryNotFound { .. }));
    }
}
