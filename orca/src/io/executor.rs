//! Shell command execution backend.
//!
//! The [`CommandExecutor`] trait decouples the action handler from where
//! commands actually run. [`LocalExecutor`] runs them with `bash -c` in the
//! workspace root; tests use scripted executors that never spawn processes.

use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::process::{TIMEOUT_EXIT_CODE, run_command_with_timeout};

/// Output and exit status of one blocking command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub output: String,
    pub exit_code: i32,
}

/// Abstraction over command execution backends. Shared by every agent of a
/// run, including agents on parallel launch threads.
pub trait CommandExecutor: Send + Sync {
    /// Run `cmd` to completion. `None` uses the backend's default timeout.
    /// A timeout is reported as exit code 124, not as an error.
    fn execute(&self, cmd: &str, timeout: Option<Duration>) -> Result<CommandResult>;

    /// Start `cmd` detached and return without waiting for it.
    fn execute_background(&self, cmd: &str) -> Result<()>;
}

/// Executor running commands on the local machine.
pub struct LocalExecutor {
    workspace_root: PathBuf,
    default_timeout: Duration,
    output_limit_bytes: usize,
}

impl LocalExecutor {
    pub fn new(
        workspace_root: &Path,
        default_timeout: Duration,
        output_limit_bytes: usize,
    ) -> Result<Self> {
        let workspace_root = workspace_root
            .canonicalize()
            .with_context(|| format!("resolve workspace root {}", workspace_root.display()))?;
        if !workspace_root.is_dir() {
            return Err(anyhow!(
                "workspace root is not a directory: {}",
                workspace_root.display()
            ));
        }
        info!(workspace = %workspace_root.display(), "local executor ready");
        Ok(Self {
            workspace_root,
            default_timeout,
            output_limit_bytes,
        })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }
}

impl CommandExecutor for LocalExecutor {
    #[instrument(skip_all, fields(timeout_secs))]
    fn execute(&self, cmd: &str, timeout: Option<Duration>) -> Result<CommandResult> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        tracing::Span::current().record("timeout_secs", timeout.as_secs());
        debug!(cmd, "executing command");

        let mut command = Command::new("bash");
        command.arg("-c").arg(cmd).current_dir(&self.workspace_root);
        let output = run_command_with_timeout(command, None, timeout, self.output_limit_bytes)
            .context("run bash command")?;

        if output.timed_out {
            warn!(cmd, timeout_secs = timeout.as_secs(), "command timed out");
            return Ok(CommandResult {
                output: format!("Command timed out after {} seconds", timeout.as_secs()),
                exit_code: TIMEOUT_EXIT_CODE,
            });
        }
        Ok(CommandResult {
            output: output.combined_text(),
            exit_code: output.exit_code(),
        })
    }

    #[instrument(skip_all)]
    fn execute_background(&self, cmd: &str) -> Result<()> {
        debug!(cmd, "starting background command");
        let mut child = Command::new("bash")
            .arg("-c")
            .arg(cmd)
            .current_dir(&self.workspace_root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .context("spawn background command")?;
        let pid = child.id();
        thread::spawn(move || match child.wait() {
            Ok(status) => debug!(pid, exit_code = ?status.code(), "background command exited"),
            Err(err) => warn!(pid, err = %err, "failed to reap background command"),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Instant;

    use super::*;

    fn executor(root: &Path) -> LocalExecutor {
        LocalExecutor::new(root, Duration::from_secs(10), 10_000).expect("executor")
    }

    #[test]
    fn runs_in_workspace_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("marker.txt"), "here").expect("write");
        let result = executor(temp.path())
            .execute("cat marker.txt", None)
            .expect("execute");
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "here");
    }

    #[test]
    fn non_zero_exit_is_not_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = executor(temp.path())
            .execute("echo nope >&2; exit 2", None)
            .expect("execute");
        assert_eq!(result.exit_code, 2);
        assert_eq!(result.output, "nope\n");
    }

    #[test]
    fn timeout_reports_exit_code_124() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = executor(temp.path())
            .execute("sleep 5", Some(Duration::from_secs(1)))
            .expect("execute");
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert_eq!(result.output, "Command timed out after 1 seconds");
    }

    #[test]
    fn missing_workspace_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let missing = temp.path().join("nope");
        assert!(LocalExecutor::new(&missing, Duration::from_secs(1), 10).is_err());
    }

    #[test]
    fn background_command_returns_immediately() {
        let temp = tempfile::tempdir().expect("tempdir");
        executor(temp.path())
            .execute_background("sleep 2")
            .expect("background");
    }

    #[test]
    fn background_compound_command_does_not_block() {
        let temp = tempfile::tempdir().expect("tempdir");
        let started = Instant::now();
        executor(temp.path())
            .execute_background("sleep 1; echo served > served.txt")
            .expect("background");
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!temp.path().join("served.txt").exists());

        let deadline = Instant::now() + Duration::from_secs(10);
        while !temp.path().join("served.txt").exists() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(
            fs::read_to_string(temp.path().join("served.txt")).expect("served"),
            "served\n"
        );
    }

    #[test]
    fn timeout_bounds_compound_commands() {
        let temp = tempfile::tempdir().expect("tempdir");
        let started = Instant::now();
        let result = executor(temp.path())
            .execute("sleep 6; echo done", Some(Duration::from_secs(1)))
            .expect("execute");
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    }
}
