//! Initial environment snapshot shown to every agent on its first turn.

use std::fmt::Write as _;
use std::time::Duration;

use tracing::warn;

use crate::io::executor::CommandExecutor;

/// Per-command timeout of snapshot commands.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `commands` through `executor` and format their output under `title`.
///
/// Failing commands are reported inline; the snapshot itself never fails.
pub fn snapshot(executor: &dyn CommandExecutor, commands: &[String], title: &str) -> String {
    if commands.is_empty() {
        return String::new();
    }
    let mut out = format!("## {title}");
    for cmd in commands {
        let body = match executor.execute(cmd, Some(SNAPSHOT_TIMEOUT)) {
            Ok(result) => result.output.trim_end().to_string(),
            Err(err) => {
                warn!(cmd = %cmd, err = %err, "snapshot command failed");
                format!("[ERROR] {err:#}")
            }
        };
        let _ = write!(out, "\n\n$ {cmd}\n{body}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeExecutor;

    #[test]
    fn formats_each_command_under_the_title() {
        let executor = FakeExecutor::new().with_reply("pwd", "/repo\n", 0);
        let text = snapshot(
            &executor,
            &["pwd".to_string(), "ls".to_string()],
            "Initial Env State",
        );
        assert!(text.starts_with("## Initial Env State"));
        assert!(text.contains("$ pwd\n/repo"));
        assert!(text.contains("$ ls\n"));
        assert_eq!(executor.commands(), vec!["pwd", "ls"]);
    }

    #[test]
    fn no_commands_means_no_snapshot() {
        let executor = FakeExecutor::new();
        assert_eq!(snapshot(&executor, &[], "Initial Env State"), "");
    }
}
