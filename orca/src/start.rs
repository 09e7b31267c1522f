//! Wiring for CLI commands: project initialization and orchestration runs.
//!
//! A run builds the local backends for a workspace root, the shared runtime
//! and the depth-0 orchestrator, then returns the orchestrator's outcome.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::agents::orchestrator::{Orchestrator, OrchestratorOutcome};
use crate::agents::{AgentRuntime, Backends};
use crate::core::budget::TimeBudget;
use crate::io::config::{DEFAULT_CONFIG_PATH, OrcaConfig, load_config, write_config};
use crate::io::executor::LocalExecutor;
use crate::io::model::CommandModel;
use crate::io::session_log::SessionLog;
use crate::io::workspace::LocalWorkspace;

/// Per-invocation overrides of the configured run settings.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub max_turns: Option<u32>,
    pub time_budget_secs: Option<u64>,
    pub verbose_results: bool,
}

/// Outcome of `orca init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOutcome {
    pub config_path: PathBuf,
    pub written: bool,
}

/// Write the default configuration under `root` unless one exists.
pub fn init_project(root: &Path, force: bool) -> Result<InitOutcome> {
    let config_path = root.join(DEFAULT_CONFIG_PATH);
    if config_path.exists() && !force {
        debug!(path = %config_path.display(), "config exists, leaving it untouched");
        return Ok(InitOutcome {
            config_path,
            written: false,
        });
    }
    write_config(&config_path, &OrcaConfig::default())?;
    info!(path = %config_path.display(), "wrote default config");
    Ok(InitOutcome {
        config_path,
        written: true,
    })
}

/// Load `<root>/.orca/config.toml` and apply environment overrides.
pub fn load_run_config(root: &Path) -> Result<OrcaConfig> {
    let mut config = load_config(&root.join(DEFAULT_CONFIG_PATH))?;
    config.apply_env_overrides(|name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

/// Run the orchestrator on `instruction` against the workspace at `root`.
pub fn start_run(
    root: &Path,
    mut config: OrcaConfig,
    instruction: &str,
    options: &RunOptions,
) -> Result<OrchestratorOutcome> {
    if let Some(max_turns) = options.max_turns {
        config.orchestrator.max_turns = max_turns;
    }
    if let Some(secs) = options.time_budget_secs {
        config.orchestrator.time_budget_secs = Some(secs);
    }
    config.limits.verbose_subagent_results |= options.verbose_results;
    config.validate()?;

    let executor = LocalExecutor::new(
        root,
        Duration::from_secs(config.executor.default_timeout_secs),
        config.executor.output_limit_bytes,
    )?;
    let workspace = LocalWorkspace::new(executor.workspace_root());
    let model = CommandModel::new(
        config.model.command.clone(),
        Duration::from_secs(config.model.timeout_secs),
        config.executor.output_limit_bytes,
    )?;

    let session_log = match &config.logging_dir {
        Some(dir) => {
            let dir = if dir.is_absolute() { dir.clone() } else { root.join(dir) };
            let log = SessionLog::create(&dir, &SessionLog::new_session_id())
                .context("create session log")?;
            info!(dir = %log.dir().display(), "session log enabled");
            Some(log)
        }
        None => None,
    };

    let max_turns = config.orchestrator.max_turns;
    let budget = TimeBudget::from_secs(config.orchestrator.time_budget_secs);
    let backends = Backends {
        model: &model,
        executor: &executor,
        workspace: &workspace,
    };
    let mut runtime = AgentRuntime::new(backends, config)?;
    if let Some(log) = session_log {
        runtime = runtime.with_session_log(log);
    }

    Orchestrator::new(&runtime, max_turns, budget).run(instruction)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn init_writes_default_config_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = init_project(temp.path(), false).expect("init");
        assert!(first.written);
        let loaded = load_config(&first.config_path).expect("load");
        assert_eq!(loaded.orchestrator.max_turns, OrcaConfig::default().orchestrator.max_turns);

        fs::write(&first.config_path, "[orchestrator]\nmax_turns = 7\n").expect("edit");
        let second = init_project(temp.path(), false).expect("init again");
        assert!(!second.written);
        assert_eq!(load_config(&second.config_path).expect("load").orchestrator.max_turns, 7);

        let forced = init_project(temp.path(), true).expect("force");
        assert!(forced.written);
        assert_eq!(load_config(&forced.config_path).expect("load").orchestrator.max_turns, 50);
    }

    #[test]
    fn run_requires_a_model_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = start_run(temp.path(), OrcaConfig::default(), "do it", &RunOptions::default())
            .expect_err("no model command");
        assert!(err.to_string().contains("model.command"));
    }

    #[test]
    fn run_drives_a_bridge_command_to_finish() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = OrcaConfig::default();
        config.executor.snapshot_commands.clear();
        config.logging_dir = Some(PathBuf::from("logs"));
        config.model.command = vec![
            "bash".to_string(),
            "-c".to_string(),
            "cat >/dev/null; printf '<finish>\\nmessage: done\\n</finish>'".to_string(),
        ];

        let outcome = start_run(
            temp.path(),
            config,
            "Say done",
            &RunOptions {
                max_turns: Some(3),
                ..RunOptions::default()
            },
        )
        .expect("run");
        assert!(outcome.completed);
        assert_eq!(outcome.finish_message.as_deref(), Some("done"));
        assert_eq!(outcome.turns_executed, 1);

        let sessions: Vec<_> = fs::read_dir(temp.path().join("logs"))
            .expect("logs dir")
            .collect();
        assert_eq!(sessions.len(), 1);
    }
}
