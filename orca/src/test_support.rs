//! Test-only fakes and fixtures for driving agents without a model or shell.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::agents::{AgentRuntime, Backends};
use crate::core::types::{AgentType, Message, TaskSpec};
use crate::io::config::OrcaConfig;
use crate::io::executor::{CommandExecutor, CommandResult};
use crate::io::model::{ContextWindowExceeded, ModelClient, ModelRequest};
use crate::io::workspace::LocalWorkspace;

/// Model answering from a fixed script, in order.
///
/// Calls past the end of the script fail. Every request's messages and
/// timeout are captured for inspection.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<Vec<Message>>>,
    timeouts: Mutex<Vec<Option<Duration>>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(replies.into_iter().map(|reply| Ok(reply.into())))
    }

    pub fn from_results(replies: impl IntoIterator<Item = Result<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            timeouts: Mutex::new(Vec::new()),
        }
    }

    /// Error a model call with a context-window overflow.
    pub fn overflow() -> Result<String> {
        Err(ContextWindowExceeded {
            detail: "prompt is too long".to_string(),
        }
        .into())
    }

    /// Message histories of all calls so far.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Timeouts passed with each call so far.
    pub fn timeouts(&self) -> Vec<Option<Duration>> {
        self.timeouts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl ModelClient for ScriptedModel {
    fn complete(&self, request: &ModelRequest<'_>) -> Result<String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.messages.to_vec());
        self.timeouts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.timeout);
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("scripted model has no reply left")))
    }
}

/// Executor answering from canned replies keyed by command text.
///
/// Unknown commands succeed with empty output.
#[derive(Default)]
pub struct FakeExecutor {
    replies: HashMap<String, CommandResult>,
    commands: Mutex<Vec<(String, Option<Duration>)>>,
    background: Mutex<Vec<String>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(mut self, cmd: &str, output: &str, exit_code: i32) -> Self {
        self.replies.insert(
            cmd.to_string(),
            CommandResult {
                output: output.to_string(),
                exit_code,
            },
        );
        self
    }

    /// Blocking commands executed so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(cmd, _)| cmd.clone())
            .collect()
    }

    /// Timeouts passed with each blocking command.
    pub fn timeouts(&self) -> Vec<Option<Duration>> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, timeout)| *timeout)
            .collect()
    }

    pub fn background(&self) -> Vec<String> {
        self.background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CommandExecutor for FakeExecutor {
    fn execute(&self, cmd: &str, timeout: Option<Duration>) -> Result<CommandResult> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((cmd.to_string(), timeout));
        Ok(self.replies.get(cmd).cloned().unwrap_or(CommandResult {
            output: String::new(),
            exit_code: 0,
        }))
    }

    fn execute_background(&self, cmd: &str) -> Result<()> {
        self.background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cmd.to_string());
        Ok(())
    }
}

/// Configuration with no environment snapshot commands, so fake executors
/// only see the commands a test issues.
pub fn quiet_config() -> OrcaConfig {
    let mut config = OrcaConfig::default();
    config.executor.snapshot_commands.clear();
    config
}

/// Runtime over the given fakes with [`quiet_config`].
pub fn runtime_for<'a>(
    model: &'a dyn ModelClient,
    executor: &'a dyn CommandExecutor,
    workspace: &'a LocalWorkspace,
) -> AgentRuntime<'a> {
    runtime_with_config(model, executor, workspace, quiet_config())
}

pub fn runtime_with_config<'a>(
    model: &'a dyn ModelClient,
    executor: &'a dyn CommandExecutor,
    workspace: &'a LocalWorkspace,
    config: OrcaConfig,
) -> AgentRuntime<'a> {
    let backends = Backends {
        model,
        executor,
        workspace,
    };
    AgentRuntime::new(backends, config).expect("runtime")
}

/// Task spec with deterministic defaults.
pub fn task_spec(agent_type: AgentType, title: &str) -> TaskSpec {
    TaskSpec {
        agent_type,
        title: title.to_string(),
        description: format!("{title} description"),
        context_refs: Vec::new(),
        max_turns: 5,
        context_bootstrap: Vec::new(),
    }
}

/// Temporary workspace containing `files` (relative path, contents).
pub fn workspace_with_files(files: &[(&str, &str)]) -> (tempfile::TempDir, LocalWorkspace) {
    let temp = tempfile::tempdir().expect("tempdir");
    for (path, contents) in files {
        let full = temp.path().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&full, contents).expect("write fixture");
    }
    let workspace = LocalWorkspace::new(temp.path());
    (temp, workspace)
}
