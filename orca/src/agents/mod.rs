//! Agent loops: the depth-0 orchestrator and recursive subagents.
//!
//! Every agent of a run shares one [`AgentRuntime`]: the borrowed backends,
//! the hub, the configuration and the compiled parser and templates. Agents
//! own only their message history, counters, todo list and scratchpad.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::core::parser::ActionParser;
use crate::core::types::{AgentType, Message, Role};
use crate::hub::OrchestratorHub;
use crate::io::config::OrcaConfig;
use crate::io::executor::CommandExecutor;
use crate::io::model::ModelClient;
use crate::io::prompt::PromptBuilder;
use crate::io::session_log::{AgentRecord, SessionLog};
use crate::io::workspace::Workspace;

pub mod orchestrator;
pub mod subagent;

/// External collaborators borrowed by every agent at every depth.
#[derive(Clone, Copy)]
pub struct Backends<'a> {
    pub model: &'a dyn ModelClient,
    pub executor: &'a dyn CommandExecutor,
    pub workspace: &'a dyn Workspace,
}

/// State shared by all agents of one orchestration run.
pub struct AgentRuntime<'a> {
    pub backends: Backends<'a>,
    pub hub: Arc<OrchestratorHub>,
    pub config: OrcaConfig,
    pub prompts: PromptBuilder,
    pub parser: ActionParser,
    pub session_log: Option<SessionLog>,
}

impl<'a> AgentRuntime<'a> {
    pub fn new(backends: Backends<'a>, config: OrcaConfig) -> Result<Self> {
        let prompts = PromptBuilder::new(config.limits.task_prompt_budget_chars)?;
        Ok(Self {
            backends,
            hub: Arc::new(OrchestratorHub::new()),
            config,
            prompts,
            parser: ActionParser::new()?,
            session_log: None,
        })
    }

    pub fn with_session_log(mut self, session_log: SessionLog) -> Self {
        self.session_log = Some(session_log);
        self
    }

    /// Write one agent record when session logging is enabled.
    ///
    /// Logging failures are reported and otherwise ignored.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn record_agent(
        &self,
        agent_id: &str,
        agent_type: AgentType,
        depth: u32,
        title: &str,
        started_at: DateTime<Utc>,
        outcome: String,
        num_turns: u32,
        trajectory: &[Message],
    ) {
        let Some(log) = &self.session_log else {
            return;
        };
        let record = AgentRecord::new(
            agent_id, agent_type, depth, title, started_at, outcome, num_turns, trajectory,
        );
        if let Err(err) = log.write_agent(&record) {
            warn!(agent_id, err = %err, "failed to write session record");
        }
    }
}

/// Append to the trailing user message, or start a new one.
pub(crate) fn append_to_last_user_message(messages: &mut Vec<Message>, content: &str) {
    match messages.last_mut() {
        Some(last) if last.role == Role::User => last.content.push_str(content),
        _ => messages.push(Message::user(content.trim())),
    }
}
