//! Shared deterministic types for the orchestration core.
//!
//! These types define stable contracts between the parser, handler, hub and
//! agent loops. They carry data only and never perform I/O.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Role an agent plays in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Orchestrator,
    Explorer,
    Coder,
    CodeReviewer,
    TestWriter,
}

impl AgentType {
    pub const ALL: [AgentType; 5] = [
        AgentType::Orchestrator,
        AgentType::Explorer,
        AgentType::Coder,
        AgentType::CodeReviewer,
        AgentType::TestWriter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentType::Orchestrator => "orchestrator",
            AgentType::Explorer => "explorer",
            AgentType::Coder => "coder",
            AgentType::CodeReviewer => "code_reviewer",
            AgentType::TestWriter => "test_writer",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        AgentType::ALL
            .into_iter()
            .find(|agent_type| agent_type.as_str() == s)
            .ok_or_else(|| anyhow!("unknown agent type '{s}'"))
    }
}

/// Speaker of a message in an agent's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of an agent's message history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Rough token estimate used for accounting and truncation notices.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Token totals over a trajectory: (input, output).
///
/// System and user messages count as model input, assistant messages as output.
pub fn count_tokens(messages: &[Message]) -> (usize, usize) {
    messages
        .iter()
        .fold((0, 0), |(input, output), message| match message.role {
            Role::Assistant => (input, output + estimate_tokens(&message.content)),
            Role::System | Role::User => (input + estimate_tokens(&message.content), output),
        })
}

/// A file or directory the launching agent wants preloaded for the child.
///
/// Paths ending in `/` denote directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapItem {
    pub path: String,
    #[serde(default)]
    pub reason: String,
}

impl BootstrapItem {
    pub fn is_dir(&self) -> bool {
        self.path.ends_with('/')
    }
}

/// Lifecycle marker of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
}

/// Inputs for registering a task with the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub agent_type: AgentType,
    pub title: String,
    pub description: String,
    pub context_refs: Vec<String>,
    pub max_turns: u32,
    pub context_bootstrap: Vec<BootstrapItem>,
}

/// A unit of delegated work owned by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: String,
    pub agent_type: AgentType,
    pub title: String,
    pub description: String,
    pub context_refs: Vec<String>,
    pub max_turns: u32,
    pub context_bootstrap: Vec<BootstrapItem>,
    pub status: TaskStatus,
}

/// A `(id, content)` pair produced or consumed by agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextItem {
    pub id: String,
    pub content: String,
}

/// A stored context entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextEntry {
    pub id: String,
    pub content: String,
    pub reported_by: String,
    pub task_id: Option<String>,
}

/// Bootstrap item with its resolved listing or file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapContent {
    pub path: String,
    pub reason: String,
    pub content: String,
}

/// Materialized inputs for one subagent run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubagentTask {
    pub agent_type: AgentType,
    pub title: String,
    pub description: String,
    pub max_turns: u32,
    pub store_contexts: Vec<ContextItem>,
    pub bootstrap: Vec<BootstrapContent>,
}

/// Run metadata attached to every report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubagentMeta {
    pub trajectory: Vec<Message>,
    pub num_turns: u32,
    pub total_input_tokens: usize,
    pub total_output_tokens: usize,
}

impl SubagentMeta {
    pub fn from_trajectory(trajectory: &[Message], num_turns: u32) -> Self {
        let (total_input_tokens, total_output_tokens) = count_tokens(trajectory);
        Self {
            trajectory: trajectory.to_vec(),
            num_turns,
            total_input_tokens,
            total_output_tokens,
        }
    }
}

/// A worker's terminal output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubagentReport {
    pub contexts: Vec<ContextItem>,
    pub context_refs: Vec<String>,
    pub comments: String,
    pub meta: SubagentMeta,
}

/// The hub's post-processing of a report, consumed by the launching agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubagentResult {
    pub task_id: String,
    pub error: Option<String>,
    pub context_ids_stored: Vec<String>,
    pub duplicate_contexts_count: usize,
    pub comments: String,
    /// Full context content, populated only in verbose mode.
    pub contexts: Option<Vec<ContextItem>>,
}

impl SubagentResult {
    pub fn failed(task_id: &str, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            error: Some(error.into()),
            context_ids_stored: Vec::new(),
            duplicate_contexts_count: 0,
            comments: String::new(),
            contexts: None,
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Snapshot of one child run for token rollup by the parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubagentRun {
    pub task_id: String,
    pub agent_type: AgentType,
    pub title: String,
    pub trajectory: Vec<Message>,
    pub total_input_tokens: usize,
    pub total_output_tokens: usize,
}
