//! The closed set of actions an agent can issue.
//!
//! Each variant carries only the fields its operation needs. Payload structs
//! deserialize from the YAML body of the matching action block.

use serde::{Deserialize, Serialize};

use crate::core::types::{AgentType, BootstrapItem, ContextItem};

/// Operation kind inside a batch todo action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TodoOpKind {
    Add,
    Complete,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoOp {
    pub action: TodoOpKind,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub task_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTodo {
    #[serde(default)]
    pub operations: Vec<TodoOp>,
    #[serde(default)]
    pub view_all: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddNote {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadFile {
    pub file_path: String,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFile {
    pub file_path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditFile {
    pub file_path: String,
    pub old_string: String,
    pub new_string: String,
    #[serde(default)]
    pub replace_all: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOp {
    pub old_string: String,
    pub new_string: String,
    #[serde(default)]
    pub replace_all: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiEdit {
    pub file_path: String,
    pub edits: Vec<EditOp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grep {
    pub pattern: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub include: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Glob {
    pub pattern: String,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_paths: Vec<String>,
}

fn default_block() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bash {
    pub cmd: String,
    #[serde(default = "default_block")]
    pub block: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finish {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCreate {
    pub agent_type: AgentType,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub context_refs: Vec<String>,
    #[serde(default)]
    pub context_bootstrap: Vec<BootstrapItem>,
    #[serde(default)]
    pub max_turns: Option<u32>,
    #[serde(default)]
    pub auto_launch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddContext {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub reported_by: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSubagent {
    pub task_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchParallelSubagents {
    pub task_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    #[serde(default)]
    pub contexts: Vec<ContextItem>,
    #[serde(default)]
    pub context_refs: Vec<String>,
    #[serde(default)]
    pub comments: String,
}

/// A parsed action. Values are immutable and carry no behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    BatchTodo(BatchTodo),
    AddNote(AddNote),
    ViewAllNotes,
    Read(ReadFile),
    Write(WriteFile),
    Edit(EditFile),
    MultiEdit(MultiEdit),
    Grep(Grep),
    Glob(Glob),
    FileMetadata(FileMetadata),
    WriteTempScript(WriteFile),
    Bash(Bash),
    Finish(Finish),
    TaskCreate(TaskCreate),
    AddContext(AddContext),
    LaunchSubagent(LaunchSubagent),
    LaunchParallelSubagents(LaunchParallelSubagents),
    Report(Report),
}

impl Action {
    /// Block tag used for this action on the wire.
    pub fn tag(&self) -> &'static str {
        match self {
            Action::BatchTodo(_) => "todo",
            Action::AddNote(_) => "add_note",
            Action::ViewAllNotes => "view_all_notes",
            Action::Read(_) => "read_file",
            Action::Write(_) => "write_file",
            Action::Edit(_) => "edit_file",
            Action::MultiEdit(_) => "multi_edit",
            Action::Grep(_) => "grep",
            Action::Glob(_) => "glob",
            Action::FileMetadata(_) => "file_metadata",
            Action::WriteTempScript(_) => "write_temp_script",
            Action::Bash(_) => "bash",
            Action::Finish(_) => "finish",
            Action::TaskCreate(_) => "task_create",
            Action::AddContext(_) => "add_context",
            Action::LaunchSubagent(_) => "launch_subagent",
            Action::LaunchParallelSubagents(_) => "launch_parallel_subagents",
            Action::Report(_) => "report",
        }
    }

    /// Whether the action mutates files in the workspace.
    pub fn is_file_mutation(&self) -> bool {
        matches!(self, Action::Write(_) | Action::Edit(_) | Action::MultiEdit(_))
    }

    pub fn as_report(&self) -> Option<&Report> {
        match self {
            Action::Report(report) => Some(report),
            _ => None,
        }
    }

    pub fn as_finish(&self) -> Option<&Finish> {
        match self {
            Action::Finish(finish) => Some(finish),
            _ => None,
        }
    }
}

/// All tags the parser recognizes, in documentation order.
pub const ACTION_TAGS: [&str; 18] = [
    "todo",
    "add_note",
    "view_all_notes",
    "read_file",
    "write_file",
    "edit_file",
    "multi_edit",
    "grep",
    "glob",
    "file_metadata",
    "write_temp_script",
    "bash",
    "finish",
    "task_create",
    "add_context",
    "launch_subagent",
    "launch_parallel_subagents",
    "report",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_write_edit_multi_edit_mutate_files() {
        let write = Action::Write(WriteFile {
            file_path: "a".to_string(),
            content: String::new(),
        });
        let temp_script = Action::WriteTempScript(WriteFile {
            file_path: "/tmp/a.sh".to_string(),
            content: String::new(),
        });
        let bash = Action::Bash(Bash {
            cmd: "ls".to_string(),
            block: true,
            timeout_secs: None,
        });
        assert!(write.is_file_mutation());
        assert!(!temp_script.is_file_mutation());
        assert!(!bash.is_file_mutation());
    }

    #[test]
    fn every_tag_is_listed() {
        assert!(ACTION_TAGS.contains(&Action::ViewAllNotes.tag()));
        assert!(ACTION_TAGS.contains(&"launch_parallel_subagents"));
        let mut sorted = ACTION_TAGS.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), ACTION_TAGS.len());
    }
}
