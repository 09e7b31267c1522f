//! Role-based action permissions.
//!
//! Only file mutations are restricted. Read-only roles may still run shell
//! commands and write temporary scripts.

use crate::core::actions::Action;
use crate::core::types::AgentType;

/// Roles that may not mutate workspace files.
pub const READ_ONLY_AGENT_TYPES: [AgentType; 2] = [AgentType::Explorer, AgentType::CodeReviewer];

/// Roles allowed to mutate workspace files when delegated.
pub const WRITE_AGENT_TYPES: [AgentType; 2] = [AgentType::Coder, AgentType::TestWriter];

pub fn is_read_only(agent_type: AgentType) -> bool {
    READ_ONLY_AGENT_TYPES.contains(&agent_type)
}

/// Whether `agent_type` may execute `action`.
pub fn is_action_allowed(agent_type: AgentType, action: &Action) -> bool {
    !(action.is_file_mutation() && is_read_only(agent_type))
}

/// Denial text for an action rejected by [`is_action_allowed`].
pub fn blocked_action_message(agent_type: AgentType, action: &Action) -> String {
    format!(
        "[PERMISSION DENIED] Agent type '{agent_type}' is read-only and cannot perform write action '{}'. \
         Only agent types [{}] can perform write operations. \
         Read-only agents ([{}]) can only use read, search, bash, and reporting actions.",
        action.tag(),
        join_types(&WRITE_AGENT_TYPES),
        join_types(&READ_ONLY_AGENT_TYPES),
    )
}

fn join_types(types: &[AgentType]) -> String {
    types
        .iter()
        .map(|agent_type| agent_type.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
