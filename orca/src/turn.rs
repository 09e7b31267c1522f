//! One agent turn: parse the model output, execute every action in order and
//! collect the wrapped responses.

use tracing::debug;

use crate::core::actions::Action;
use crate::core::output::format_tool_output;
use crate::core::parser::{ActionParser, ParsedTurn};
use crate::handler::{ActionHandler, TurnStats};

/// Everything one turn produced.
#[derive(Debug, Clone, Default)]
pub struct TurnResult {
    pub actions_executed: Vec<Action>,
    pub env_responses: Vec<String>,
    pub has_parsing_error: bool,
    pub stats: TurnStats,
}

impl TurnResult {
    /// Content of the user message answering this turn.
    pub fn to_user_msg_content(&self) -> String {
        self.env_responses.join("\n")
    }
}

pub struct TurnExecutor<'a> {
    parser: &'a ActionParser,
    handler: ActionHandler<'a>,
}

impl<'a> TurnExecutor<'a> {
    pub fn new(parser: &'a ActionParser, handler: ActionHandler<'a>) -> Self {
        Self { parser, handler }
    }

    /// Run all actions in parse order. A failing action never stops the ones
    /// after it; parse errors follow the action responses.
    pub fn execute(&mut self, raw: &str) -> TurnResult {
        let ParsedTurn {
            actions,
            errors,
            has_error,
        } = self.parser.parse(raw);

        let mut env_responses = Vec::with_capacity(actions.len() + errors.len());
        for action in &actions {
            let (response, is_error) = self.handler.handle(action);
            debug!(action = action.tag(), is_error, "action executed");
            env_responses.push(response);
        }
        env_responses.extend(
            errors
                .iter()
                .map(|error| format_tool_output("parse_error", error)),
        );

        TurnResult {
            actions_executed: actions,
            env_responses,
            has_parsing_error: has_error,
            stats: self.handler.take_turn_stats(),
        }
    }

    /// Parse without executing anything.
    pub fn parse_only(&self, raw: &str) -> ParsedTurn {
        self.parser.parse(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::budget::TimeBudget;
    use crate::core::types::AgentType;
    use crate::handler::AgentIdentity;
    use crate::io::workspace::LocalWorkspace;
    use crate::test_support::{FakeExecutor, ScriptedModel, runtime_for};

    fn identity() -> AgentIdentity {
        AgentIdentity {
            agent_id: "orchestrator->task_001#1".to_string(),
            agent_type: AgentType::Coder,
            depth: 1,
        }
    }

    #[test]
    fn actions_run_in_order_with_one_response_each() {
        let workspace = LocalWorkspace::new(".");
        let model = ScriptedModel::new(Vec::<&str>::new());
        let executor = FakeExecutor::new()
            .with_reply("echo one", "one\n", 0)
            .with_reply("false", "", 1)
            .with_reply("echo three", "three\n", 0);
        let runtime = runtime_for(&model, &executor, &workspace);
        let handler = ActionHandler::new(&runtime, identity(), TimeBudget::unbounded());
        let mut turn = TurnExecutor::new(&runtime.parser, handler);

        let result = turn.execute(
            "<bash>\ncmd: echo one\n</bash>\n\
             <bash>\ncmd: \"false\"\n</bash>\n\
             <bash>\ncmd: echo three\n</bash>",
        );
        assert_eq!(result.actions_executed.len(), 3);
        assert_eq!(result.env_responses.len(), 3);
        assert!(!result.has_parsing_error);
        assert_eq!(
            executor.commands(),
            vec!["echo one".to_string(), "false".to_string(), "echo three".to_string()]
        );
        assert!(result.env_responses[0].contains("one"));
        assert!(result.env_responses[2].contains("three"));
    }

    #[test]
    fn parse_errors_follow_action_responses() {
        let workspace = LocalWorkspace::new(".");
        let model = ScriptedModel::new(Vec::<&str>::new());
        let executor = FakeExecutor::new();
        let runtime = runtime_for(&model, &executor, &workspace);
        let handler = ActionHandler::new(&runtime, identity(), TimeBudget::unbounded());
        let mut turn = TurnExecutor::new(&runtime.parser, handler);

        let result = turn.execute("<read_file>\n</read_file>\n<add_note>\ncontent: keep\n</add_note>");
        assert!(result.has_parsing_error);
        assert_eq!(result.actions_executed.len(), 1);
        let content = result.to_user_msg_content();
        let note = content.find("<scratchpad_output>").expect("note response");
        let error = content.find("<parse_error_output>").expect("parse error");
        assert!(note < error);
    }

    #[test]
    fn parse_only_executes_nothing() {
        let workspace = LocalWorkspace::new(".");
        let model = ScriptedModel::new(Vec::<&str>::new());
        let executor = FakeExecutor::new();
        let runtime = runtime_for(&model, &executor, &workspace);
        let handler = ActionHandler::new(&runtime, identity(), TimeBudget::unbounded());
        let turn = TurnExecutor::new(&runtime.parser, handler);

        let parsed = turn.parse_only("<bash>\ncmd: rm -rf build\n</bash>");
        assert_eq!(parsed.actions.len(), 1);
        assert!(executor.commands().is_empty());
    }
}
