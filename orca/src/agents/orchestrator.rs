//! Depth-0 agent: plans, delegates and finishes.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::agents::AgentRuntime;
use crate::core::actions::Action;
use crate::core::budget::{TimeBudget, model_call_timeout};
use crate::core::output::{ORCHESTRATOR_FINAL_TURN, truncate_env_response, turn_footer};
use crate::core::types::{AgentType, Message, SubagentRun};
use crate::handler::{ActionHandler, AgentIdentity, TurnStats};
use crate::io::env_info;
use crate::io::model::{ModelRequest, is_context_window_exceeded};
use crate::turn::TurnExecutor;

pub const ORCHESTRATOR_AGENT_ID: &str = "orchestrator";

/// Why the orchestrator stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Finished,
    MaxTurns,
    TimeBudget,
    ContextOverflow,
}

impl StopReason {
    pub fn label(self) -> &'static str {
        match self {
            StopReason::Finished => "finished",
            StopReason::MaxTurns => "max_turns",
            StopReason::TimeBudget => "time_budget",
            StopReason::ContextOverflow => "context_overflow",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorOutcome {
    pub completed: bool,
    pub finish_message: Option<String>,
    pub turns_executed: u32,
    pub max_turns_reached: bool,
    pub stop_reason: StopReason,
    pub subagent_runs: BTreeMap<String, SubagentRun>,
    pub duplicate_contexts: usize,
    pub successful_context_refs: usize,
    pub missing_context_refs: usize,
}

pub struct Orchestrator<'a> {
    runtime: &'a AgentRuntime<'a>,
    max_turns: u32,
    budget: TimeBudget,
}

impl<'a> Orchestrator<'a> {
    pub fn new(runtime: &'a AgentRuntime<'a>, max_turns: u32, budget: TimeBudget) -> Self {
        Self {
            runtime,
            max_turns,
            budget,
        }
    }

    #[instrument(skip_all, fields(max_turns = self.max_turns))]
    pub fn run(&self, instruction: &str) -> Result<OrchestratorOutcome> {
        let started_at = Utc::now();
        let runtime = self.runtime;
        let params = runtime.config.model.params_for(AgentType::Orchestrator);
        let identity = AgentIdentity {
            agent_id: ORCHESTRATOR_AGENT_ID.to_string(),
            agent_type: AgentType::Orchestrator,
            depth: 0,
        };
        let mut turns = TurnExecutor::new(
            &runtime.parser,
            ActionHandler::new(runtime, identity, self.budget),
        );

        let system = runtime.prompts.system_message(AgentType::Orchestrator, 0)?;
        let environment = env_info::snapshot(
            runtime.backends.executor,
            &runtime.config.executor.snapshot_commands,
            "Initial Env State",
        );
        let prompt = runtime
            .prompts
            .instruction_prompt(instruction, self.max_turns, &environment)?;
        let mut messages = vec![Message::system(system), Message::user(prompt)];

        let max_chars = runtime.config.limits.max_env_response_chars;
        let timeout_floor = Duration::from_secs(runtime.config.limits.model_timeout_floor_secs);
        let mut totals = TurnStats::default();
        let mut finish_message = None;
        let mut turns_executed = 0;
        let mut stop_reason = StopReason::MaxTurns;

        for turn in 1..=self.max_turns {
            if self.budget.is_exhausted() {
                warn!(turn, "orchestrator time budget exhausted");
                stop_reason = StopReason::TimeBudget;
                break;
            }
            turns_executed = turn;

            let response = match runtime.backends.model.complete(&ModelRequest {
                agent_id: ORCHESTRATOR_AGENT_ID,
                messages: &messages,
                params: &params,
                timeout: model_call_timeout(self.budget.remaining(), timeout_floor),
            }) {
                Ok(response) => response,
                Err(err) if is_context_window_exceeded(&err) => {
                    warn!(turn, "orchestrator context window exceeded");
                    stop_reason = StopReason::ContextOverflow;
                    break;
                }
                Err(err) => {
                    warn!(turn, err = %err, "model call failed");
                    messages.push(Message::user(format!("Error occurred: {err:#}. Please continue.")));
                    continue;
                }
            };
            messages.push(Message::assistant(response.as_str()));

            let mut result = turns.execute(&response);
            totals.absorb(std::mem::take(&mut result.stats));

            let mut env_response = truncate_env_response(&result.to_user_msg_content(), max_chars);
            env_response.push_str(&turn_footer(turn, self.max_turns, ORCHESTRATOR_FINAL_TURN));
            messages.push(Message::user(env_response));

            if let Some(finish) = result.actions_executed.iter().find_map(Action::as_finish) {
                finish_message = Some(finish.message.clone());
                stop_reason = StopReason::Finished;
                break;
            }
        }

        let completed = finish_message.is_some();
        info!(
            completed,
            turns_executed,
            stop_reason = stop_reason.label(),
            subagents = totals.subagent_runs.len(),
            "orchestrator finished"
        );
        runtime.record_agent(
            ORCHESTRATOR_AGENT_ID,
            AgentType::Orchestrator,
            0,
            instruction,
            started_at,
            stop_reason.label().to_string(),
            turns_executed,
            &messages,
        );

        Ok(OrchestratorOutcome {
            completed,
            finish_message,
            turns_executed,
            max_turns_reached: stop_reason == StopReason::MaxTurns,
            stop_reason,
            subagent_runs: totals.subagent_runs,
            duplicate_contexts: totals.duplicate_contexts,
            successful_context_refs: totals.successful_context_refs,
            missing_context_refs: totals.missing_context_refs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::workspace::LocalWorkspace;
    use crate::test_support::{FakeExecutor, ScriptedModel, runtime_for};

    #[test]
    fn finish_completes_the_run() {
        let workspace = LocalWorkspace::new(".");
        let model = ScriptedModel::new([
            "<todo>\noperations:\n  - action: add\n    content: plan\n</todo>",
            "<finish>\nmessage: nothing to change\n</finish>",
        ]);
        let executor = FakeExecutor::new();
        let runtime = runtime_for(&model, &executor, &workspace);

        let outcome = Orchestrator::new(&runtime, 10, TimeBudget::unbounded())
            .run("Check the repo")
            .expect("run");
        assert!(outcome.completed);
        assert_eq!(outcome.finish_message.as_deref(), Some("nothing to change"));
        assert_eq!(outcome.turns_executed, 2);
        assert!(!outcome.max_turns_reached);
        assert_eq!(outcome.stop_reason, StopReason::Finished);
    }

    #[test]
    fn running_out_of_turns_is_incomplete() {
        let workspace = LocalWorkspace::new(".");
        let model = ScriptedModel::new(["thinking", "<bogus>\n</bogus>"]);
        let executor = FakeExecutor::new();
        let runtime = runtime_for(&model, &executor, &workspace);

        let outcome = Orchestrator::new(&runtime, 2, TimeBudget::unbounded())
            .run("Check the repo")
            .expect("run");
        assert!(!outcome.completed);
        assert!(outcome.max_turns_reached);
        assert_eq!(outcome.turns_executed, 2);
        let last = model.requests()[1].last().expect("env").content.clone();
        assert!(last.ends_with("turns_used/max_turns: 1/2"));
    }

    #[test]
    fn model_calls_share_the_run_budget() {
        let workspace = LocalWorkspace::new(".");
        let model = ScriptedModel::new(["<finish>\nmessage: done\n</finish>"]);
        let executor = FakeExecutor::new();
        let runtime = runtime_for(&model, &executor, &workspace);

        Orchestrator::new(&runtime, 3, TimeBudget::starting_now(Duration::from_secs(120)))
            .run("Check the repo")
            .expect("run");
        let timeout = model.timeouts()[0].expect("bounded call");
        assert!(timeout <= Duration::from_secs(120));
        assert!(timeout > Duration::from_secs(100));
    }

    #[test]
    fn overflow_stops_without_completion() {
        let workspace = LocalWorkspace::new(".");
        let model = ScriptedModel::from_results([ScriptedModel::overflow()]);
        let executor = FakeExecutor::new();
        let runtime = runtime_for(&model, &executor, &workspace);

        let outcome = Orchestrator::new(&runtime, 5, TimeBudget::unbounded())
            .run("Check the repo")
            .expect("run");
        assert_eq!(outcome.stop_reason, StopReason::ContextOverflow);
        assert!(!outcome.completed);
        assert!(!outcome.max_turns_reached);
    }
}
