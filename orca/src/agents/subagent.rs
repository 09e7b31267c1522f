//! Worker agent loop.
//!
//! A subagent runs turns until it reports, a termination policy forces a
//! report, or the model's context window overflows. Every path returns a
//! [`SubagentReport`]; only template rendering can fail the run.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::agents::{AgentRuntime, append_to_last_user_message};
use crate::core::actions::{Action, Report};
use crate::core::budget::{TimeBudget, model_call_timeout};
use crate::core::output::{SUBAGENT_FINAL_TURN, truncate_env_response, turn_footer};
use crate::core::turn_state::{FailureCounters, ForceReason, LoopOutcome, TurnClass};
use crate::core::types::{Message, SubagentMeta, SubagentReport, SubagentTask};
use crate::handler::{ActionHandler, AgentIdentity};
use crate::io::config::ModelParams;
use crate::io::env_info;
use crate::io::model::{ModelRequest, is_context_window_exceeded};
use crate::turn::TurnExecutor;

pub struct Subagent<'a> {
    runtime: &'a AgentRuntime<'a>,
    identity: AgentIdentity,
    task: SubagentTask,
    budget: TimeBudget,
    params: ModelParams,
    turns: TurnExecutor<'a>,
    counters: FailureCounters,
    messages: Vec<Message>,
}

impl<'a> Subagent<'a> {
    pub fn new(
        runtime: &'a AgentRuntime<'a>,
        identity: AgentIdentity,
        task: SubagentTask,
        budget: TimeBudget,
    ) -> Self {
        let params = runtime.config.model.params_for(identity.agent_type);
        let handler = ActionHandler::new(runtime, identity.clone(), budget);
        Self {
            runtime,
            identity,
            task,
            budget,
            params,
            turns: TurnExecutor::new(&runtime.parser, handler),
            counters: FailureCounters::new(runtime.config.limits.consecutive_failure_threshold),
            messages: Vec::new(),
        }
    }

    #[instrument(skip_all, fields(agent_id = %self.identity.agent_id, agent_type = %self.identity.agent_type))]
    pub fn run(mut self) -> Result<SubagentReport> {
        let started_at = Utc::now();
        let system = self
            .runtime
            .prompts
            .system_message(self.identity.agent_type, self.identity.depth)?;
        let environment = env_info::snapshot(
            self.runtime.backends.executor,
            &self.runtime.config.executor.snapshot_commands,
            "Initial Env State",
        );
        let prompt = self.runtime.prompts.task_prompt(&self.task, &environment)?;
        self.messages = vec![Message::system(system), Message::user(prompt)];

        let (report, outcome) = self.turn_loop();
        info!(
            outcome = %outcome.label(),
            num_turns = report.meta.num_turns,
            contexts = report.contexts.len(),
            "subagent finished"
        );
        self.runtime.record_agent(
            &self.identity.agent_id,
            self.identity.agent_type,
            self.identity.depth,
            &self.task.title,
            started_at,
            outcome.label(),
            report.meta.num_turns,
            &self.messages,
        );
        Ok(report)
    }

    fn turn_loop(&mut self) -> (SubagentReport, LoopOutcome) {
        let max_turns = self.task.max_turns;
        let max_chars = self.runtime.config.limits.max_env_response_chars;

        for completed in 0..max_turns {
            let turn = completed + 1;
            if let Some(limit) = self.budget.limit()
                && self.budget.is_exhausted()
            {
                let reason = ForceReason::Timeout {
                    elapsed: self.budget.elapsed(),
                    limit,
                };
                return self.force_report(reason, completed);
            }

            let response = match self.call_model() {
                Ok(response) => response,
                Err(err) if is_context_window_exceeded(&err) => {
                    return self.context_overflow(turn);
                }
                Err(err) => {
                    warn!(turn, err = %err, "model call failed");
                    self.messages
                        .push(Message::user(format!("Error occurred: {err:#}. Please continue.")));
                    continue;
                }
            };
            self.messages.push(Message::assistant(response.as_str()));

            let result = self.turns.execute(&response);
            let class = TurnClass::classify(result.actions_executed.len(), result.has_parsing_error);
            if let Some(reason) = self.counters.record(class) {
                self.messages
                    .push(Message::user(result.to_user_msg_content()));
                return self.force_report(reason, turn);
            }

            let mut env_response = truncate_env_response(&result.to_user_msg_content(), max_chars);
            env_response.push_str(&turn_footer(turn, max_turns, SUBAGENT_FINAL_TURN));
            self.messages.push(Message::user(env_response));

            if let Some(report) = result.actions_executed.iter().find_map(Action::as_report) {
                return (self.build_report(report, turn), LoopOutcome::Reported);
            }
        }

        self.force_report(ForceReason::MaxTurns { max_turns }, max_turns)
    }

    fn call_model(&self) -> Result<String> {
        let floor = Duration::from_secs(self.runtime.config.limits.model_timeout_floor_secs);
        self.runtime.backends.model.complete(&ModelRequest {
            agent_id: &self.identity.agent_id,
            messages: &self.messages,
            params: &self.params,
            timeout: model_call_timeout(self.budget.remaining(), floor),
        })
    }

    /// Demand a report with one extra model call; synthesize one when the
    /// call fails or yields none.
    fn force_report(&mut self, reason: ForceReason, num_turns: u32) -> (SubagentReport, LoopOutcome) {
        info!(reason = reason.label(), num_turns, "forcing report");
        append_to_last_user_message(&mut self.messages, &reason.directive());

        match self.call_model() {
            Ok(response) => {
                self.messages.push(Message::assistant(response.as_str()));
                let parsed = self.turns.parse_only(&response);
                if let Some(report) = parsed.actions.iter().find_map(Action::as_report) {
                    let report = self.build_report(report, num_turns);
                    return (
                        report,
                        LoopOutcome::Forced {
                            reason,
                            recovered: true,
                        },
                    );
                }
                warn!(reason = reason.label(), "forced call produced no report");
            }
            Err(err) => warn!(reason = reason.label(), err = %err, "forced report call failed"),
        }

        let report = SubagentReport {
            contexts: Vec::new(),
            context_refs: Vec::new(),
            comments: reason.fallback_comment(),
            meta: SubagentMeta::from_trajectory(&self.messages, num_turns),
        };
        (
            report,
            LoopOutcome::Forced {
                reason,
                recovered: false,
            },
        )
    }

    fn context_overflow(&mut self, turn: u32) -> (SubagentReport, LoopOutcome) {
        warn!(turn, "context window exceeded");
        let comments = format!(
            "\u{26a0}\u{fe0f} CONTEXT WINDOW EXCEEDED \u{26a0}\u{fe0f}\n\n\
             The subagent ran out of context window space at turn {turn} while working on \
             '{}'. No report could be produced.\n\n\
             Recommendations:\n\
             - Split the task into smaller, more focused subtasks\n\
             - Pass fewer or shorter contexts and bootstrap files\n\
             - Ask for targeted reads (offset/limit) instead of whole files",
            self.task.title
        );
        self.messages.push(Message::user(comments.as_str()));
        let report = SubagentReport {
            contexts: Vec::new(),
            context_refs: Vec::new(),
            comments,
            meta: SubagentMeta::from_trajectory(&self.messages, turn),
        };
        (report, LoopOutcome::ContextOverflow)
    }

    fn build_report(&self, report: &Report, num_turns: u32) -> SubagentReport {
        SubagentReport {
            contexts: report.contexts.clone(),
            context_refs: report.context_refs.clone(),
            comments: report.comments.clone(),
            meta: SubagentMeta::from_trajectory(&self.messages, num_turns),
        }
    }
}
