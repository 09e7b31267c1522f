//! Subagent turn-loop state machine.
//!
//! Each executed turn is classified into a [`TurnClass`]. [`FailureCounters`]
//! tracks consecutive unproductive turns and decides when the loop must stop
//! and demand a report. The agent loop in `agents::subagent` drives these
//! types; everything here is pure.

use std::time::Duration;

/// What one executed turn amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnClass {
    /// At least one action executed.
    Action,
    /// No action executed and the parser reported an error.
    ParseError,
    /// No action executed and nothing looked like an action.
    NoAction,
}

impl TurnClass {
    pub fn classify(actions_executed: usize, has_parsing_error: bool) -> Self {
        match (actions_executed, has_parsing_error) {
            (0, true) => TurnClass::ParseError,
            (0, false) => TurnClass::NoAction,
            _ => TurnClass::Action,
        }
    }
}

/// Why a worker is being forced to report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ForceReason {
    ParseErrors { count: u32 },
    NoActions { count: u32 },
    MaxTurns { max_turns: u32 },
    Timeout { elapsed: Duration, limit: Duration },
}

const REPORT_SYNTAX_EXAMPLE: &str = "CORRECT SYNTAX EXAMPLE:\n\
<report>\n\
contexts:\n  \
  - id: \"context_name\"\n    \
    content: \"Context content here\"\n\
comments: \"Summary of what was attempted and what went wrong\"\n\
</report>\n\n";

impl ForceReason {
    /// Stable label used in logs and session records.
    pub fn label(&self) -> &'static str {
        match self {
            ForceReason::ParseErrors { .. } => "parse_errors",
            ForceReason::NoActions { .. } => "no_actions",
            ForceReason::MaxTurns { .. } => "max_turns",
            ForceReason::Timeout { .. } => "timeout",
        }
    }

    /// Directive appended to the history before the forcing model call.
    pub fn directive(&self) -> String {
        let demand = "You MUST now submit a report using ONLY the <report> action.\n\
                      NO OTHER ACTIONS ARE ALLOWED.\n\n";
        match self {
            ForceReason::ParseErrors { count } => format!(
                "\n\n\u{26a0}\u{fe0f} CRITICAL: MAXIMUM CONSECUTIVE PARSING ERRORS REACHED \u{26a0}\u{fe0f}\n\
                 You have had {count} consecutive turns with parsing errors.\n\
                 Your action syntax is repeatedly malformed.\n\n\
                 {demand}{REPORT_SYNTAX_EXAMPLE}\
                 Instructions:\n\
                 1. Use ONLY the <report> action with proper YAML syntax\n\
                 2. Include any contexts you discovered before the errors\n\
                 3. In comments, explain what you were trying to do and that repeated parsing errors prevented completion\n\n\
                 SUBMIT YOUR REPORT NOW WITH CORRECT SYNTAX."
            ),
            ForceReason::NoActions { count } => format!(
                "\n\n\u{26a0}\u{fe0f} CRITICAL: MAXIMUM CONSECUTIVE NO-ACTION TURNS REACHED \u{26a0}\u{fe0f}\n\
                 You have had {count} consecutive turns without attempting any actions.\n\
                 You are not making progress on the task.\n\n\
                 {demand}{REPORT_SYNTAX_EXAMPLE}\
                 Instructions:\n\
                 1. Use ONLY the <report> action with proper YAML syntax\n\
                 2. Include any contexts you discovered before stopping\n\
                 3. In comments, explain what you were trying to do and why you stopped taking actions\n\n\
                 SUBMIT YOUR REPORT NOW WITH CORRECT SYNTAX."
            ),
            ForceReason::MaxTurns { .. } => format!(
                "\n\n\u{26a0}\u{fe0f} CRITICAL: MAXIMUM TURNS REACHED \u{26a0}\u{fe0f}\n\
                 You have reached the maximum number of allowed turns.\n\
                 {demand}\
                 Instructions:\n\
                 1. Use ONLY the <report> action\n\
                 2. Include ALL contexts you have discovered so far\n\
                 3. In the comments section:\n   \
                    - Summarize what you have accomplished\n   \
                    - If the task is incomplete, explain what remains to be done\n   \
                    - Describe what you were about to do next and why\n\n\
                 SUBMIT YOUR REPORT NOW."
            ),
            ForceReason::Timeout { elapsed, limit } => format!(
                "\n\n\u{26a0}\u{fe0f} CRITICAL: TIME LIMIT EXCEEDED \u{26a0}\u{fe0f}\n\
                 You have exceeded the execution time limit ({:.1} seconds).\n\
                 Elapsed time: {:.1} seconds\n\n\
                 {demand}\
                 Instructions:\n\
                 1. Use ONLY the <report> action\n\
                 2. Include ALL contexts you have discovered so far\n\
                 3. In the comments section:\n   \
                    - Summarize what you have accomplished\n   \
                    - If the task is incomplete, explain what remains to be done\n   \
                    - Describe what you were working on when time ran out\n\n\
                 SUBMIT YOUR REPORT NOW.",
                limit.as_secs_f64(),
                elapsed.as_secs_f64(),
            ),
        }
    }

    /// Comments of the report synthesized when the forcing call yields none.
    pub fn fallback_comment(&self) -> String {
        match self {
            ForceReason::ParseErrors { count } => format!(
                "Task incomplete - {count} consecutive parsing errors. Failed to provide proper report."
            ),
            ForceReason::NoActions { count } => format!(
                "Task incomplete - {count} consecutive turns with no actions attempted. \
                 Failed to provide proper report."
            ),
            ForceReason::MaxTurns { max_turns } => format!(
                "Task incomplete - reached maximum turns ({max_turns}) without proper completion. \
                 Agent failed to provide report when requested."
            ),
            ForceReason::Timeout { elapsed, limit } => format!(
                "Task incomplete - execution time limit exceeded ({:.1}s / {:.1}s). \
                 Agent failed to provide proper report when requested.",
                elapsed.as_secs_f64(),
                limit.as_secs_f64(),
            ),
        }
    }
}

/// Consecutive unproductive-turn counters.
///
/// A parse-error turn resets the no-action counter and vice versa; a turn
/// with executed actions resets both.
#[derive(Debug, Clone, Copy)]
pub struct FailureCounters {
    parse_errors: u32,
    no_actions: u32,
    threshold: u32,
}

impl FailureCounters {
    pub fn new(threshold: u32) -> Self {
        Self {
            parse_errors: 0,
            no_actions: 0,
            threshold,
        }
    }

    pub fn parse_errors(&self) -> u32 {
        self.parse_errors
    }

    pub fn no_actions(&self) -> u32 {
        self.no_actions
    }

    /// Record one turn; returns the reason to force when a threshold is hit.
    pub fn record(&mut self, class: TurnClass) -> Option<ForceReason> {
        match class {
            TurnClass::Action => {
                self.parse_errors = 0;
                self.no_actions = 0;
                None
            }
            TurnClass::ParseError => {
                self.parse_errors += 1;
                self.no_actions = 0;
                (self.parse_errors >= self.threshold).then_some(ForceReason::ParseErrors {
                    count: self.parse_errors,
                })
            }
            TurnClass::NoAction => {
                self.no_actions += 1;
                self.parse_errors = 0;
                (self.no_actions >= self.threshold).then_some(ForceReason::NoActions {
                    count: self.no_actions,
                })
            }
        }
    }
}

/// How a worker's loop terminated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopOutcome {
    /// The worker issued `report` on its own.
    Reported,
    /// A termination policy demanded a report. `recovered` is true when the
    /// forcing call produced one.
    Forced { reason: ForceReason, recovered: bool },
    ContextOverflow,
}

impl LoopOutcome {
    pub fn label(&self) -> String {
        match self {
            LoopOutcome::Reported => "reported".to_string(),
            LoopOutcome::Forced { reason, recovered } => {
                let suffix = if *recovered { "" } else { "_fallback" };
                format!("forced_{}{suffix}", reason.label())
            }
            LoopOutcome::ContextOverflow => "context_overflow".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_prefers_executed_actions() {
        assert_eq!(TurnClass::classify(2, true), TurnClass::Action);
        assert_eq!(TurnClass::classify(0, true), TurnClass::ParseError);
        assert_eq!(TurnClass::classify(0, false), TurnClass::NoAction);
    }

    #[test]
    fn third_consecutive_parse_error_forces() {
        let mut counters = FailureCounters::new(3);
        assert_eq!(counters.record(TurnClass::ParseError), None);
        assert_eq!(counters.record(TurnClass::ParseError), None);
        assert_eq!(
            counters.record(TurnClass::ParseError),
            Some(ForceReason::ParseErrors { count: 3 })
        );
    }

    #[test]
    fn counters_reset_each_other() {
        let mut counters = FailureCounters::new(3);
        counters.record(TurnClass::ParseError);
        counters.record(TurnClass::ParseError);
        assert_eq!(counters.record(TurnClass::NoAction), None);
        assert_eq!(counters.parse_errors(), 0);
        assert_eq!(counters.no_actions(), 1);
        counters.record(TurnClass::NoAction);
        counters.record(TurnClass::Action);
        assert_eq!(counters.no_actions(), 0);
        assert_eq!(counters.record(TurnClass::NoAction), None);
    }

    #[test]
    fn no_action_threshold_forces() {
        let mut counters = FailureCounters::new(2);
        counters.record(TurnClass::NoAction);
        assert_eq!(
            counters.record(TurnClass::NoAction),
            Some(ForceReason::NoActions { count: 2 })
        );
    }

    #[test]
    fn directives_demand_only_a_report() {
        let reasons = [
            ForceReason::ParseErrors { count: 3 },
            ForceReason::NoActions { count: 3 },
            ForceReason::MaxTurns { max_turns: 5 },
            ForceReason::Timeout {
                elapsed: Duration::from_secs(61),
                limit: Duration::from_secs(60),
            },
        ];
        for reason in reasons {
            let directive = reason.directive();
            assert!(directive.contains("ONLY the <report> action"), "{directive}");
            assert!(directive.starts_with("\n\n"));
        }
        assert!(
            ForceReason::ParseErrors { count: 3 }
                .directive()
                .contains("  - id: \"context_name\"\n    content:")
        );
    }

    #[test]
    fn fallback_comments_state_the_reason() {
        assert_eq!(
            ForceReason::MaxTurns { max_turns: 3 }.fallback_comment(),
            "Task incomplete - reached maximum turns (3) without proper completion. \
             Agent failed to provide report when requested."
        );
        let timeout = ForceReason::Timeout {
            elapsed: Duration::from_millis(61_500),
            limit: Duration::from_secs(60),
        };
        assert!(timeout.fallback_comment().contains("(61.5s / 60.0s)"));
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(LoopOutcome::Reported.label(), "reported");
        let forced = LoopOutcome::Forced {
            reason: ForceReason::MaxTurns { max_turns: 3 },
            recovered: false,
        };
        assert_eq!(forced.label(), "forced_max_turns_fallback");
    }
}
