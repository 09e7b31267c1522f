//! Time budget helpers for cooperative, deadline-driven cancellation.
//!
//! Budgets are plain values threaded through call signatures. Nothing reads an
//! ambient clock to decide whether an agent may continue; callers ask the
//! budget they were handed.

use std::fmt;
use std::time::{Duration, Instant};

/// Wall-clock budget of one agent run.
///
/// An unbounded budget never exhausts; agents running under one are bounded
/// only by their turn limit.
#[derive(Debug, Clone, Copy)]
pub struct TimeBudget {
    started: Instant,
    limit: Option<Duration>,
}

impl TimeBudget {
    pub fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            limit: None,
        }
    }

    pub fn starting_now(limit: Duration) -> Self {
        Self::starting_at(Instant::now(), limit)
    }

    pub fn starting_at(started: Instant, limit: Duration) -> Self {
        Self {
            started,
            limit: Some(limit),
        }
    }

    pub fn from_secs(limit_secs: Option<u64>) -> Self {
        match limit_secs {
            Some(secs) => Self::starting_now(Duration::from_secs(secs)),
            None => Self::unbounded(),
        }
    }

    pub fn limit(&self) -> Option<Duration> {
        self.limit
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Remaining time, or `None` when the budget is unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.limit
            .map(|limit| limit.saturating_sub(self.started.elapsed()))
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining().is_some_and(|remaining| remaining.is_zero())
    }

    /// Budget offered to a child agent.
    ///
    /// The child receives whatever remains of this budget. When the remainder
    /// is at or below `floor` no limit is propagated and the child runs
    /// unbounded by time; it still cannot launch children of its own past the
    /// launch gate in [`check_launch_budget`].
    pub fn child_budget(&self, floor: Duration) -> TimeBudget {
        match self.remaining() {
            Some(remaining) if remaining > floor => TimeBudget::starting_now(remaining),
            _ => TimeBudget::unbounded(),
        }
    }
}

/// Shell timeout capped to the remaining budget.
///
/// With a budget the cap is `max(remaining - margin, floor)`; a request above
/// the cap (or no request at all) is lowered to it. Without a budget the
/// request passes through unchanged.
pub fn effective_shell_timeout(
    requested: Option<Duration>,
    remaining: Option<Duration>,
    margin: Duration,
    floor: Duration,
) -> Option<Duration> {
    let Some(remaining) = remaining else {
        return requested;
    };
    let cap = remaining.saturating_sub(margin).max(floor);
    match requested {
        Some(requested) if requested <= cap => Some(requested),
        _ => Some(cap),
    }
}

/// Model call timeout for the remaining budget.
///
/// The call may run for whatever remains, but never less than `floor` so a
/// forced report still gets a chance to answer. `None` without a budget.
pub fn model_call_timeout(remaining: Option<Duration>, floor: Duration) -> Option<Duration> {
    remaining.map(|remaining| remaining.max(floor))
}

/// Remaining budget was too small to start a child agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsufficientTime {
    pub remaining: Duration,
    pub minimum: Duration,
}

impl fmt::Display for InsufficientTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Insufficient time to launch subagent. Remaining time: {:.1}s (minimum required: {}s)",
            self.remaining.as_secs_f64(),
            self.minimum.as_secs()
        )
    }
}

impl std::error::Error for InsufficientTime {}

/// Gate applied before launching a child agent.
pub fn check_launch_budget(
    remaining: Option<Duration>,
    minimum: Duration,
) -> Result<(), InsufficientTime> {
    match remaining {
        Some(remaining) if remaining < minimum => Err(InsufficientTime { remaining, minimum }),
        _ => Ok(()),
    }
}

/// Format a duration as `MM:SS` (minutes may exceed 59).
pub fn format_mm_ss(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn unbounded_budget_never_exhausts() {
        let budget = TimeBudget::unbounded();
        assert_eq!(budget.remaining(), None);
        assert!(!budget.is_exhausted());
    }

    #[test]
    fn zero_budget_is_exhausted_immediately() {
        let budget = TimeBudget::starting_now(Duration::ZERO);
        assert!(budget.is_exhausted());
        assert_eq!(budget.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn child_budget_drops_limit_below_floor() {
        let tight = TimeBudget::starting_now(secs(3));
        assert_eq!(tight.child_budget(secs(5)).limit(), None);

        let roomy = TimeBudget::starting_now(secs(600));
        let child = roomy.child_budget(secs(5)).limit().expect("child limit");
        assert!(child <= secs(600));
        assert!(child > secs(590));
    }

    #[test]
    fn shell_timeout_is_capped_by_remaining_minus_margin() {
        let capped = effective_shell_timeout(Some(secs(120)), Some(secs(60)), secs(5), secs(5));
        assert_eq!(capped, Some(secs(55)));

        let kept = effective_shell_timeout(Some(secs(10)), Some(secs(60)), secs(5), secs(5));
        assert_eq!(kept, Some(secs(10)));

        let unrequested = effective_shell_timeout(None, Some(secs(60)), secs(5), secs(5));
        assert_eq!(unrequested, Some(secs(55)));
    }

    #[test]
    fn shell_timeout_respects_floor() {
        let floored = effective_shell_timeout(Some(secs(30)), Some(secs(2)), secs(5), secs(5));
        assert_eq!(floored, Some(secs(5)));
    }

    #[test]
    fn shell_timeout_passes_through_without_budget() {
        assert_eq!(
            effective_shell_timeout(Some(secs(7)), None, secs(5), secs(5)),
            Some(secs(7))
        );
        assert_eq!(effective_shell_timeout(None, None, secs(5), secs(5)), None);
    }

    #[test]
    fn model_timeout_follows_remaining_budget_above_floor() {
        assert_eq!(model_call_timeout(None, secs(10)), None);
        assert_eq!(model_call_timeout(Some(secs(35)), secs(10)), Some(secs(35)));
        assert_eq!(model_call_timeout(Some(Duration::ZERO), secs(10)), Some(secs(10)));
    }

    #[test]
    fn launch_gate_rejects_short_remaining_time() {
        let err = check_launch_budget(Some(secs(10)), secs(30)).unwrap_err();
        assert_eq!(err.minimum, secs(30));
        assert!(err.to_string().contains("minimum required: 30s"));
        assert!(check_launch_budget(Some(secs(30)), secs(30)).is_ok());
        assert!(check_launch_budget(None, secs(30)).is_ok());
    }

    #[test]
    fn mm_ss_formatting() {
        assert_eq!(format_mm_ss(secs(5)), "00:05");
        assert_eq!(format_mm_ss(secs(125)), "02:05");
    }
}
