//! Hierarchical coding-agent orchestration.
//!
//! An orchestrator agent plans work and delegates it to worker subagents
//! (explorer, coder, code reviewer, test writer), which may delegate further.
//! Agents speak in XML-delimited YAML action blocks; findings flow back as
//! named contexts held in a shared hub. The architecture keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (parsing, permissions, budgets,
//!   turn-loop state). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting backends (shell, files, model, config,
//!   prompts). Behind traits to enable fakes in tests.
//!
//! [`handler`], [`turn`], [`hub`] and [`agents`] coordinate core logic with
//! the backends; [`start`] wires them up for the CLI.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod handler;
pub mod hub;
pub mod io;
pub mod logging;
pub mod start;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod turn;
