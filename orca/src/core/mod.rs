//! Deterministic, pure logic shared by every agent.
//!
//! Core modules are free of I/O side effects. They operate on in-memory data
//! and return deterministic outputs suitable for tests.

pub mod actions;
pub mod budget;
pub mod output;
pub mod parser;
pub mod permissions;
pub mod todo;
pub mod turn_state;
pub mod types;
