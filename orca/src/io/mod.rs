//! Side-effecting backends: configuration, processes, files, the model and
//! prompt rendering.

pub mod config;
pub mod env_info;
pub mod executor;
pub mod model;
pub mod process;
pub mod prompt;
pub mod session_log;
pub mod workspace;
