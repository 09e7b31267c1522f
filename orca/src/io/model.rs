//! Language model access.
//!
//! Agents talk to the model through [`ModelClient`]. The bundled
//! [`CommandModel`] delegates each call to an external bridge command: the
//! request is written to its stdin as JSON and the assistant text is read
//! from its stdout. Any provider SDK can sit behind such a bridge.

use std::fmt;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::core::types::Message;
use crate::io::config::ModelParams;
use crate::io::process::run_command_with_timeout;

/// Environment variable carrying the API key to the bridge command.
pub const API_KEY_ENV: &str = "ORCA_API_KEY";

/// Stderr markers that identify a context-window overflow.
const OVERFLOW_MARKERS: [&str; 3] = [
    "context_length_exceeded",
    "context window",
    "ContextWindowExceeded",
];

/// One model call.
#[derive(Debug, Clone)]
pub struct ModelRequest<'a> {
    pub agent_id: &'a str,
    pub messages: &'a [Message],
    pub params: &'a ModelParams,
    /// Upper bound for this call; `None` leaves the backend's own limit.
    pub timeout: Option<Duration>,
}

/// The conversation no longer fits the model's context window.
///
/// Returned inside `anyhow::Error`; callers recover it with `downcast_ref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextWindowExceeded {
    pub detail: String,
}

impl fmt::Display for ContextWindowExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context window exceeded: {}", self.detail)
    }
}

impl std::error::Error for ContextWindowExceeded {}

/// Abstraction over model backends. Shared by every agent of a run.
pub trait ModelClient: Send + Sync {
    /// Return the assistant text for `request`. No retries are performed.
    fn complete(&self, request: &ModelRequest<'_>) -> Result<String>;
}

/// Whether `err` signals a context-window overflow.
pub fn is_context_window_exceeded(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ContextWindowExceeded>().is_some()
}

#[derive(Serialize)]
struct BridgeRequest<'a> {
    agent_id: &'a str,
    model: Option<&'a str>,
    temperature: f64,
    max_tokens: u32,
    api_base: Option<&'a str>,
    messages: &'a [Message],
}

/// Model client spawning a bridge command per call.
pub struct CommandModel {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandModel {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Result<Self> {
        if command.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!(
                "model.command is not configured; set it in .orca/config.toml"
            ));
        }
        Ok(Self {
            command,
            timeout,
            output_limit_bytes,
        })
    }
}

impl ModelClient for CommandModel {
    #[instrument(skip_all, fields(agent_id = request.agent_id, messages = request.messages.len()))]
    fn complete(&self, request: &ModelRequest<'_>) -> Result<String> {
        let payload = BridgeRequest {
            agent_id: request.agent_id,
            model: request.params.model.as_deref(),
            temperature: request.params.temperature,
            max_tokens: request.params.max_tokens,
            api_base: request.params.api_base.as_deref(),
            messages: request.messages,
        };
        let body = serde_json::to_vec(&payload).context("serialize model request")?;

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("model.command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(key) = &request.params.api_key {
            cmd.env(API_KEY_ENV, key);
        }

        let timeout = request
            .timeout
            .map_or(self.timeout, |limit| limit.min(self.timeout));
        let output = run_command_with_timeout(cmd, Some(&body), timeout, self.output_limit_bytes)
            .context("run model command")?;
        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "model command timed out");
            return Err(anyhow!(
                "model command timed out after {} seconds",
                timeout.as_secs()
            ));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            if OVERFLOW_MARKERS.iter().any(|marker| stderr.contains(marker)) {
                return Err(ContextWindowExceeded {
                    detail: stderr.trim().to_string(),
                }
                .into());
            }
            return Err(anyhow!(
                "model command failed with status {:?}: {}",
                output.status.code(),
                stderr.trim()
            ));
        }
        let text = String::from_utf8(output.stdout).context("model output is not UTF-8")?;
        debug!(chars = text.len(), "model responded");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ModelParams {
        ModelParams {
            model: Some("test-model".to_string()),
            temperature: 0.1,
            max_tokens: 100,
            api_key: Some("k".to_string()),
            api_base: None,
        }
    }

    fn bridge(script: &str) -> CommandModel {
        CommandModel::new(
            vec!["bash".to_string(), "-c".to_string(), script.to_string()],
            Duration::from_secs(10),
            100_000,
        )
        .expect("model")
    }

    fn call_with_timeout(model: &CommandModel, timeout: Option<Duration>) -> Result<String> {
        let messages = vec![Message::user("hi")];
        let params = params();
        model.complete(&ModelRequest {
            agent_id: "orchestrator",
            messages: &messages,
            params: &params,
            timeout,
        })
    }

    fn call(model: &CommandModel) -> Result<String> {
        call_with_timeout(model, None)
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandModel::new(Vec::new(), Duration::from_secs(1), 10).is_err());
    }

    #[test]
    fn bridge_receives_json_and_key() {
        let model = bridge(r#"read -r body; printf '%s|%s' "$ORCA_API_KEY" "$body""#);
        let text = call(&model).expect("complete");
        let (key, body) = text.split_once('|').expect("separator");
        assert_eq!(key, "k");
        let json: serde_json::Value = serde_json::from_str(body).expect("json body");
        assert_eq!(json["model"], "test-model");
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn overflow_stderr_maps_to_typed_error() {
        let model = bridge("cat >/dev/null; echo 'error: context_length_exceeded' >&2; exit 1");
        let err = call(&model).expect_err("overflow");
        assert!(is_context_window_exceeded(&err));
    }

    #[test]
    fn request_timeout_caps_the_configured_one() {
        let model = bridge("cat >/dev/null; sleep 5; echo late");
        let started = std::time::Instant::now();
        let err = call_with_timeout(&model, Some(Duration::from_secs(1))).expect_err("timeout");
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(err.to_string().contains("timed out after 1 seconds"));
    }

    #[test]
    fn other_failures_are_plain_errors() {
        let model = bridge("cat >/dev/null; echo 'rate limited' >&2; exit 1");
        let err = call(&model).expect_err("failure");
        assert!(!is_context_window_exceeded(&err));
        assert!(err.to_string().contains("rate limited"));
    }
}
