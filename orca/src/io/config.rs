//! Orca configuration stored under `.orca/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::AgentType;

/// Default config location relative to the workspace root.
pub const DEFAULT_CONFIG_PATH: &str = ".orca/config.toml";

/// Orca configuration (TOML).
///
/// Missing fields fall back to defaults, so a partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrcaConfig {
    /// Directory for per-agent session logs. Disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging_dir: Option<PathBuf>,

    pub limits: LimitsConfig,
    pub orchestrator: OrchestratorConfig,
    pub executor: ExecutorConfig,
    pub model: ModelConfig,
}

/// Policy constants of the turn loop and the action handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Environment responses longer than this are truncated with a notice.
    pub max_env_response_chars: usize,
    /// Consecutive parse-error (or no-action) turns before a forced report.
    pub consecutive_failure_threshold: u32,
    /// Minimum remaining budget required to launch a subagent.
    pub min_launch_secs: u64,
    /// Shell timeouts are capped at `remaining - margin`.
    pub shell_timeout_margin_secs: u64,
    /// Lower bound of a capped shell timeout.
    pub shell_timeout_floor_secs: u64,
    /// Lower bound of a model call timeout capped by the remaining budget.
    pub model_timeout_floor_secs: u64,
    /// Children run unbounded by time when less than this remains.
    pub child_budget_floor_secs: u64,
    /// Shell runs shorter than this do not report their duration.
    pub show_elapsed_after_secs: u64,
    /// Line limit used when preloading bootstrap files.
    pub bootstrap_read_limit_lines: usize,
    pub default_subagent_max_turns: u32,
    /// Character budget of the initial task prompt.
    pub task_prompt_budget_chars: usize,
    /// Inline stored context content in launch responses.
    pub verbose_subagent_results: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_env_response_chars: 12_000,
            consecutive_failure_threshold: 3,
            min_launch_secs: 30,
            shell_timeout_margin_secs: 5,
            shell_timeout_floor_secs: 5,
            model_timeout_floor_secs: 10,
            child_budget_floor_secs: 5,
            show_elapsed_after_secs: 5,
            bootstrap_read_limit_lines: 1000,
            default_subagent_max_turns: 20,
            task_prompt_budget_chars: 60_000,
            verbose_subagent_results: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_turns: u32,
    /// Wall-clock budget of a whole run. Unbounded when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_budget_secs: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_turns: 50,
            time_budget_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Timeout for blocking commands issued without one.
    pub default_timeout_secs: u64,
    /// Captured stdout/stderr beyond this many bytes is discarded.
    pub output_limit_bytes: usize,
    /// Commands run once per agent to describe the initial environment.
    pub snapshot_commands: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            output_limit_bytes: 100_000,
            snapshot_commands: vec![
                "pwd".to_string(),
                "ls -la".to_string(),
                "git status --short 2>/dev/null | head -50".to_string(),
            ],
        }
    }
}

/// Model bridge and per-role model selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Bridge command; receives the request JSON on stdin and prints the
    /// assistant text on stdout (e.g. `["python3", "bridge.py"]`).
    pub command: Vec<String>,
    pub timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    /// Fallback for every delegated role without its own model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subagent_model: Option<String>,
    pub temperature: f64,
    pub subagent_temperature: f64,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Never persisted; supplied through the environment.
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Per-role overrides keyed by agent type (`coder`, `explorer`, ...).
    pub agents: BTreeMap<String, AgentModelConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 600,
            default_model: None,
            subagent_model: None,
            temperature: 0.1,
            subagent_temperature: 0.1,
            max_tokens: 2000,
            api_base: None,
            api_key: None,
            agents: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentModelConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Resolved model parameters for one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    pub model: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
}

impl ModelConfig {
    /// Parameters for `agent_type`: role override, then the subagent
    /// fallback (delegated roles only), then the default model.
    pub fn params_for(&self, agent_type: AgentType) -> ModelParams {
        let role = self.agents.get(agent_type.as_str());
        let delegated = agent_type != AgentType::Orchestrator;
        let model = role
            .and_then(|role| role.model.clone())
            .or_else(|| {
                if delegated {
                    self.subagent_model.clone()
                } else {
                    None
                }
            })
            .or_else(|| self.default_model.clone());
        let base_temperature = if delegated {
            self.subagent_temperature
        } else {
            self.temperature
        };
        ModelParams {
            model,
            temperature: role
                .and_then(|role| role.temperature)
                .unwrap_or(base_temperature),
            max_tokens: self.max_tokens,
            api_key: self.api_key.clone(),
            api_base: self.api_base.clone(),
        }
    }
}

/// Environment variable naming the model of one role.
pub fn role_model_env(agent_type: AgentType) -> &'static str {
    match agent_type {
        AgentType::Orchestrator => "ORCA_ORCHESTRATOR_MODEL",
        AgentType::Explorer => "ORCA_EXPLORER_MODEL",
        AgentType::Coder => "ORCA_CODER_MODEL",
        AgentType::CodeReviewer => "ORCA_REVIEWER_MODEL",
        AgentType::TestWriter => "ORCA_TEST_WRITER_MODEL",
    }
}

impl OrcaConfig {
    pub fn validate(&self) -> Result<()> {
        let limits = &self.limits;
        if limits.max_env_response_chars == 0 {
            return Err(anyhow!("limits.max_env_response_chars must be > 0"));
        }
        if limits.consecutive_failure_threshold == 0 {
            return Err(anyhow!("limits.consecutive_failure_threshold must be > 0"));
        }
        if limits.bootstrap_read_limit_lines == 0 {
            return Err(anyhow!("limits.bootstrap_read_limit_lines must be > 0"));
        }
        if limits.default_subagent_max_turns == 0 {
            return Err(anyhow!("limits.default_subagent_max_turns must be > 0"));
        }
        if limits.task_prompt_budget_chars == 0 {
            return Err(anyhow!("limits.task_prompt_budget_chars must be > 0"));
        }
        if self.orchestrator.max_turns == 0 {
            return Err(anyhow!("orchestrator.max_turns must be > 0"));
        }
        if self.orchestrator.time_budget_secs == Some(0) {
            return Err(anyhow!("orchestrator.time_budget_secs must be > 0 when set"));
        }
        if self.executor.default_timeout_secs == 0 {
            return Err(anyhow!("executor.default_timeout_secs must be > 0"));
        }
        if self.executor.output_limit_bytes == 0 {
            return Err(anyhow!("executor.output_limit_bytes must be > 0"));
        }
        if self.model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if self.model.max_tokens == 0 {
            return Err(anyhow!("model.max_tokens must be > 0"));
        }
        if let Some(role) = self
            .model
            .agents
            .keys()
            .find(|role| role.parse::<AgentType>().is_err())
        {
            return Err(anyhow!("model.agents.{role} is not a known agent type"));
        }
        Ok(())
    }

    /// Apply environment overrides through `lookup` (usually `std::env::var`).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(raw) = get("ORCA_MAX_ENV_RESPONSE_CHARS") {
            self.limits.max_env_response_chars = raw
                .trim()
                .parse()
                .with_context(|| format!("parse ORCA_MAX_ENV_RESPONSE_CHARS={raw}"))?;
        }
        if let Some(raw) = get("ORCA_SUBAGENT_TEMPERATURE") {
            self.model.subagent_temperature = raw
                .trim()
                .parse()
                .with_context(|| format!("parse ORCA_SUBAGENT_TEMPERATURE={raw}"))?;
        }
        if let Some(model) = get("LITELLM_MODEL") {
            self.model.default_model = Some(model);
        }
        if let Some(model) = get("ORCA_SUBAGENT_MODEL") {
            self.model.subagent_model = Some(model);
        }
        for agent_type in AgentType::ALL {
            if let Some(model) = get(role_model_env(agent_type)) {
                self.model
                    .agents
                    .entry(agent_type.as_str().to_string())
                    .or_default()
                    .model = Some(model);
            }
        }
        if let Some(key) = get("ORCA_API_KEY").or_else(|| get("LITE_LLM_API_KEY")) {
            self.model.api_key = Some(key);
        }
        if let Some(base) = get("ORCA_API_BASE").or_else(|| get("LITE_LLM_API_BASE")) {
            self.model.api_base = Some(base);
        }
        self.validate()
    }
}

impl Default for OrcaConfig {
    fn default() -> Self {
        Self {
            logging_dir: None,
            limits: LimitsConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            executor: ExecutorConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrcaConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrcaConfig> {
    if !path.exists() {
        let cfg = OrcaConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrcaConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OrcaConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
