//! Per-agent session records under `<logging_dir>/<session>/`.
//!
//! These are product artifacts, independent of `RUST_LOG` tracing. Each agent
//! run writes one pretty-printed JSON file named after its agent id.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::types::{AgentType, Message, count_tokens};

#[derive(Debug, Clone, Serialize)]
pub struct TokenTotals {
    pub input: usize,
    pub output: usize,
}

/// One finished agent run.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRecord<'a> {
    pub agent_id: &'a str,
    pub agent_type: AgentType,
    pub depth: u32,
    pub title: &'a str,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
    pub outcome: String,
    pub num_turns: u32,
    pub tokens: TokenTotals,
    pub trajectory: &'a [Message],
}

impl<'a> AgentRecord<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: &'a str,
        agent_type: AgentType,
        depth: u32,
        title: &'a str,
        started_at: DateTime<Utc>,
        outcome: String,
        num_turns: u32,
        trajectory: &'a [Message],
    ) -> Self {
        let ended_at = Utc::now();
        let duration_ms = (ended_at - started_at)
            .num_milliseconds()
            .try_into()
            .unwrap_or(0);
        let (input, output) = count_tokens(trajectory);
        Self {
            agent_id,
            agent_type,
            depth,
            title,
            started_at: started_at.to_rfc3339(),
            ended_at: ended_at.to_rfc3339(),
            duration_ms,
            outcome,
            num_turns,
            tokens: TokenTotals { input, output },
            trajectory,
        }
    }
}

/// Directory of one orchestration session.
#[derive(Debug, Clone)]
pub struct SessionLog {
    dir: PathBuf,
}

impl SessionLog {
    /// Create `<logging_dir>/<session_id>/`.
    pub fn create(logging_dir: &Path, session_id: &str) -> Result<Self> {
        let dir = logging_dir.join(session_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("create session dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// Session id derived from the current time (`20260101T120000Z`).
    pub fn new_session_id() -> String {
        Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, agent_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(agent_id)))
    }

    pub fn write_agent(&self, record: &AgentRecord<'_>) -> Result<PathBuf> {
        let path = self.path_for(record.agent_id);
        let mut buf = serde_json::to_string_pretty(record).context("serialize agent record")?;
        buf.push('\n');
        fs::write(&path, buf).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}

/// Agent ids contain `->` and `#`; keep file names portable.
fn file_stem(agent_id: &str) -> String {
    agent_id
        .replace("->", "__")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_ids_map_to_portable_file_names() {
        assert_eq!(file_stem("orchestrator"), "orchestrator");
        assert_eq!(
            file_stem("orchestrator->task_001#1"),
            "orchestrator__task_001_1"
        );
    }

    #[test]
    fn writes_pretty_json_with_trailing_newline() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = SessionLog::create(temp.path(), "session").expect("session");
        let trajectory = vec![Message::system("sys"), Message::assistant("out")];
        let record = AgentRecord::new(
            "orchestrator->task_001#1",
            AgentType::Explorer,
            1,
            "Map the parser",
            Utc::now(),
            "reported".to_string(),
            2,
            &trajectory,
        );
        let path = log.write_agent(&record).expect("write");
        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.ends_with("}\n"));
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["agent_type"], "explorer");
        assert_eq!(value["outcome"], "reported");
        assert_eq!(value["num_turns"], 2);
        assert_eq!(value["trajectory"][1]["role"], "assistant");
        assert!(value["started_at"].as_str().is_some_and(|s| s.contains('T')));
    }
}
