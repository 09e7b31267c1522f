//! Action block parser.
//!
//! Model output is free text with embedded `<tag>YAML</tag>` blocks. The
//! parser extracts blocks left to right, validates each body against the
//! embedded action schema and deserializes it into an [`Action`]. It never
//! executes anything.

use std::collections::HashMap;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Validator, validator_for};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::core::actions::{ACTION_TAGS, Action};

static OPEN_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<([a-z][a-z0-9_]*)>").expect("valid open tag regex")
});

const ACTION_SCHEMAS: &str = include_str!("../../schemas/actions.schema.json");

/// Outcome of parsing one model response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTurn {
    pub actions: Vec<Action>,
    pub errors: Vec<String>,
    pub has_error: bool,
}

impl ParsedTurn {
    fn push_error(&mut self, message: String) {
        self.errors.push(message);
        self.has_error = true;
    }
}

/// Stateless parser holding the compiled per-action schemas.
pub struct ActionParser {
    validators: HashMap<&'static str, Validator>,
}

impl ActionParser {
    pub fn new() -> Result<Self> {
        let schemas: Value =
            serde_json::from_str(ACTION_SCHEMAS).context("parse embedded action schemas")?;
        let mut validators = HashMap::new();
        for tag in ACTION_TAGS {
            let schema = schemas
                .get(tag)
                .ok_or_else(|| anyhow!("missing schema for action '{tag}'"))?;
            let validator = validator_for(schema)
                .map_err(|err| anyhow!("invalid schema for action '{tag}': {err}"))?;
            validators.insert(tag, validator);
        }
        Ok(Self { validators })
    }

    /// Parse every action block in `text`, in order of appearance.
    pub fn parse(&self, text: &str) -> ParsedTurn {
        let mut parsed = ParsedTurn::default();
        let mut pos = 0;
        while let Some(captures) = OPEN_TAG_RE.captures_at(text, pos) {
            let (Some(open), Some(name)) = (captures.get(0), captures.get(1)) else {
                break;
            };
            let name = name.as_str();
            let closing = format!("</{name}>");
            let close_at = text[open.end()..]
                .find(&closing)
                .map(|offset| open.end() + offset);

            if !ACTION_TAGS.contains(&name) {
                match close_at {
                    Some(close) => {
                        parsed.push_error(format!(
                            "Unknown action <{name}>. Valid actions: {}",
                            ACTION_TAGS.join(", ")
                        ));
                        pos = close + closing.len();
                    }
                    None => pos = open.end(),
                }
                continue;
            }

            let Some(close) = close_at else {
                parsed.push_error(format!(
                    "Missing closing tag {closing} for <{name}> action"
                ));
                pos = open.end();
                continue;
            };

            match self.parse_block(name, &text[open.end()..close]) {
                Ok(action) => parsed.actions.push(action),
                Err(message) => parsed.push_error(message),
            }
            pos = close + closing.len();
        }
        tracing::debug!(
            actions = parsed.actions.len(),
            errors = parsed.errors.len(),
            "parsed model output"
        );
        parsed
    }

    fn parse_block(&self, tag: &str, body: &str) -> std::result::Result<Action, String> {
        let value = if body.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_yaml::from_str::<Value>(body)
                .map_err(|err| format!("Invalid YAML in <{tag}> action: {err}"))?
        };
        let value = match value {
            Value::Null => Value::Object(Map::new()),
            Value::Object(_) => strip_nulls(value),
            _ => return Err(format!("<{tag}> action body must be a YAML mapping")),
        };

        if let Some(validator) = self.validators.get(tag) {
            let messages: Vec<String> = validator
                .iter_errors(&value)
                .map(|err| err.to_string())
                .collect();
            if !messages.is_empty() {
                return Err(format!(
                    "Invalid <{tag}> action: {}",
                    messages.join("; ")
                ));
            }
        }

        build_action(tag, value).map_err(|err| format!("Invalid <{tag}> action: {err}"))
    }
}

/// Drop null-valued keys so that serde defaults apply to them.
fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}

fn payload<T: DeserializeOwned>(value: Value) -> serde_json::Result<T> {
    serde_json::from_value(value)
}

fn build_action(tag: &str, value: Value) -> Result<Action> {
    let action = match tag {
        "todo" => Action::BatchTodo(payload(value)?),
        "add_note" => Action::AddNote(payload(value)?),
        "view_all_notes" => Action::ViewAllNotes,
        "read_file" => Action::Read(payload(value)?),
        "write_file" => Action::Write(payload(value)?),
        "edit_file" => Action::Edit(payload(value)?),
        "multi_edit" => Action::MultiEdit(payload(value)?),
        "grep" => Action::Grep(payload(value)?),
        "glob" => Action::Glob(payload(value)?),
        "file_metadata" => Action::FileMetadata(payload(value)?),
        "write_temp_script" => Action::WriteTempScript(payload(value)?),
        "bash" => Action::Bash(payload(value)?),
        "finish" => Action::Finish(payload(value)?),
        "task_create" => Action::TaskCreate(payload(value)?),
        "add_context" => Action::AddContext(payload(value)?),
        "launch_subagent" => Action::LaunchSubagent(payload(value)?),
        "launch_parallel_subagents" => Action::LaunchParallelSubagents(payload(value)?),
        "report" => Action::Report(payload(value)?),
        other => return Err(anyhow!("unknown action '{other}'")),
    };
    Ok(action)
}
