//! System messages and initial prompts rendered from embedded templates.
//!
//! Initial prompts carry `<!-- section:KEY required|droppable -->` markers.
//! Rendering parses them into sections and fits the result to a character
//! budget before the markers are stripped. Bootstrap file contents are
//! shortened before rendering so every bootstrap heading survives the fit.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::permissions::is_read_only;
use crate::core::types::{AgentType, BootstrapContent, SubagentTask};

const ACTIONS_TEMPLATE: &str = include_str!("prompts/actions.md");
const ORCHESTRATOR_TEMPLATE: &str = include_str!("prompts/orchestrator.md");
const EXPLORER_TEMPLATE: &str = include_str!("prompts/explorer.md");
const CODER_TEMPLATE: &str = include_str!("prompts/coder.md");
const CODE_REVIEWER_TEMPLATE: &str = include_str!("prompts/code_reviewer.md");
const TEST_WRITER_TEMPLATE: &str = include_str!("prompts/test_writer.md");
const TASK_TEMPLATE: &str = include_str!("prompts/task.md");
const INSTRUCTION_TEMPLATE: &str = include_str!("prompts/instruction.md");

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("valid section marker regex")
});

/// Sections removed first when a prompt is over budget.
const DROP_ORDER: [&str; 1] = ["environment"];

const TRUNCATION_MARK: &str = "\n[truncated]";

/// Room kept per cut bootstrap item for its `[truncated N chars]` marker.
const BOOTSTRAP_MARK_RESERVE: usize = 32;

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();
    for (index, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(index + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |next| next.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn total_chars(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.chars().count()).sum()
}

/// Drop droppable sections in [`DROP_ORDER`], then truncate the last one.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_chars(sections) <= budget {
            return;
        }
        if let Some(index) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                chars_dropped = sections[index].content.chars().count(),
                "dropped section for budget"
            );
            sections.remove(index);
        }
    }

    let total = total_chars(sections);
    if total <= budget {
        return;
    }
    let Some(last) = sections.last_mut() else {
        return;
    };
    let last_len = last.content.chars().count();
    let allowed = budget.saturating_sub(total - last_len);
    let keep = allowed.saturating_sub(TRUNCATION_MARK.len());
    let cut = last
        .content
        .char_indices()
        .nth(keep)
        .map_or(last.content.len(), |(index, _)| index);
    last.content.truncate(cut);
    last.content.push_str(TRUNCATION_MARK);
    debug!(section = %last.key, before_chars = last_len, "truncated section for budget");
}

/// Shrink bootstrap contents to `available` chars in total.
///
/// Contents are capped at a common level, so the largest items lose the most
/// and items under the cap stay whole. A cut item ends with a marker naming
/// how many chars were removed.
fn fit_bootstrap(items: &[BootstrapContent], available: usize) -> Vec<BootstrapContent> {
    let total: usize = items.iter().map(|item| item.content.chars().count()).sum();
    if total <= available {
        return items.to_vec();
    }

    let mut sizes: Vec<usize> = items.iter().map(|item| item.content.chars().count()).collect();
    sizes.sort_unstable();
    let mut remaining = available;
    let mut left = sizes.len();
    let mut cap = 0;
    for size in sizes {
        let share = remaining / left;
        if size > share {
            cap = share;
            break;
        }
        remaining -= size;
        left -= 1;
    }

    items
        .iter()
        .map(|item| {
            let chars = item.content.chars().count();
            if chars <= cap {
                return item.clone();
            }
            let keep = cap.saturating_sub(BOOTSTRAP_MARK_RESERVE);
            let cut = item
                .content
                .char_indices()
                .nth(keep)
                .map_or(item.content.len(), |(index, _)| index);
            let mut content = item.content[..cut].to_string();
            content.push_str(&format!("\n[truncated {} chars]", chars - keep));
            debug!(
                path = %item.path,
                before_chars = chars,
                kept_chars = keep,
                "truncated bootstrap content"
            );
            BootstrapContent {
                content,
                ..item.clone()
            }
        })
        .collect()
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Renders system messages and budgeted initial prompts.
pub struct PromptBuilder {
    env: Environment<'static>,
    budget_chars: usize,
}

impl PromptBuilder {
    pub fn new(budget_chars: usize) -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in [
            ("actions", ACTIONS_TEMPLATE),
            ("orchestrator", ORCHESTRATOR_TEMPLATE),
            ("explorer", EXPLORER_TEMPLATE),
            ("coder", CODER_TEMPLATE),
            ("code_reviewer", CODE_REVIEWER_TEMPLATE),
            ("test_writer", TEST_WRITER_TEMPLATE),
            ("task", TASK_TEMPLATE),
            ("instruction", INSTRUCTION_TEMPLATE),
        ] {
            env.add_template(name, source)
                .with_context(|| format!("compile {name} template"))?;
        }
        Ok(Self { env, budget_chars })
    }

    /// System message for `agent_type` at `depth`.
    pub fn system_message(&self, agent_type: AgentType, depth: u32) -> Result<String> {
        let template = self.env.get_template(agent_type.as_str())?;
        let rendered = template.render(context! {
            depth => depth,
            can_write => !is_read_only(agent_type),
            reports => agent_type != AgentType::Orchestrator,
        })?;
        Ok(rendered.trim().to_string())
    }

    /// First user message of a subagent.
    pub fn task_prompt(&self, task: &SubagentTask, environment: &str) -> Result<String> {
        let skeleton: Vec<BootstrapContent> = task
            .bootstrap
            .iter()
            .map(|item| BootstrapContent {
                content: String::new(),
                ..item.clone()
            })
            .collect();
        let overhead = total_chars(&parse_sections(&self.render_task(task, &skeleton, "")?))
            + 2 * task.bootstrap.len();
        let bootstrap = fit_bootstrap(&task.bootstrap, self.budget_chars.saturating_sub(overhead));
        Ok(self.fit(&self.render_task(task, &bootstrap, environment)?))
    }

    fn render_task(
        &self,
        task: &SubagentTask,
        bootstrap: &[BootstrapContent],
        environment: &str,
    ) -> Result<String> {
        let template = self.env.get_template("task")?;
        let rendered = template.render(context! {
            title => task.title.trim(),
            description => task.description.trim(),
            max_turns => task.max_turns,
            contexts => &task.store_contexts,
            bootstrap => bootstrap,
            environment => Some(environment.trim()).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered)
    }

    /// First user message of the orchestrator.
    pub fn instruction_prompt(
        &self,
        instruction: &str,
        max_turns: u32,
        environment: &str,
    ) -> Result<String> {
        let template = self.env.get_template("instruction")?;
        let rendered = template.render(context! {
            instruction => instruction.trim(),
            max_turns => max_turns,
            environment => Some(environment.trim()).filter(|s| !s.is_empty()),
        })?;
        Ok(self.fit(&rendered))
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_chars);
        render_sections(&sections)
    }
}
