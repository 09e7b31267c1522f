//! Executes parsed actions for one agent.
//!
//! Every operation answers with a wrapped response and an error flag. Nothing
//! here propagates errors: backend failures, denied writes and failed child
//! runs all become text the model reads on its next turn.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::agents::AgentRuntime;
use crate::agents::subagent::Subagent;
use crate::core::actions::{
    Action, AddContext, AddNote, Bash, BatchTodo, EditOp, TaskCreate, TodoOpKind,
};
use crate::core::budget::{TimeBudget, check_launch_budget, effective_shell_timeout, format_mm_ss};
use crate::core::output::format_tool_output;
use crate::core::permissions::{blocked_action_message, is_action_allowed};
use crate::core::todo::{Scratchpad, TodoManager, TodoStatus, truncate_preview};
use crate::core::types::{
    AgentType, BootstrapContent, SubagentResult, SubagentRun, SubagentTask, Task, TaskSpec,
};
use crate::io::workspace::BackendReply;

/// Characters of todo content echoed back in todo messages.
const TODO_PREVIEW_CHARS: usize = 15;

/// Counters accumulated across the actions of one turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnStats {
    pub duplicate_contexts: usize,
    pub successful_context_refs: usize,
    pub missing_context_refs: usize,
    /// Child runs keyed by child agent id.
    pub subagent_runs: BTreeMap<String, SubagentRun>,
}

impl TurnStats {
    pub fn absorb(&mut self, other: TurnStats) {
        self.duplicate_contexts += other.duplicate_contexts;
        self.successful_context_refs += other.successful_context_refs;
        self.missing_context_refs += other.missing_context_refs;
        self.subagent_runs.extend(other.subagent_runs);
    }
}

/// Identity of the agent an [`ActionHandler`] acts for.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub agent_type: AgentType,
    pub depth: u32,
}

/// Outcome of running one child agent.
struct ChildLaunch {
    result: SubagentResult,
    agent_id: String,
    run: Option<SubagentRun>,
    successful_refs: usize,
    missing_refs: usize,
}

pub struct ActionHandler<'a> {
    runtime: &'a AgentRuntime<'a>,
    identity: AgentIdentity,
    budget: TimeBudget,
    todos: TodoManager,
    notes: Scratchpad,
    stats: TurnStats,
}

impl<'a> ActionHandler<'a> {
    pub fn new(runtime: &'a AgentRuntime<'a>, identity: AgentIdentity, budget: TimeBudget) -> Self {
        Self {
            runtime,
            identity,
            budget,
            todos: TodoManager::new(),
            notes: Scratchpad::new(),
            stats: TurnStats::default(),
        }
    }

    /// Drain the counters accumulated since the last call.
    pub fn take_turn_stats(&mut self) -> TurnStats {
        std::mem::take(&mut self.stats)
    }

    /// Execute one action and return `(wrapped response, is_error)`.
    pub fn handle(&mut self, action: &Action) -> (String, bool) {
        if !is_action_allowed(self.identity.agent_type, action) {
            warn!(
                agent_id = %self.identity.agent_id,
                action = action.tag(),
                "write action denied"
            );
            let message = blocked_action_message(self.identity.agent_type, action);
            return (format_tool_output("permission", &message), true);
        }

        match action {
            Action::BatchTodo(todo) => self.handle_todo(todo),
            Action::AddNote(note) => self.handle_add_note(note),
            Action::ViewAllNotes => (format_tool_output("scratchpad", &self.notes.view_all()), false),
            Action::Read(read) => {
                let reply = self.workspace().read_file(&read.file_path, read.offset, read.limit);
                wrap_reply("file", reply)
            }
            Action::Write(write) => {
                wrap_reply("file", self.workspace().write_file(&write.file_path, &write.content))
            }
            Action::Edit(edit) => {
                let op = EditOp {
                    old_string: edit.old_string.clone(),
                    new_string: edit.new_string.clone(),
                    replace_all: edit.replace_all,
                };
                wrap_reply("file", self.workspace().edit_file(&edit.file_path, &op))
            }
            Action::MultiEdit(multi) => {
                wrap_reply("file", self.workspace().multi_edit(&multi.file_path, &multi.edits))
            }
            Action::Grep(grep) => {
                let reply = self.workspace().grep(
                    &grep.pattern,
                    grep.path.as_deref(),
                    grep.include.as_deref(),
                );
                wrap_reply("search", reply)
            }
            Action::Glob(glob) => {
                wrap_reply("search", self.workspace().glob(&glob.pattern, glob.path.as_deref()))
            }
            Action::FileMetadata(meta) => {
                wrap_reply("file", self.workspace().metadata(&meta.file_paths))
            }
            Action::WriteTempScript(script) => {
                wrap_reply("file", self.workspace().write_file(&script.file_path, &script.content))
            }
            Action::Bash(bash) => self.handle_bash(bash),
            Action::Finish(finish) => (
                format_tool_output(
                    "finish",
                    &format!("Task marked as complete: {}", finish.message),
                ),
                false,
            ),
            Action::TaskCreate(create) => self.handle_task_create(create),
            Action::AddContext(add) => self.handle_add_context(add),
            Action::LaunchSubagent(launch) => self.handle_launch(&launch.task_id),
            Action::LaunchParallelSubagents(launch) => self.handle_launch_parallel(&launch.task_ids),
            Action::Report(_) => (
                format_tool_output("report", "Report submission successful"),
                false,
            ),
        }
    }

    fn workspace(&self) -> &'a dyn crate::io::workspace::Workspace {
        self.runtime.backends.workspace
    }

    fn handle_todo(&mut self, todo: &BatchTodo) -> (String, bool) {
        let mut lines = Vec::new();
        let mut has_error = false;
        for op in &todo.operations {
            match op.action {
                TodoOpKind::Add => {
                    let content = op.content.as_deref().unwrap_or_default();
                    if content.trim().is_empty() {
                        lines.push("[ERROR] Cannot add empty todo".to_string());
                        has_error = true;
                        continue;
                    }
                    let id = self.todos.add(content);
                    lines.push(format!(
                        "Added todo [{id}]: {}",
                        truncate_preview(content, TODO_PREVIEW_CHARS)
                    ));
                }
                TodoOpKind::Complete => {
                    let Some(id) = op.task_id else {
                        lines.push("[ERROR] complete requires task_id".to_string());
                        has_error = true;
                        continue;
                    };
                    let Some(item) = self.todos.get(id).cloned() else {
                        lines.push(format!("[ERROR] Task {id} not found"));
                        has_error = true;
                        continue;
                    };
                    if item.status == TodoStatus::Completed {
                        lines.push(format!("Task {id} is already completed"));
                    } else {
                        self.todos.complete(id);
                        lines.push(format!(
                            "Completed task [{id}]: {}",
                            truncate_preview(&item.content, TODO_PREVIEW_CHARS)
                        ));
                    }
                }
                TodoOpKind::Delete => {
                    let Some(id) = op.task_id else {
                        lines.push("[ERROR] delete requires task_id".to_string());
                        has_error = true;
                        continue;
                    };
                    match self.todos.delete(id) {
                        Some(item) => lines.push(format!(
                            "Deleted task [{id}]: {}",
                            truncate_preview(&item.content, TODO_PREVIEW_CHARS)
                        )),
                        None => {
                            lines.push(format!("[ERROR] Task {id} not found"));
                            has_error = true;
                        }
                    }
                }
            }
        }

        let mut response = lines.join("\n");
        if todo.view_all {
            if !response.is_empty() {
                response.push_str("\n\n");
            }
            response.push_str(&self.todos.view_all());
        }
        (format_tool_output("todo", &response), has_error)
    }

    fn handle_add_note(&mut self, note: &AddNote) -> (String, bool) {
        if note.content.trim().is_empty() {
            return (
                format_tool_output("scratchpad", "[ERROR] Cannot add empty note"),
                true,
            );
        }
        let index = self.notes.add(&note.content);
        (
            format_tool_output("scratchpad", &format!("Added note {index} to scratchpad")),
            false,
        )
    }

    #[instrument(skip_all, fields(agent_id = %self.identity.agent_id, block = bash.block))]
    fn handle_bash(&self, bash: &Bash) -> (String, bool) {
        let limits = &self.runtime.config.limits;
        let executor = self.runtime.backends.executor;
        let started = Instant::now();

        let outcome = if bash.block {
            let requested = bash.timeout_secs.map(Duration::from_secs);
            let timeout = effective_shell_timeout(
                requested,
                self.budget.remaining(),
                Duration::from_secs(limits.shell_timeout_margin_secs),
                Duration::from_secs(limits.shell_timeout_floor_secs),
            );
            if timeout != requested && requested.is_some() {
                info!(
                    requested_secs = ?requested.map(|t| t.as_secs()),
                    capped_secs = ?timeout.map(|t| t.as_secs()),
                    "shell timeout capped to remaining budget"
                );
            }
            executor
                .execute(&bash.cmd, timeout)
                .map(|result| (result.output, result.exit_code))
        } else {
            executor
                .execute_background(&bash.cmd)
                .map(|()| ("Command started in background".to_string(), 0))
        };

        match outcome {
            Ok((mut output, exit_code)) => {
                let elapsed = started.elapsed();
                if elapsed >= Duration::from_secs(limits.show_elapsed_after_secs) {
                    let _ = write!(output, "\n\n## Command took (mm:ss): {}", format_mm_ss(elapsed));
                }
                (format_tool_output("bash", &output), exit_code != 0)
            }
            Err(err) => {
                warn!(err = %err, "command execution failed");
                (
                    format_tool_output("bash", &format!("Error executing command: {err:#}")),
                    true,
                )
            }
        }
    }

    fn handle_task_create(&mut self, create: &TaskCreate) -> (String, bool) {
        if create.agent_type == AgentType::Orchestrator {
            return (
                format_tool_output(
                    "task",
                    "[ERROR] Failed to create task: agent_type cannot be orchestrator",
                ),
                true,
            );
        }
        let max_turns = create
            .max_turns
            .unwrap_or(self.runtime.config.limits.default_subagent_max_turns);
        let task_id = self.runtime.hub.create_task(TaskSpec {
            agent_type: create.agent_type,
            title: create.title.clone(),
            description: create.description.clone(),
            context_refs: create.context_refs.clone(),
            max_turns,
            context_bootstrap: create.context_bootstrap.clone(),
        });
        info!(task_id = %task_id, agent_type = %create.agent_type, "task created");

        let mut response = format!("Created task {task_id}: {}", create.title);
        if !create.auto_launch {
            return (format_tool_output("task", &response), false);
        }
        let (launch_response, launch_error) = self.handle_launch(&task_id);
        response.push('\n');
        response.push_str(&launch_response);
        (format_tool_output("task", &response), launch_error)
    }

    fn handle_add_context(&mut self, add: &AddContext) -> (String, bool) {
        let reported_by = add
            .reported_by
            .as_deref()
            .unwrap_or(&self.identity.agent_id);
        let stored = self
            .runtime
            .hub
            .add_context(&add.id, &add.content, reported_by, add.task_id.as_deref());
        if stored {
            let message = format!("Added context '{}' to store", add.id);
            (format_tool_output("context", &message), false)
        } else {
            self.stats.duplicate_contexts += 1;
            let message = format!("[WARNING] Context '{}' already exists in store", add.id);
            (format_tool_output("context", &message), true)
        }
    }

    fn handle_launch(&mut self, task_id: &str) -> (String, bool) {
        let started = Instant::now();
        let (mut content, is_error) = match self.prepare_launch(task_id) {
            Err(message) => (message, true),
            Ok(task) => {
                let launch = self.run_child(&task);
                let formatted = self.format_result(&launch.result, &task.title);
                self.record_launch(launch);
                formatted
            }
        };
        let _ = write!(
            content,
            "\nTime taken by subagent: {} seconds",
            started.elapsed().as_secs()
        );
        (format_tool_output("subagent", &content), is_error)
    }

    fn handle_launch_parallel(&mut self, task_ids: &[String]) -> (String, bool) {
        let started = Instant::now();
        let mut seen = Vec::new();
        let prepared: Vec<Result<Task, String>> = task_ids
            .iter()
            .map(|task_id| {
                if seen.contains(task_id) {
                    return Err(format!("[ERROR] Task {task_id} listed more than once"));
                }
                seen.push(task_id.clone());
                self.prepare_launch(task_id)
            })
            .collect();
        let runnable = prepared.iter().filter(|slot| slot.is_ok()).count();
        info!(
            agent_id = %self.identity.agent_id,
            requested = task_ids.len(),
            runnable,
            "launching subagents in parallel"
        );

        let this = &*self;
        let launches: Vec<Option<ChildLaunch>> = thread::scope(|scope| {
            let handles: Vec<_> = prepared
                .iter()
                .map(|slot| {
                    slot.as_ref()
                        .ok()
                        .map(|task| (task, scope.spawn(move || this.run_child(task))))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.map(|(task, handle)| {
                        handle.join().unwrap_or_else(|_| {
                            warn!(task_id = %task.id, "subagent thread panicked");
                            this.failed_launch(&task.id, "subagent thread panicked")
                        })
                    })
                })
                .collect()
        });

        let mut sections = Vec::with_capacity(task_ids.len());
        let mut any_error = false;
        for ((task_id, slot), launch) in task_ids.iter().zip(&prepared).zip(launches) {
            let (text, is_error) = match (slot, launch) {
                (Ok(task), Some(launch)) => {
                    let formatted = self.format_result(&launch.result, &task.title);
                    self.record_launch(launch);
                    formatted
                }
                (Err(message), _) => (message.clone(), true),
                (Ok(_), None) => (format!("[ERROR] Task {task_id} was not launched"), true),
            };
            any_error |= is_error;
            sections.push(format!("### {task_id}\n{text}"));
        }

        let content = format!(
            "Launched {runnable} of {} subagents in parallel\n\n{}\n\nTime taken by subagents: {} seconds",
            task_ids.len(),
            sections.join("\n\n"),
            started.elapsed().as_secs()
        );
        (format_tool_output("subagent", &content), any_error)
    }

    /// Pre-flight checks shared by single and parallel launches.
    fn prepare_launch(&self, task_id: &str) -> Result<Task, String> {
        let minimum = Duration::from_secs(self.runtime.config.limits.min_launch_secs);
        if let Err(insufficient) = check_launch_budget(self.budget.remaining(), minimum) {
            warn!(task_id, remaining = ?insufficient.remaining, "launch rejected by time budget");
            return Err(format!("[ERROR] {insufficient}"));
        }
        let Some(task) = self.runtime.hub.get_task(task_id) else {
            return Err(format!("[ERROR] Task {task_id} not found"));
        };
        if let Some(message) = self.runtime.hub.validate_context_refs(&task.context_refs) {
            return Err(message);
        }
        Ok(task)
    }

    /// Run the child agent for `task`. Never fails; failures become an error
    /// result recorded in the hub.
    #[instrument(skip_all, fields(parent = %self.identity.agent_id, task_id = %task.id))]
    fn run_child(&self, task: &Task) -> ChildLaunch {
        let hub = &self.runtime.hub;
        let resolved = hub.get_contexts_for_task(&task.context_refs);
        let agent_id = format!(
            "{}->{}#{}",
            self.identity.agent_id,
            task.id,
            hub.next_agent_seq()
        );
        let subagent_task = SubagentTask {
            agent_type: task.agent_type,
            title: task.title.clone(),
            description: task.description.clone(),
            max_turns: task.max_turns,
            store_contexts: resolved.contexts,
            bootstrap: self.resolve_bootstrap(task),
        };
        let floor = Duration::from_secs(self.runtime.config.limits.child_budget_floor_secs);
        let child_budget = self.budget.child_budget(floor);
        info!(
            child = %agent_id,
            agent_type = %task.agent_type,
            budget_secs = ?child_budget.limit().map(|limit| limit.as_secs()),
            "launching subagent"
        );

        let outcome = Subagent::new(
            self.runtime,
            AgentIdentity {
                agent_id: agent_id.clone(),
                agent_type: task.agent_type,
                depth: self.identity.depth + 1,
            },
            subagent_task,
            child_budget,
        )
        .run();

        match outcome {
            Ok(report) => {
                let verbose = self.runtime.config.limits.verbose_subagent_results;
                let result = hub.process_subagent_result(&task.id, &report, verbose);
                let run = SubagentRun {
                    task_id: task.id.clone(),
                    agent_type: task.agent_type,
                    title: task.title.clone(),
                    trajectory: report.meta.trajectory.clone(),
                    total_input_tokens: report.meta.total_input_tokens,
                    total_output_tokens: report.meta.total_output_tokens,
                };
                ChildLaunch {
                    result,
                    agent_id,
                    run: Some(run),
                    successful_refs: resolved.successful,
                    missing_refs: resolved.missing,
                }
            }
            Err(err) => {
                warn!(child = %agent_id, err = %err, "subagent failed");
                let mut launch = self.failed_launch(&task.id, &format!("{err:#}"));
                launch.agent_id = agent_id;
                launch.successful_refs = resolved.successful;
                launch.missing_refs = resolved.missing;
                launch
            }
        }
    }

    fn failed_launch(&self, task_id: &str, error: &str) -> ChildLaunch {
        ChildLaunch {
            result: self.runtime.hub.record_launch_failure(task_id, error),
            agent_id: String::new(),
            run: None,
            successful_refs: 0,
            missing_refs: 0,
        }
    }

    fn record_launch(&mut self, launch: ChildLaunch) {
        self.stats.duplicate_contexts += launch.result.duplicate_contexts_count;
        self.stats.successful_context_refs += launch.successful_refs;
        self.stats.missing_context_refs += launch.missing_refs;
        if let Some(run) = launch.run {
            self.stats.subagent_runs.insert(launch.agent_id, run);
        }
    }

    /// Directories are listed, files read up to the configured line limit.
    fn resolve_bootstrap(&self, task: &Task) -> Vec<BootstrapContent> {
        let limit = self.runtime.config.limits.bootstrap_read_limit_lines;
        task.context_bootstrap
            .iter()
            .map(|item| {
                let reply = if item.is_dir() {
                    self.workspace().list_dir(&item.path)
                } else {
                    self.workspace().read_file(&item.path, None, Some(limit))
                };
                if reply.is_error {
                    debug!(path = %item.path, "bootstrap item unavailable");
                }
                BootstrapContent {
                    path: item.path.clone(),
                    reason: item.reason.clone(),
                    content: reply.content,
                }
            })
            .collect()
    }

    fn format_result(&self, result: &SubagentResult, title: &str) -> (String, bool) {
        if let Some(error) = &result.error {
            return (format!("[ERROR] Subagent failed: {error}"), true);
        }
        let mut text = format!("Subagent completed task {} ({title})", result.task_id);
        match &result.contexts {
            Some(contexts) if contexts.is_empty() => text.push_str("\nContexts stored: (none)"),
            Some(contexts) => {
                let _ = write!(text, "\nContexts stored ({}):", contexts.len());
                for context in contexts {
                    let _ = write!(text, "\n  [{}]:\n  {}", context.id, context.content);
                }
            }
            None => {
                let _ = write!(
                    text,
                    "\nContexts stored: {}",
                    result.context_ids_stored.join(", ")
                );
            }
        }
        if result.duplicate_contexts_count > 0 {
            let _ = write!(
                text,
                "\nDuplicate contexts ignored: {}",
                result.duplicate_contexts_count
            );
        }
        if !result.comments.is_empty() {
            let _ = write!(text, "\nComments: {}", result.comments);
        }
        (text, false)
    }
}

fn wrap_reply(category: &str, reply: BackendReply) -> (String, bool) {
    (format_tool_output(category, &reply.content), reply.is_error)
}
