//! Process-wide task registry and context store.
//!
//! One hub is shared by every agent of a run through an `Arc`. Each store sits
//! behind its own `RwLock`; writes are serialized, reads run concurrently.
//! Context entries are immutable once inserted and are never removed.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::core::types::{
    ContextEntry, ContextItem, SubagentReport, SubagentResult, Task, TaskSpec, TaskStatus,
};

/// Context lookup result for a task's references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedContexts {
    pub contexts: Vec<ContextItem>,
    pub successful: usize,
    pub missing: usize,
}

#[derive(Debug, Default)]
struct TaskStore {
    tasks: BTreeMap<String, Task>,
    results: HashMap<String, SubagentResult>,
    next_id: u32,
}

#[derive(Debug, Default)]
struct ContextStore {
    entries: Vec<ContextEntry>,
    index: HashMap<String, usize>,
}

impl ContextStore {
    fn get(&self, id: &str) -> Option<&ContextEntry> {
        self.index.get(id).and_then(|&slot| self.entries.get(slot))
    }

    fn insert(&mut self, entry: ContextEntry) -> bool {
        if self.index.contains_key(&entry.id) {
            return false;
        }
        self.index.insert(entry.id.clone(), self.entries.len());
        self.entries.push(entry);
        true
    }
}

#[derive(Debug, Default)]
pub struct OrchestratorHub {
    tasks: RwLock<TaskStore>,
    contexts: RwLock<ContextStore>,
    agent_seq: AtomicU64,
    duplicate_inserts: AtomicUsize,
}

impl OrchestratorHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task and return its id (`task_001`, `task_002`, ...).
    pub fn create_task(&self, spec: TaskSpec) -> String {
        let mut store = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        store.next_id += 1;
        let id = format!("task_{:03}", store.next_id);
        let task = Task {
            id: id.clone(),
            agent_type: spec.agent_type,
            title: spec.title,
            description: spec.description,
            context_refs: spec.context_refs,
            max_turns: spec.max_turns,
            context_bootstrap: spec.context_bootstrap,
            status: TaskStatus::Pending,
        };
        store.tasks.insert(id.clone(), task);
        tracing::debug!(task_id = %id, "task created");
        id
    }

    pub fn get_task(&self, task_id: &str) -> Option<Task> {
        let store = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        store.tasks.get(task_id).cloned()
    }

    pub fn tasks(&self) -> Vec<Task> {
        let store = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        store.tasks.values().cloned().collect()
    }

    /// Insert a context. Returns false, and counts the attempt, when the id
    /// already exists; the stored entry is left untouched.
    pub fn add_context(
        &self,
        id: &str,
        content: &str,
        reported_by: &str,
        task_id: Option<&str>,
    ) -> bool {
        let mut store = self.contexts.write().unwrap_or_else(PoisonError::into_inner);
        let inserted = store.insert(ContextEntry {
            id: id.to_string(),
            content: content.to_string(),
            reported_by: reported_by.to_string(),
            task_id: task_id.map(str::to_string),
        });
        if !inserted {
            self.duplicate_inserts.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(context_id = id, "duplicate context rejected");
        }
        inserted
    }

    pub fn get_context(&self, id: &str) -> Option<ContextEntry> {
        let store = self.contexts.read().unwrap_or_else(PoisonError::into_inner);
        store.get(id).cloned()
    }

    /// Stored context ids in insertion order.
    pub fn context_ids(&self) -> Vec<String> {
        let store = self.contexts.read().unwrap_or_else(PoisonError::into_inner);
        store.entries.iter().map(|entry| entry.id.clone()).collect()
    }

    /// Number of rejected duplicate inserts since the hub was created.
    pub fn duplicate_inserts(&self) -> usize {
        self.duplicate_inserts.load(Ordering::Relaxed)
    }

    /// Resolve references; unknown ids are counted, never fatal.
    pub fn get_contexts_for_task(&self, refs: &[String]) -> ResolvedContexts {
        let store = self.contexts.read().unwrap_or_else(PoisonError::into_inner);
        let mut resolved = ResolvedContexts::default();
        for id in refs {
            match store.get(id) {
                Some(entry) => {
                    resolved.contexts.push(ContextItem {
                        id: entry.id.clone(),
                        content: entry.content.clone(),
                    });
                    resolved.successful += 1;
                }
                None => resolved.missing += 1,
            }
        }
        resolved
    }

    /// Message describing missing references, or `None` when all resolve.
    pub fn validate_context_refs(&self, refs: &[String]) -> Option<String> {
        let store = self.contexts.read().unwrap_or_else(PoisonError::into_inner);
        let missing: Vec<&str> = refs
            .iter()
            .filter(|id| store.get(id).is_none())
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            return None;
        }
        let available = if store.entries.is_empty() {
            "(none)".to_string()
        } else {
            store
                .entries
                .iter()
                .map(|entry| entry.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        Some(format!(
            "[ERROR] Context references not found in store: {}\n\
             Available contexts: {available}\n\
             Create the missing contexts with add_context or create a new task with valid context_refs.",
            missing.join(", ")
        ))
    }

    /// Store a worker's report and record the task result.
    ///
    /// Every reported context is inserted (duplicates counted, never
    /// overwritten); referenced ids that exist in the store are attached to
    /// the result. The task is marked completed.
    pub fn process_subagent_result(
        &self,
        task_id: &str,
        report: &SubagentReport,
        verbose: bool,
    ) -> SubagentResult {
        let reported_by = self
            .get_task(task_id)
            .map_or_else(|| "subagent".to_string(), |task| task.agent_type.to_string());

        let mut stored = Vec::new();
        let mut duplicates = 0;
        for context in &report.contexts {
            if self.add_context(&context.id, &context.content, &reported_by, Some(task_id)) {
                stored.push(context.id.clone());
            } else {
                duplicates += 1;
            }
        }
        for id in &report.context_refs {
            if !stored.contains(id) && self.get_context(id).is_some() {
                stored.push(id.clone());
            }
        }

        let contexts = verbose.then(|| {
            stored
                .iter()
                .filter_map(|id| self.get_context(id))
                .map(|entry| ContextItem {
                    id: entry.id,
                    content: entry.content,
                })
                .collect()
        });

        let result = SubagentResult {
            task_id: task_id.to_string(),
            error: None,
            context_ids_stored: stored,
            duplicate_contexts_count: duplicates,
            comments: report.comments.clone(),
            contexts,
        };
        self.record_result(task_id, result.clone(), TaskStatus::Completed);
        result
    }

    /// Record a launch that failed before or while running the worker.
    pub fn record_launch_failure(&self, task_id: &str, error: &str) -> SubagentResult {
        let result = SubagentResult::failed(task_id, error);
        self.record_result(task_id, result.clone(), TaskStatus::Failed);
        result
    }

    pub fn task_result(&self, task_id: &str) -> Option<SubagentResult> {
        let store = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        store.results.get(task_id).cloned()
    }

    /// Monotonic sequence used to build unique agent ids.
    pub fn next_agent_seq(&self) -> u64 {
        self.agent_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record_result(&self, task_id: &str, result: SubagentResult, status: TaskStatus) {
        let mut store = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = store.tasks.get_mut(task_id) {
            task.status = status;
        }
        store.results.insert(task_id.to_string(), result);
    }
}
