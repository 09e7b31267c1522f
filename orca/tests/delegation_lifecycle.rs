//! End-to-end delegation scenarios driven by a scripted model.
//!
//! The orchestrator, its subagents and the hub run for real against a
//! temporary workspace; only the model and the shell are faked. Scripted
//! replies are consumed in call order, so each script reads as the
//! conversation it produces.

use std::fs;
use std::time::Duration;

use orca::agents::orchestrator::{Orchestrator, StopReason};
use orca::core::budget::TimeBudget;
use orca::core::types::{AgentType, TaskStatus};
use orca::test_support::{
    FakeExecutor, ScriptedModel, quiet_config, runtime_for, runtime_with_config,
    workspace_with_files,
};

const CREATE_EXPLORER: &str = r#"Let me map the module first.
<task_create>
agent_type: explorer
title: Map the greeting module
description: Find where the greeting is built and report its location.
context_bootstrap:
  - path: src/greet.rs
    reason: module under change
max_turns: 5
auto_launch: true
</task_create>"#;

const EXPLORER_TRIES_WRITE: &str = r#"<write_file>
file_path: src/greet.rs
content: "pub fn greet() {}"
</write_file>
<grep>
pattern: fn greet
</grep>"#;

const EXPLORER_REPORTS: &str = r#"<report>
contexts:
  - id: greet_location
    content: "greet() lives in src/greet.rs and returns a &'static str"
comments: Located the function.
</report>"#;

const CREATE_CODER: &str = r#"<task_create>
agent_type: coder
title: Add farewell
description: Add a farewell() next to greet().
context_refs:
  - greet_location
auto_launch: true
</task_create>"#;

const CODER_WRITES_AND_REPORTS: &str = r#"<write_file>
file_path: src/farewell.rs
content: "pub fn farewell() -> &'static str { \"bye\" }\n"
</write_file>
<report>
contexts:
  - id: farewell_added
    content: src/farewell.rs defines farewell()
context_refs:
  - greet_location
comments: Added the function.
</report>"#;

const FINISH: &str = "<finish>\nmessage: farewell added\n</finish>";

#[test]
fn explorer_then_coder_share_contexts_through_the_hub() {
    let (temp, workspace) =
        workspace_with_files(&[("src/greet.rs", "pub fn greet() -> &'static str { \"hi\" }\n")]);
    let model = ScriptedModel::new([
        CREATE_EXPLORER,
        EXPLORER_TRIES_WRITE,
        EXPLORER_REPORTS,
        CREATE_CODER,
        CODER_WRITES_AND_REPORTS,
        FINISH,
    ]);
    let executor = FakeExecutor::new();
    let runtime = runtime_for(&model, &executor, &workspace);

    let outcome = Orchestrator::new(&runtime, 10, TimeBudget::unbounded())
        .run("Add a farewell function")
        .expect("run");

    assert!(outcome.completed);
    assert_eq!(outcome.finish_message.as_deref(), Some("farewell added"));
    assert_eq!(outcome.turns_executed, 3);
    assert_eq!(outcome.stop_reason, StopReason::Finished);
    assert_eq!(outcome.successful_context_refs, 1);
    assert_eq!(outcome.missing_context_refs, 0);
    assert_eq!(outcome.duplicate_contexts, 0);
    assert_eq!(model.remaining(), 0);

    let runs: Vec<_> = outcome.subagent_runs.values().collect();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().any(|run| run.agent_type == AgentType::Explorer));
    assert!(runs.iter().any(|run| run.agent_type == AgentType::Coder));
    assert!(runs.iter().all(|run| run.total_input_tokens > 0));

    // The explorer saw its bootstrap file and had its write denied.
    let requests = model.requests();
    let explorer_prompt = &requests[1][1].content;
    assert!(explorer_prompt.contains("### src/greet.rs (module under change)"));
    assert!(explorer_prompt.contains("1\tpub fn greet()"));
    let explorer_feedback = &requests[2].last().expect("env response").content;
    assert!(explorer_feedback.contains("[PERMISSION DENIED]"));
    assert!(explorer_feedback.contains("<search_output>"));
    assert_eq!(
        fs::read_to_string(temp.path().join("src/greet.rs")).expect("greet"),
        "pub fn greet() -> &'static str { \"hi\" }\n"
    );

    // The coder received the explorer's context and wrote its file.
    let coder_prompt = &requests[4][1].content;
    assert!(coder_prompt.contains("### Context: greet_location"));
    assert!(coder_prompt.contains("greet() lives in src/greet.rs"));
    assert!(temp.path().join("src/farewell.rs").exists());

    let orchestrator_view = &requests[5].last().expect("launch summary").content;
    assert!(orchestrator_view.contains("Subagent completed task task_002 (Add farewell)"));
    assert!(orchestrator_view.contains("Contexts stored: farewell_added, greet_location"));

    let hub = &runtime.hub;
    let explorer_task = hub.get_task("task_001").expect("explorer task");
    assert_eq!(explorer_task.agent_type, AgentType::Explorer);
    assert_eq!(explorer_task.max_turns, 5);
    assert!(explorer_prompt.contains("maximum of 5 turns"));
    assert_eq!(hub.context_ids(), vec!["greet_location", "farewell_added"]);
    assert_eq!(
        hub.get_context("greet_location").expect("stored").reported_by,
        "explorer"
    );
    assert!(hub.tasks().iter().all(|task| task.status == TaskStatus::Completed));
}

#[test]
fn duplicate_reported_context_keeps_first_value() {
    let (_temp, workspace) = workspace_with_files(&[]);
    let create = |title: &str| {
        format!(
            "<task_create>\nagent_type: explorer\ntitle: {title}\ndescription: look\nauto_launch: true\n</task_create>"
        )
    };
    let report = |content: &str| {
        format!("<report>\ncontexts:\n  - id: layout\n    content: {content}\n</report>")
    };
    let model = ScriptedModel::new([
        create("First look"),
        report("first"),
        create("Second look"),
        report("second"),
        FINISH.to_string(),
    ]);
    let executor = FakeExecutor::new();
    let runtime = runtime_for(&model, &executor, &workspace);

    let outcome = Orchestrator::new(&runtime, 5, TimeBudget::unbounded())
        .run("Look twice")
        .expect("run");

    assert!(outcome.completed);
    assert_eq!(outcome.duplicate_contexts, 1);
    assert_eq!(runtime.hub.get_context("layout").expect("layout").content, "first");
    assert_eq!(runtime.hub.duplicate_inserts(), 1);
}

#[test]
fn short_budget_rejects_launch_without_calling_the_child() {
    let (_temp, workspace) = workspace_with_files(&[]);
    let model = ScriptedModel::new([CREATE_EXPLORER, FINISH]);
    let executor = FakeExecutor::new();
    let runtime = runtime_for(&model, &executor, &workspace);

    let outcome = Orchestrator::new(
        &runtime,
        5,
        TimeBudget::starting_now(Duration::from_secs(10)),
    )
    .run("Explore")
    .expect("run");

    assert!(outcome.completed);
    assert!(outcome.subagent_runs.is_empty());
    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    let feedback = &requests[1].last().expect("env response").content;
    assert!(feedback.contains("Insufficient time to launch subagent"));
    assert_eq!(
        runtime.hub.get_task("task_001").expect("task").status,
        TaskStatus::Pending
    );
}

#[test]
fn worker_stuck_in_parse_errors_is_forced_to_report() {
    let (_temp, workspace) = workspace_with_files(&[]);
    let broken = "<read_file>\npath: [unclosed\n</read_file>";
    let model = ScriptedModel::new([
        CREATE_EXPLORER,
        broken,
        broken,
        broken,
        "I cannot produce a report.",
        FINISH,
    ]);
    let executor = FakeExecutor::new();
    let runtime = runtime_for(&model, &executor, &workspace);

    let outcome = Orchestrator::new(&runtime, 5, TimeBudget::unbounded())
        .run("Explore")
        .expect("run");

    assert!(outcome.completed);
    let run = outcome.subagent_runs.values().next().expect("explorer run");
    assert_eq!(run.agent_type, AgentType::Explorer);
    let result = runtime.hub.task_result("task_001").expect("result");
    assert!(result.comments.contains("3 consecutive parsing errors"));
    assert!(result.context_ids_stored.is_empty());
}

#[test]
fn verbose_results_inline_context_content() {
    let (_temp, workspace) =
        workspace_with_files(&[("src/greet.rs", "pub fn greet() {}\n")]);
    let mut config = quiet_config();
    config.limits.verbose_subagent_results = true;
    let model = ScriptedModel::new([
        CREATE_EXPLORER,
        EXPLORER_REPORTS,
        FINISH,
    ]);
    let executor = FakeExecutor::new();
    let runtime = runtime_with_config(&model, &executor, &workspace, config);

    Orchestrator::new(&runtime, 5, TimeBudget::unbounded())
        .run("Explore")
        .expect("run");

    let requests = model.requests();
    let summary = &requests[2].last().expect("summary").content;
    assert!(summary.contains("Contexts stored (1):"));
    assert!(summary.contains("[greet_location]:"));
    assert!(summary.contains("greet() lives in src/greet.rs"));
}
