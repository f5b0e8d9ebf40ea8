//! Loop-level tests driving a project from `init` to completion.
//!
//! A scripted gateway stands in for the agents; every other collaborator is
//! the real one, so state, checkpoints and artifacts land on disk.

use std::fs;
use std::path::Path;

use crucible::core::types::{PipelineState, TaskStatus, UnitStatus};
use crucible::init::{InitOptions, init_project};
use crucible::io::config::PipelineConfig;
use crucible::io::gateway::Role;
use crucible::io::paths::CruciblePaths;
use crucible::io::scaffold::HeadingScaffolder;
use crucible::io::state_store::{load_checkpoint, load_state};
use crucible::io::templates::PromptTemplates;
use crucible::looping::{LoopOutcome, LoopStop, run_loop};
use crucible::orchestrator::{Collaborators, Orchestrator};
use crucible::test_support::{RecordingLogger, ScriptedGateway, approved, needs_revision};

const PROJECT_SPEC: &str = "# Calculator\n\n## Core\n\nEvaluate arithmetic.\n";
const MILESTONE_SPEC: &str =
    "# Core\n\n## Parsing\n\nTurn text into a tree.\n\n## Evaluation\n\nWalk the tree.\n";
const PARSING_SPEC: &str =
    "# Parsing\n\n## Tokenizer\n\nSplit input.\n\n## Parser\n\nBuild the tree.\n";
const EVALUATION_SPEC: &str = "# Evaluation\n\n## Interpreter\n\nFold the tree.\n";

fn init(root: &Path) -> PipelineState {
    let spec = root.join("SPEC.md");
    fs::write(&spec, PROJECT_SPEC).expect("write spec");
    let options = InitOptions {
        project: "calc".to_string(),
        spec: Some(spec),
        force: false,
    };
    init_project(root, &options, &HeadingScaffolder).expect("init");
    load_state(&CruciblePaths::new(root).state()).expect("state")
}

fn run(
    root: &Path,
    state: &mut PipelineState,
    gateway: &ScriptedGateway,
    logger: &RecordingLogger,
) -> anyhow::Result<LoopOutcome> {
    let config = PipelineConfig::default();
    let templates = PromptTemplates::builtin();
    let orchestrator = Orchestrator::new(
        root,
        &config,
        Collaborators {
            gateway,
            templates: &templates,
            scaffolder: &HeadingScaffolder,
            logger,
        },
    );
    run_loop(&orchestrator, state, None, |_| {})
}

/// Full lifecycle: one milestone, two phases, three tasks.
///
/// Calls, in order (each pair is creator then challenger):
/// 1. m01 spec
/// 2. m01/p01 spec
/// 3. m01/p01/t01 plan (needs revision, then approved), implementation
/// 4. m01/p01/t02 plan, implementation
/// 5. m01/p02 spec
/// 6. m01/p02/t01 plan, implementation
#[test]
fn pipeline_runs_to_completion() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    let mut state = init(root);
    assert_eq!(state.milestones.keys().collect::<Vec<_>>(), vec!["m01"]);

    let gateway = ScriptedGateway::texts([
        MILESTONE_SPEC.to_string(),
        approved("clear"),
        PARSING_SPEC.to_string(),
        approved("clear"),
        "1. write lexer\n".to_string(),
        needs_revision("say how it is tested"),
        "1. write lexer\n2. unit tests\n".to_string(),
        approved("ok"),
        "Implemented src/lexer.rs\n".to_string(),
        approved("looks right"),
        "1. recursive descent\n".to_string(),
        approved("ok"),
        "Implemented src/parser.rs\n".to_string(),
        approved("ok"),
        EVALUATION_SPEC.to_string(),
        approved("clear"),
        "1. fold nodes\n".to_string(),
        approved("ok"),
        "Implemented src/eval.rs\n".to_string(),
        approved("ok"),
    ]);
    let logger = RecordingLogger::default();

    let outcome = run(root, &mut state, &gateway, &logger).expect("loop");

    // 3 steps per spec-planned unit, 4 per task, 1 per completion.
    assert_eq!(
        outcome,
        LoopOutcome {
            steps_executed: 3 * 3 + 3 * 4 + 3,
            stop: LoopStop::Complete,
        }
    );
    assert_eq!(gateway.remaining(), 0);
    let roles = gateway.roles();
    assert_eq!(roles.len(), 20);
    assert!(roles.chunks(2).all(|pair| pair == [Role::Creator, Role::Challenger]));

    let paths = CruciblePaths::new(root);
    let on_disk = load_state(&paths.state()).expect("reload");
    assert_eq!(on_disk, state);
    assert!(on_disk.is_complete());
    assert_eq!(on_disk.current_milestone, None);
    let phases: Vec<&str> = on_disk.milestones["m01"].phases.keys().map(String::as_str).collect();
    assert_eq!(phases, vec!["p01", "p02"]);
    let task = on_disk.task("m01", "p01", "t01").expect("task");
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.planning.iteration, 2);
    assert_eq!(task.planning.total_attempts, 4);
    assert_eq!(task.implementation.total_attempts, 2);
    assert_eq!(
        on_disk.phase("m01", "p02").map(|p| p.status),
        Some(UnitStatus::Completed)
    );
    assert_eq!(
        on_disk.task("m01", "p02", "t01").map(|t| t.status),
        Some(TaskStatus::Completed)
    );

    let plan = fs::read_to_string(paths.plan_dir("m01", "p01", "t01").join("plan-locked.md"))
        .expect("locked plan");
    assert_eq!(plan, "1. write lexer\n2. unit tests\n");
    assert!(
        paths
            .impl_dir("m01", "p02", "t01")
            .join("impl-locked.md")
            .is_file()
    );
    let implement_prompt = &gateway.calls()[8].prompt;
    assert!(implement_prompt.contains("2. unit tests"));
    let evaluation_plan_prompt = &gateway.calls()[16].prompt;
    assert!(evaluation_plan_prompt.contains("Fold the tree."));

    let marker = load_checkpoint(&paths.state())
        .expect("checkpoint")
        .expect("marker");
    assert_eq!(marker.step, "m01: in_progress -> completed");
}

/// A failing call stops the loop; the rerun reuses every artifact already on
/// disk and only issues the calls that were still missing.
#[test]
fn rerun_after_failure_resumes_without_repeating_calls() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    let mut state = init(root);
    let logger = RecordingLogger::default();

    // The draft succeeds; the challenge finds the script exhausted.
    let first = ScriptedGateway::texts([MILESTONE_SPEC]);
    run(root, &mut state, &first, &logger).expect_err("challenge should fail");
    assert_eq!(first.roles(), vec![Role::Creator, Role::Challenger]);

    let paths = CruciblePaths::new(root);
    let mut reloaded = load_state(&paths.state()).expect("reload");
    let planning = reloaded.milestones["m01"].planning;
    assert_eq!(reloaded.milestones["m01"].status, UnitStatus::Planning);
    assert_eq!(planning.iteration, 1);
    assert_eq!(planning.total_attempts, 2);
    assert!(paths.milestone_dir("m01").join("spec-v1.md").is_file());

    let second = ScriptedGateway::texts([approved("fine")]);
    let err = run(root, &mut reloaded, &second, &logger).expect_err("stops at phase draft");
    assert!(format!("{err:#}").contains("m01/p01: draft v1"));

    assert_eq!(second.roles(), vec![Role::Challenger, Role::Creator]);
    let after = load_state(&paths.state()).expect("reload");
    assert_eq!(after.milestones["m01"].status, UnitStatus::InProgress);
    assert_eq!(after.milestones["m01"].planning.total_attempts, 3);
    let locked = fs::read_to_string(paths.milestone_dir("m01").join("spec-locked.md"))
        .expect("locked spec");
    assert_eq!(locked, MILESTONE_SPEC);
}
