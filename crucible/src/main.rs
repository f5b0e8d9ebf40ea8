//! Multi-agent deliberation pipeline CLI.
//!
//! State lives in `.crucible/state.json` under the project root; every command
//! reloads it, so any step can be resumed after the process is killed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crucible::core::resume::find_resume_point;
use crucible::exit_codes;
use crucible::init::{InitOptions, init_project};
use crucible::io::activity_log::ActivityLog;
use crucible::io::config::load_config;
use crucible::io::gateway::CommandGateway;
use crucible::io::paths::CruciblePaths;
use crucible::io::scaffold::HeadingScaffolder;
use crucible::io::state_store::{load_checkpoint, load_state};
use crucible::io::templates::PromptTemplates;
use crucible::looping::{LoopStop, run_loop};
use crucible::orchestrator::{Collaborators, Orchestrator, StepOutcome};
use crucible::status::render_status;
use crucible::validate::validate_project;

#[derive(Parser)]
#[command(
    name = "crucible",
    version,
    about = "Draft, challenge and lock specs and code with cooperating agents"
)]
struct Cli {
    /// Project root containing `.crucible/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.crucible/` with a default config and a fresh state.
    Init {
        /// Project name recorded in the state.
        #[arg(long)]
        project: String,
        /// Project spec whose `## ` headings become milestones.
        #[arg(long)]
        spec: Option<PathBuf>,
        /// Overwrite an existing state.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the next unit of work (exit code 2 when complete).
    Next,
    /// Advance the pipeline until it completes or stops.
    Run {
        /// Apply steps in memory and stop before the first agent call.
        #[arg(long)]
        dry_run: bool,
        /// Stop after this many steps.
        #[arg(long)]
        max_steps: Option<u32>,
    },
    /// Print the hierarchy with statuses and iteration counters.
    Status,
    /// Check config, templates, and state (schema and invariants).
    Validate,
}

fn main() {
    crucible::logging::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::ERROR);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let root = cli.root.as_path();
    match cli.command {
        Command::Init {
            project,
            spec,
            force,
        } => cmd_init(root, project, spec, force),
        Command::Next => cmd_next(root),
        Command::Run { dry_run, max_steps } => cmd_run(root, dry_run, max_steps),
        Command::Status => cmd_status(root),
        Command::Validate => cmd_validate(root),
    }
}

fn cmd_init(root: &Path, project: String, spec: Option<PathBuf>, force: bool) -> Result<i32> {
    let options = InitOptions {
        project,
        spec,
        force,
    };
    let outcome = init_project(root, &options, &HeadingScaffolder)?;
    println!(
        "initialized {} ({} milestones)",
        CruciblePaths::new(root).dir.display(),
        outcome.milestones.len()
    );
    Ok(exit_codes::OK)
}

fn cmd_next(root: &Path) -> Result<i32> {
    let state = load_state(&CruciblePaths::new(root).state()).context("load state.json")?;
    match find_resume_point(&state) {
        Some(point) => {
            println!("{point}");
            Ok(exit_codes::OK)
        }
        None => {
            println!("complete");
            Ok(exit_codes::COMPLETE)
        }
    }
}

fn cmd_run(root: &Path, dry_run: bool, max_steps: Option<u32>) -> Result<i32> {
    let paths = CruciblePaths::new(root);
    let config = load_config(&paths.config()).context("load config.toml")?;
    let mut state = load_state(&paths.state()).context("load state.json")?;

    let templates_dir = config
        .templates_dir
        .as_deref()
        .map(|dir| paths.templates_dir(dir));
    let templates = PromptTemplates::load(templates_dir.as_deref())?;
    let gateway = CommandGateway::new(&config, root, &paths.schemas_dir());
    let logger = ActivityLog::new(&paths.activity_log());
    let orchestrator = Orchestrator::new(
        root,
        &config,
        Collaborators {
            gateway: &gateway,
            templates: &templates,
            scaffolder: &HeadingScaffolder,
            logger: &logger,
        },
    )
    .with_dry_run(dry_run);

    let outcome = run_loop(&orchestrator, &mut state, max_steps, |step| {
        if let StepOutcome::Advanced { unit, action } = step {
            println!("{unit}: {action}");
        }
    })?;
    match outcome.stop {
        LoopStop::Complete => {
            println!("complete after {} steps", outcome.steps_executed);
            Ok(exit_codes::OK)
        }
        LoopStop::StepLimit { max_steps } => {
            println!("stopped after {max_steps} steps");
            Ok(exit_codes::STOPPED)
        }
        LoopStop::DryRun(halt) => {
            println!("{halt}");
            println!("{}", halt.prompt);
            Ok(exit_codes::STOPPED)
        }
    }
}

fn cmd_status(root: &Path) -> Result<i32> {
    let state_path = CruciblePaths::new(root).state();
    let state = load_state(&state_path).context("load state.json")?;
    let checkpoint = load_checkpoint(&state_path)?;
    print!("{}", render_status(&state, checkpoint.as_ref()));
    Ok(exit_codes::OK)
}

fn cmd_validate(root: &Path) -> Result<i32> {
    let outcome = validate_project(root)?;
    let next = outcome
        .next
        .map(|point| point.to_string())
        .unwrap_or_else(|| "complete".to_string());
    println!(
        "ok: {} ({} milestones, next: {next})",
        outcome.project, outcome.milestones
    );
    Ok(exit_codes::OK)
}
