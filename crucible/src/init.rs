//! `crucible init`: create `.crucible/` with default config and a fresh state.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::core::types::PipelineState;
use crate::io::activity_log::{ActivityLog, LogEntry, Logger};
use crate::io::config::{PipelineConfig, write_config};
use crate::io::fsutil::write_atomic;
use crate::io::paths::CruciblePaths;
use crate::io::scaffold::{Scaffolder, scaffold_children};
use crate::io::state_store::save_state;

/// Options for `init_project`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub project: String,
    /// Project spec whose `## ` headings become milestones.
    pub spec: Option<PathBuf>,
    /// Replace an existing state file.
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOutcome {
    pub milestones: Vec<String>,
    pub wrote_config: bool,
}

/// Create the pipeline directory. An existing config is kept as is; an
/// existing state is only replaced with `force`.
pub fn init_project(
    root: &Path,
    options: &InitOptions,
    scaffolder: &dyn Scaffolder,
) -> Result<InitOutcome> {
    if options.project.trim().is_empty() {
        bail!("project name must be non-empty");
    }
    let paths = CruciblePaths::new(root);
    let state_path = paths.state();
    if state_path.exists() && !options.force {
        bail!(
            "{} already exists (use --force to overwrite)",
            state_path.display()
        );
    }

    let config_path = paths.config();
    let wrote_config = !config_path.exists();
    if wrote_config {
        write_config(&config_path, &PipelineConfig::default())?;
    }

    let mut state = PipelineState::new(options.project.trim());
    if let Some(spec_path) = &options.spec {
        let spec = fs::read_to_string(spec_path)
            .with_context(|| format!("read spec {}", spec_path.display()))?;
        write_atomic(&paths.project_spec(), &spec)?;
        let children = scaffold_children(scaffolder, &spec, 'm', |id| paths.milestone_dir(id))
            .with_context(|| format!("scaffold milestones from {}", spec_path.display()))?;
        for child in children {
            state.milestones.entry(child.id).or_default();
        }
    }
    save_state(&state_path, &state)?;

    let milestones: Vec<String> = state.milestones.keys().cloned().collect();
    ActivityLog::new(&paths.activity_log()).log(&LogEntry::new(
        &state.project,
        "init",
        format!("initialized with {} milestones", milestones.len()),
    ));
    info!(project = %state.project, milestones = milestones.len(), "initialized");
    Ok(InitOutcome {
        milestones,
        wrote_config,
    })
}
