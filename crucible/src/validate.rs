//! Validation of the `.crucible/` layout, config, templates and state.

use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::core::resume::{ResumePoint, find_resume_point};
use crate::core::types::Level;
use crate::io::config::load_config;
use crate::io::paths::CruciblePaths;
use crate::io::state_store::load_state;
use crate::io::templates::PromptTemplates;

/// High-level validation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub project: String,
    pub milestones: usize,
    /// `None` when the pipeline is complete.
    pub next: Option<ResumePoint>,
}

/// Validate config, template references, and state (schema plus invariants).
pub fn validate_project(root: &Path) -> Result<ValidateOutcome> {
    let paths = CruciblePaths::new(root);
    if !paths.dir.is_dir() {
        return Err(anyhow!(
            "missing directory {} (run `crucible init`)",
            paths.dir.display()
        ));
    }

    let config = load_config(&paths.config()).context("load config.toml")?;
    let templates_dir = config
        .templates_dir
        .as_deref()
        .map(|dir| paths.templates_dir(dir));
    let templates = PromptTemplates::load(templates_dir.as_deref()).context("load templates")?;
    for level in [
        Level::Milestone,
        Level::Phase,
        Level::Task,
        Level::Implementation,
    ] {
        let names = &config.levels.get(level).templates;
        for name in [&names.draft, &names.challenge, &names.refine, &names.tiebreak] {
            if !templates.has(name) {
                return Err(anyhow!("levels.{level} references unknown template '{name}'"));
            }
        }
    }

    let state = load_state(&paths.state()).context("load state.json")?;
    Ok(ValidateOutcome {
        project: state.project.clone(),
        milestones: state.milestones.len(),
        next: find_resume_point(&state),
    })
}
