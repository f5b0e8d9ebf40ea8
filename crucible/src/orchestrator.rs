//! Single-step orchestration over the milestone/phase/task hierarchy.
//!
//! Each [`Orchestrator::run_step`] call advances the resume point's unit by
//! exactly one status edge (or one scaffolding action) and checkpoints the
//! state immediately, so the process can be killed between any two steps.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{info, instrument};

use crate::core::resume::{ResumePoint, find_resume_point};
use crate::core::state_machine::{transition_milestone, transition_phase, transition_task};
use crate::core::types::{IterationState, Level, PipelineState, TaskStatus, UnitStatus};
use crate::cycle::{ArtifactNames, CycleContext, CycleEngine, CycleResult, DryRunHalt};
use crate::io::activity_log::{LogEntry, Logger};
use crate::io::config::PipelineConfig;
use crate::io::fsutil::read_optional;
use crate::io::gateway::AgentGateway;
use crate::io::paths::CruciblePaths;
use crate::io::scaffold::{Scaffolder, scaffold_children};
use crate::io::state_store::checkpoint;
use crate::io::templates::{TemplateResolver, TemplateVars};

/// External collaborators the orchestrator drives.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub gateway: &'a dyn AgentGateway,
    pub templates: &'a dyn TemplateResolver,
    pub scaffolder: &'a dyn Scaffolder,
    pub logger: &'a dyn Logger,
}

/// Result of one `run_step`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Every milestone is completed; nothing was done.
    Complete,
    /// The unit at `unit` advanced; `action` describes how.
    Advanced { unit: ResumePoint, action: String },
}

/// Which IterationState a cycle records into.
#[derive(Debug, Clone, Copy)]
enum Slot<'p> {
    MilestonePlanning(&'p str),
    PhasePlanning(&'p str, &'p str),
    TaskPlanning(&'p str, &'p str, &'p str),
    TaskImplementation(&'p str, &'p str, &'p str),
}

impl Slot<'_> {
    fn get_mut<'s>(self, state: &'s mut PipelineState) -> Option<&'s mut IterationState> {
        match self {
            Slot::MilestonePlanning(m) => state.milestone_mut(m).map(|ms| &mut ms.planning),
            Slot::PhasePlanning(m, p) => state.phase_mut(m, p).map(|ph| &mut ph.planning),
            Slot::TaskPlanning(m, p, t) => state.task_mut(m, p, t).map(|task| &mut task.planning),
            Slot::TaskImplementation(m, p, t) => {
                state.task_mut(m, p, t).map(|task| &mut task.implementation)
            }
        }
    }
}

/// Milestone or phase: the two levels sharing the spec status line.
#[derive(Debug, Clone, Copy)]
enum Unit<'p> {
    Milestone(&'p str),
    Phase(&'p str, &'p str),
}

impl Unit<'_> {
    fn label(self) -> String {
        match self {
            Unit::Milestone(m) => m.to_string(),
            Unit::Phase(m, p) => format!("{m}/{p}"),
        }
    }

    fn level(self) -> Level {
        match self {
            Unit::Milestone(_) => Level::Milestone,
            Unit::Phase(..) => Level::Phase,
        }
    }

    fn child_prefix(self) -> char {
        match self {
            Unit::Milestone(_) => 'p',
            Unit::Phase(..) => 't',
        }
    }
}

pub struct Orchestrator<'a> {
    paths: CruciblePaths,
    config: &'a PipelineConfig,
    collab: Collaborators<'a>,
    dry_run: bool,
}

impl<'a> Orchestrator<'a> {
    pub fn new(root: &Path, config: &'a PipelineConfig, collab: Collaborators<'a>) -> Self {
        Self {
            paths: CruciblePaths::new(root),
            config,
            collab,
            dry_run: false,
        }
    }

    /// Apply steps in memory only and halt before the first agent call.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn paths(&self) -> &CruciblePaths {
        &self.paths
    }

    /// Advance the unit at the resume point by one step.
    #[instrument(skip_all, fields(dry_run = self.dry_run))]
    pub fn run_step(&self, state: &mut PipelineState) -> Result<StepOutcome> {
        let Some(point) = find_resume_point(state) else {
            return Ok(StepOutcome::Complete);
        };
        let action = match (&point.phase_id, &point.task_id) {
            (Some(p), Some(t)) => self.task_step(state, &point.milestone_id, p, t)?,
            (Some(p), None) => self.unit_step(state, Unit::Phase(&point.milestone_id, p))?,
            _ => self.unit_step(state, Unit::Milestone(&point.milestone_id))?,
        };
        Ok(StepOutcome::Advanced {
            unit: point,
            action,
        })
    }

    fn unit_step(&self, state: &mut PipelineState, unit: Unit<'_>) -> Result<String> {
        let label = unit.label();
        let (status, no_children, children_done) = match unit {
            Unit::Milestone(m) => {
                let ms = state
                    .milestone(m)
                    .ok_or_else(|| anyhow!("unknown milestone {m}"))?;
                (
                    ms.status,
                    ms.phases.is_empty(),
                    ms.phases.values().all(|p| p.status == UnitStatus::Completed),
                )
            }
            Unit::Phase(m, p) => {
                let ph = state
                    .phase(m, p)
                    .ok_or_else(|| anyhow!("unknown phase {m}/{p}"))?;
                (
                    ph.status,
                    ph.tasks.is_empty(),
                    ph.tasks.values().all(|t| t.status == TaskStatus::Completed),
                )
            }
        };

        match status {
            UnitStatus::Pending => {
                self.transition_unit(state, unit, UnitStatus::Planning)?;
                match unit {
                    Unit::Milestone(m) => state.current_milestone = Some(m.to_string()),
                    Unit::Phase(m, p) => {
                        if let Some(ms) = state.milestone_mut(m) {
                            ms.current_phase = Some(p.to_string());
                        }
                    }
                }
                self.commit(state, &label, "pending -> planning".to_string())
            }
            UnitStatus::Planning => {
                let (dir, parent_spec) = match unit {
                    Unit::Milestone(m) => (
                        self.paths.milestone_dir(m),
                        read_optional(&self.paths.project_spec())?,
                    ),
                    Unit::Phase(m, p) => (
                        self.paths.phase_dir(m, p),
                        self.locked_spec(&self.paths.milestone_dir(m))?,
                    ),
                };
                let mut vars = self.base_vars(state, &label, unit.level(), &dir)?;
                let (m, p) = match unit {
                    Unit::Milestone(m) => (m, None),
                    Unit::Phase(m, p) => (m, Some(p)),
                };
                vars.insert("milestone_id".into(), m.to_string());
                if let Some(p) = p {
                    vars.insert("phase_id".into(), p.to_string());
                }
                insert_optional(&mut vars, "parent_spec", parent_spec);

                let ctx = self.cycle_context(&label, unit.level(), dir, vars);
                let slot = match unit {
                    Unit::Milestone(m) => Slot::MilestonePlanning(m),
                    Unit::Phase(m, p) => Slot::PhasePlanning(m, p),
                };
                let result = self.run_cycle(state, &label, slot, &ctx)?;
                self.transition_unit(state, unit, UnitStatus::SpecLocked)?;
                self.commit(
                    state,
                    &label,
                    format!("planning -> spec_locked {}", describe(&result)),
                )
            }
            UnitStatus::SpecLocked => {
                if no_children {
                    self.scaffold(state, unit)?;
                }
                self.transition_unit(state, unit, UnitStatus::InProgress)?;
                self.commit(state, &label, "spec_locked -> in_progress".to_string())
            }
            UnitStatus::InProgress if no_children => {
                let count = self.scaffold(state, unit)?;
                self.commit(state, &label, format!("scaffolded {count} children"))
            }
            UnitStatus::InProgress if children_done => {
                self.transition_unit(state, unit, UnitStatus::Completed)?;
                match unit {
                    Unit::Milestone(_) => state.current_milestone = None,
                    Unit::Phase(m, _) => {
                        if let Some(ms) = state.milestone_mut(m) {
                            ms.current_phase = None;
                        }
                    }
                }
                self.commit(state, &label, "in_progress -> completed".to_string())
            }
            other => bail!("{label}: no action available in status {other}"),
        }
    }

    fn task_step(&self, state: &mut PipelineState, m: &str, p: &str, t: &str) -> Result<String> {
        let label = format!("{m}/{p}/{t}");
        let status = state
            .task(m, p, t)
            .map(|task| task.status)
            .ok_or_else(|| anyhow!("unknown task {label}"))?;
        let task_dir = self.paths.task_dir(m, p, t);

        match status {
            TaskStatus::Pending => {
                transition_task(state, m, p, t, TaskStatus::Planning)?;
                if let Some(phase) = state.phase_mut(m, p) {
                    phase.current_task = Some(t.to_string());
                }
                self.commit(state, &label, "pending -> planning".to_string())
            }
            TaskStatus::Planning => {
                let mut vars = self.task_vars(state, &label, Level::Task, &task_dir, m, p, t)?;
                insert_optional(
                    &mut vars,
                    "parent_spec",
                    self.locked_spec(&self.paths.phase_dir(m, p))?,
                );
                let ctx = self.cycle_context(&label, Level::Task, self.paths.plan_dir(m, p, t), vars);
                let result = self.run_cycle(state, &label, Slot::TaskPlanning(m, p, t), &ctx)?;
                transition_task(state, m, p, t, TaskStatus::PlanLocked)?;
                self.commit(
                    state,
                    &label,
                    format!("planning -> plan_locked {}", describe(&result)),
                )
            }
            TaskStatus::PlanLocked => {
                transition_task(state, m, p, t, TaskStatus::Implementing)?;
                self.commit(state, &label, "plan_locked -> implementing".to_string())
            }
            TaskStatus::Implementing => {
                let mut vars =
                    self.task_vars(state, &label, Level::Implementation, &task_dir, m, p, t)?;
                let plan_path = self.paths.plan_dir(m, p, t).join(ArtifactNames::PLAN.locked);
                let plan = read_optional(&plan_path)?
                    .ok_or_else(|| anyhow!("{label}: missing locked plan {}", plan_path.display()))?;
                vars.insert("plan".into(), plan);
                let ctx = self.cycle_context(
                    &label,
                    Level::Implementation,
                    self.paths.impl_dir(m, p, t),
                    vars,
                );
                let result =
                    self.run_cycle(state, &label, Slot::TaskImplementation(m, p, t), &ctx)?;
                transition_task(state, m, p, t, TaskStatus::Completed)?;
                if let Some(phase) = state.phase_mut(m, p) {
                    phase.current_task = None;
                }
                self.commit(
                    state,
                    &label,
                    format!("implementing -> completed {}", describe(&result)),
                )
            }
            TaskStatus::Completed => bail!("{label}: no action available in status completed"),
        }
    }

    /// Run the unit's cycle, checkpointing each change to its IterationState
    /// before the agent call it precedes. On failure the state is checkpointed
    /// before the error propagates (dry runs write nothing).
    fn run_cycle(
        &self,
        state: &mut PipelineState,
        label: &str,
        slot: Slot<'_>,
        ctx: &CycleContext<'_>,
    ) -> Result<CycleResult> {
        let mut progress = *slot
            .get_mut(state)
            .ok_or_else(|| anyhow!("unknown unit {label}"))?;
        let engine = CycleEngine::new(
            self.collab.gateway,
            self.collab.templates,
            self.collab.logger,
        );
        let result = engine.run_cycle_with_progress(ctx, &mut progress, |it| {
            self.record_progress(state, label, slot, it)
        });
        if let Some(stored) = slot.get_mut(state) {
            *stored = progress;
        }
        match result {
            Ok(result) => Ok(result),
            Err(err) => {
                if !self.dry_run && err.downcast_ref::<DryRunHalt>().is_none() {
                    checkpoint(&self.paths.state(), state, &format!("{label}: cycle failed"))?;
                    self.collab
                        .logger
                        .log(&LogEntry::new(label, "error", format!("{err:#}")));
                }
                Err(err)
            }
        }
    }

    fn record_progress(
        &self,
        state: &mut PipelineState,
        label: &str,
        slot: Slot<'_>,
        progress: &IterationState,
    ) -> Result<()> {
        let stored = slot
            .get_mut(state)
            .ok_or_else(|| anyhow!("unknown unit {label}"))?;
        *stored = *progress;
        if self.dry_run {
            return Ok(());
        }
        let step = format!(
            "{label}: round {}, {} calls",
            progress.iteration, progress.total_attempts
        );
        checkpoint(&self.paths.state(), state, &step)
            .with_context(|| format!("checkpoint progress of {label}"))?;
        Ok(())
    }

    fn transition_unit(&self, state: &mut PipelineState, unit: Unit<'_>, to: UnitStatus) -> Result<()> {
        match unit {
            Unit::Milestone(m) => transition_milestone(state, m, to)?,
            Unit::Phase(m, p) => transition_phase(state, m, p, to)?,
        };
        Ok(())
    }

    /// Register child units parsed from the unit's locked spec.
    fn scaffold(&self, state: &mut PipelineState, unit: Unit<'_>) -> Result<usize> {
        let label = unit.label();
        let dir = match unit {
            Unit::Milestone(m) => self.paths.milestone_dir(m),
            Unit::Phase(m, p) => self.paths.phase_dir(m, p),
        };
        let locked = self
            .locked_spec(&dir)?
            .ok_or_else(|| anyhow!("{label}: no locked spec to scaffold from"))?;
        let child_dir = |id: &str| match unit {
            Unit::Milestone(m) => self.paths.phase_dir(m, id),
            Unit::Phase(m, p) => self.paths.task_dir(m, p, id),
        };
        let children = if self.dry_run {
            self.collab.scaffolder.extract(&locked, unit.child_prefix())?
        } else {
            scaffold_children(self.collab.scaffolder, &locked, unit.child_prefix(), child_dir)?
        };
        let children = children.into_iter().map(|c| c.id);
        match unit {
            Unit::Milestone(m) => {
                let ms = state
                    .milestone_mut(m)
                    .ok_or_else(|| anyhow!("unknown milestone {m}"))?;
                for id in children {
                    ms.phases.entry(id).or_default();
                }
                Ok(ms.phases.len())
            }
            Unit::Phase(m, p) => {
                let ph = state
                    .phase_mut(m, p)
                    .ok_or_else(|| anyhow!("unknown phase {m}/{p}"))?;
                for id in children {
                    ph.tasks.entry(id).or_default();
                }
                Ok(ph.tasks.len())
            }
        }
    }

    fn commit(&self, state: &PipelineState, label: &str, action: String) -> Result<String> {
        if !self.dry_run {
            checkpoint(&self.paths.state(), state, &format!("{label}: {action}"))
                .with_context(|| format!("checkpoint after {label}"))?;
            self.collab
                .logger
                .log(&LogEntry::new(label, "transition", action.clone()));
        }
        info!(unit = label, action = %action, "step");
        Ok(action)
    }

    fn cycle_context(
        &self,
        label: &str,
        level: Level,
        artifact_dir: PathBuf,
        template_vars: TemplateVars,
    ) -> CycleContext<'a> {
        CycleContext {
            label: label.to_string(),
            level,
            level_config: self.config.levels.get(level),
            artifact_dir,
            template_vars,
            artifact_names: ArtifactNames::for_level(level),
            dry_run: self.dry_run,
        }
    }

    fn base_vars(
        &self,
        state: &PipelineState,
        label: &str,
        level: Level,
        unit_dir: &Path,
    ) -> Result<TemplateVars> {
        let brief = read_optional(&unit_dir.join("brief.md"))?.unwrap_or_default();
        Ok(TemplateVars::from([
            ("project".to_string(), state.project.clone()),
            ("label".to_string(), label.to_string()),
            ("level".to_string(), level.to_string()),
            ("brief".to_string(), brief),
        ]))
    }

    #[allow(clippy::too_many_arguments)]
    fn task_vars(
        &self,
        state: &PipelineState,
        label: &str,
        level: Level,
        task_dir: &Path,
        m: &str,
        p: &str,
        t: &str,
    ) -> Result<TemplateVars> {
        let mut vars = self.base_vars(state, label, level, task_dir)?;
        vars.insert("milestone_id".into(), m.to_string());
        vars.insert("phase_id".into(), p.to_string());
        vars.insert("task_id".into(), t.to_string());
        Ok(vars)
    }

    fn locked_spec(&self, dir: &Path) -> Result<Option<String>> {
        Ok(read_optional(&dir.join(ArtifactNames::SPEC.locked))?)
    }
}

fn insert_optional(vars: &mut TemplateVars, key: &str, value: Option<String>) {
    if let Some(value) = value {
        vars.insert(key.to_string(), value);
    }
}

fn describe(result: &CycleResult) -> String {
    match (result.iterations, result.tiebreaker_used) {
        (0, _) => "(already locked)".to_string(),
        (n, true) => format!("(tiebreak after {n} rounds)"),
        (1, false) => "(approved in 1 round)".to_string(),
        (n, false) => format!("(approved in {n} rounds)"),
    }
}
