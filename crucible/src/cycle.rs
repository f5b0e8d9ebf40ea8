//! Draft / challenge / refine / tiebreak cycle for one unit of work.
//!
//! The artifact directory is the checkpoint log: every external call has a
//! fixed output file, and a call whose file already exists is never issued
//! again. Rerunning a cycle with the same [`CycleContext`] therefore resumes at
//! the exact step where the previous run stopped.

use std::path::PathBuf;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::core::decision::{Decision, DecisionSchema, parse_decision};
use crate::core::types::{IterationState, Level};
use crate::error;
use crate::io::activity_log::{LogEntry, Logger};
use crate::io::config::LevelConfig;
use crate::io::fsutil::{read_optional, write_atomic};
use crate::io::gateway::{AgentGateway, CallOptions, Role};
use crate::io::templates::{TemplateResolver, TemplateVars};

/// File naming convention for one cycle's artifact directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactNames {
    pub draft_prefix: &'static str,
    pub draft_ext: &'static str,
    pub feedback_prefix: &'static str,
    pub tiebreak: &'static str,
    pub locked: &'static str,
}

impl ArtifactNames {
    pub const SPEC: Self = Self {
        draft_prefix: "spec-v",
        draft_ext: "md",
        feedback_prefix: "feedback-v",
        tiebreak: "tiebreak.md",
        locked: "spec-locked.md",
    };
    pub const PLAN: Self = Self {
        draft_prefix: "plan-v",
        draft_ext: "md",
        feedback_prefix: "feedback-v",
        tiebreak: "tiebreak.md",
        locked: "plan-locked.md",
    };
    pub const IMPLEMENTATION: Self = Self {
        draft_prefix: "impl-v",
        draft_ext: "md",
        feedback_prefix: "review-v",
        tiebreak: "tiebreak.md",
        locked: "impl-locked.md",
    };

    pub fn for_level(level: Level) -> Self {
        match level {
            Level::Milestone | Level::Phase => Self::SPEC,
            Level::Task => Self::PLAN,
            Level::Implementation => Self::IMPLEMENTATION,
        }
    }

    pub fn draft(&self, iteration: u32) -> String {
        format!("{}{iteration}.{}", self.draft_prefix, self.draft_ext)
    }

    pub fn feedback(&self, iteration: u32) -> String {
        format!("{}{iteration}.json", self.feedback_prefix)
    }
}

/// Decision shape the challenger must return at a level.
pub fn decision_schema(level: Level) -> DecisionSchema {
    match level {
        Level::Implementation => DecisionSchema::Review,
        Level::Milestone | Level::Phase | Level::Task => DecisionSchema::Challenge,
    }
}

/// Everything one cycle invocation needs.
#[derive(Debug, Clone)]
pub struct CycleContext<'a> {
    /// Unit path used in logs and errors, e.g. `m01/p02`.
    pub label: String,
    pub level: Level,
    pub level_config: &'a LevelConfig,
    pub artifact_dir: PathBuf,
    /// Base template variables; the engine adds round-specific ones.
    pub template_vars: TemplateVars,
    pub artifact_names: ArtifactNames,
    /// Stop before the first external call instead of issuing it.
    pub dry_run: bool,
}

/// Outcome of a cycle that reached a locked artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleResult {
    pub tiebreaker_used: bool,
    /// Round that produced the artifact; `0` when it was already locked.
    pub iterations: u32,
    pub artifact: String,
}

/// A dry run reached a step that needs an external call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dry run: {label} would call the {role} with template '{template}' ({} byte prompt)", .prompt.len())]
pub struct DryRunHalt {
    pub label: String,
    pub role: Role,
    pub template: String,
    pub prompt: String,
}

/// Cycle engine bound to its collaborators.
pub struct CycleEngine<'a> {
    gateway: &'a dyn AgentGateway,
    templates: &'a dyn TemplateResolver,
    logger: &'a dyn Logger,
}

struct Round {
    iteration: u32,
    draft: String,
    decision: Decision,
}

impl<'a> CycleEngine<'a> {
    pub fn new(
        gateway: &'a dyn AgentGateway,
        templates: &'a dyn TemplateResolver,
        logger: &'a dyn Logger,
    ) -> Self {
        Self {
            gateway,
            templates,
            logger,
        }
    }

    /// Drive the unit to a locked artifact, recording rounds and calls in
    /// `progress`. On error `progress` still reflects every call issued.
    pub fn run_cycle(
        &self,
        ctx: &CycleContext<'_>,
        progress: &mut IterationState,
    ) -> Result<CycleResult> {
        self.run_cycle_with_progress(ctx, progress, |_| Ok(()))
    }

    /// Like [`CycleEngine::run_cycle`], handing every change to `progress`
    /// to `on_progress` before the call it accounts for is issued. A failing
    /// sink aborts the cycle.
    #[instrument(skip_all, fields(label = %ctx.label, level = %ctx.level, dry_run = ctx.dry_run))]
    pub fn run_cycle_with_progress(
        &self,
        ctx: &CycleContext<'_>,
        progress: &mut IterationState,
        mut on_progress: impl FnMut(&IterationState) -> Result<()>,
    ) -> Result<CycleResult> {
        let mut progress = Progress {
            state: progress,
            sink: &mut on_progress,
        };
        let names = &ctx.artifact_names;
        let locked_path = ctx.artifact_dir.join(names.locked);
        if let Some(artifact) = read_optional(&locked_path)? {
            debug!("already locked");
            return Ok(CycleResult {
                tiebreaker_used: false,
                iterations: 0,
                artifact,
            });
        }

        let cfg = ctx.level_config;
        let schema = decision_schema(ctx.level);
        let mut history: Vec<Round> = Vec::new();

        for i in 1..=cfg.max_iterations {
            progress.reach(i)?;

            let draft_path = ctx.artifact_dir.join(names.draft(i));
            let draft = match read_optional(&draft_path)? {
                Some(existing) => {
                    debug!(iteration = i, "reusing draft");
                    existing
                }
                None => {
                    let (template, vars) = match history.last() {
                        None => (&cfg.templates.draft, self.vars(ctx, i)),
                        Some(prev) => {
                            let mut vars = self.vars(ctx, i);
                            vars.insert("previous_iteration".into(), prev.iteration.to_string());
                            vars.insert("draft".into(), prev.draft.clone());
                            vars.insert("feedback".into(), prev.decision.render());
                            (&cfg.templates.refine, vars)
                        }
                    };
                    let prompt = self.prompt(ctx, Role::Creator, template, &vars)?;
                    self.log(ctx, "draft", format!("creator drafting v{i}"), Some(i));
                    progress.record_attempt()?;
                    let text = self
                        .gateway
                        .call(Role::Creator, &prompt, &CallOptions::from_role(&cfg.creator))
                        .with_context(|| format!("{}: draft v{i}", ctx.label))?;
                    write_atomic(&draft_path, &text)?;
                    text
                }
            };

            let feedback_path = ctx.artifact_dir.join(names.feedback(i));
            let decision = match read_optional(&feedback_path)? {
                Some(raw) => parse_decision(&raw, schema)
                    .with_context(|| format!("decode {}", feedback_path.display()))?,
                None => {
                    let mut vars = self.vars(ctx, i);
                    vars.insert("draft".into(), draft.clone());
                    vars.insert("decision_schema".into(), schema.document().trim().to_string());
                    let template = &cfg.templates.challenge;
                    let prompt = self.prompt(ctx, Role::Challenger, template, &vars)?;
                    self.log(ctx, "challenge", format!("challenger reviewing v{i}"), Some(i));
                    progress.record_attempt()?;
                    let decision = self
                        .gateway
                        .call_structured(
                            Role::Challenger,
                            &prompt,
                            &CallOptions::from_role(&cfg.challenger),
                            schema,
                        )
                        .map_err(unwrap_agent_call)
                        .with_context(|| format!("{}: challenge v{i}", ctx.label))?;
                    write_atomic(&feedback_path, &decision.to_json())?;
                    decision
                }
            };
            self.log(ctx, "verdict", format!("v{i}: {}", decision.verdict()), Some(i));

            if decision.is_approved() {
                write_atomic(&locked_path, &draft)?;
                info!(iteration = i, "locked");
                return Ok(CycleResult {
                    tiebreaker_used: false,
                    iterations: i,
                    artifact: draft,
                });
            }
            history.push(Round {
                iteration: i,
                draft,
                decision,
            });
        }

        let artifact = self.tiebreak(ctx, &history, &mut progress)?;
        progress.mark_tiebreaker()?;
        write_atomic(&locked_path, &artifact)?;
        info!(iterations = cfg.max_iterations, "locked by tiebreaker");
        Ok(CycleResult {
            tiebreaker_used: true,
            iterations: cfg.max_iterations,
            artifact,
        })
    }

    fn tiebreak(
        &self,
        ctx: &CycleContext<'_>,
        history: &[Round],
        progress: &mut Progress<'_>,
    ) -> Result<String> {
        let cfg = ctx.level_config;
        let tiebreak_path = ctx.artifact_dir.join(ctx.artifact_names.tiebreak);
        if let Some(existing) = read_optional(&tiebreak_path)? {
            debug!("reusing tiebreak");
            return Ok(existing);
        }

        let mut vars = self.vars(ctx, cfg.max_iterations);
        vars.insert("history".into(), render_history(history));
        if let Some(last) = history.last() {
            vars.insert("draft".into(), last.draft.clone());
            vars.insert("feedback".into(), last.decision.render());
        }
        let template = &cfg.templates.tiebreak;
        let prompt = self.prompt(ctx, Role::Tiebreaker, template, &vars)?;
        self.log(ctx, "tiebreak", "no convergence; tiebreaker deciding", None);
        progress.record_attempt()?;
        let text = self
            .gateway
            .call(Role::Tiebreaker, &prompt, &CallOptions::from_role(&cfg.tiebreaker))
            .with_context(|| format!("{}: tiebreak", ctx.label))?;
        write_atomic(&tiebreak_path, &text)?;
        Ok(text)
    }

    fn vars(&self, ctx: &CycleContext<'_>, iteration: u32) -> TemplateVars {
        let mut vars = ctx.template_vars.clone();
        vars.entry("label".into()).or_insert_with(|| ctx.label.clone());
        vars.entry("level".into())
            .or_insert_with(|| ctx.level.to_string());
        vars.insert("iteration".into(), iteration.to_string());
        vars.insert(
            "max_iterations".into(),
            ctx.level_config.max_iterations.to_string(),
        );
        vars
    }

    /// Render a prompt; in a dry run, stop here instead of letting the caller
    /// issue the call.
    fn prompt(
        &self,
        ctx: &CycleContext<'_>,
        role: Role,
        template: &str,
        vars: &TemplateVars,
    ) -> Result<String> {
        let prompt = self
            .templates
            .render(template, vars)
            .with_context(|| format!("{}: render {role} prompt", ctx.label))?;
        if ctx.dry_run {
            info!(role = %role, template, prompt_bytes = prompt.len(), "dry run halt");
            return Err(DryRunHalt {
                label: ctx.label.clone(),
                role,
                template: template.to_string(),
                prompt,
            }
            .into());
        }
        Ok(prompt)
    }

    fn log(
        &self,
        ctx: &CycleContext<'_>,
        phase: &str,
        message: impl Into<String>,
        attempt: Option<u32>,
    ) {
        let entry = LogEntry::new(&ctx.label, phase, message);
        let entry = match attempt {
            Some(n) => entry.with_attempt(n),
            None => entry,
        };
        self.logger.log(&entry);
    }
}

/// IterationState plus the sink that persists each change to it.
struct Progress<'p> {
    state: &'p mut IterationState,
    sink: &'p mut dyn FnMut(&IterationState) -> Result<()>,
}

impl Progress<'_> {
    fn reach(&mut self, iteration: u32) -> Result<()> {
        if self.state.iteration >= iteration {
            return Ok(());
        }
        self.state.reach(iteration);
        (self.sink)(self.state)
    }

    fn record_attempt(&mut self) -> Result<()> {
        self.state.record_attempt();
        (self.sink)(self.state)
    }

    fn mark_tiebreaker(&mut self) -> Result<()> {
        self.state.mark_tiebreaker();
        (self.sink)(self.state)
    }
}

/// Surface a failed challenger call as the same [`error::AgentCallError`] a failed
/// plain call produces; decoding errors stay typed as [`error::Error`].
fn unwrap_agent_call(err: error::Error) -> anyhow::Error {
    match err {
        error::Error::AgentCall(call) => call.into(),
        other => other.into(),
    }
}

fn render_history(history: &[Round]) -> String {
    let mut buf = String::new();
    for round in history {
        buf.push_str(&format!(
            "### Draft v{n}\n\n{}\n\n### Feedback v{n}\n\n{}\n",
            round.draft.trim(),
            round.decision.render().trim(),
            n = round.iteration
        ));
    }
    buf
}
