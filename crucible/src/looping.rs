//! Multi-step driver for `crucible run`.

use anyhow::Result;

use crate::core::types::PipelineState;
use crate::cycle::DryRunHalt;
use crate::orchestrator::{Orchestrator, StepOutcome};

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// Every milestone is completed.
    Complete,
    /// `max_steps` steps were executed without completing the pipeline.
    StepLimit { max_steps: u32 },
    /// A dry run reached its first agent call.
    DryRun(DryRunHalt),
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub steps_executed: u32,
    pub stop: LoopStop,
}

/// Run steps until the pipeline completes, `max_steps` is reached, or a dry
/// run halts.
///
/// Any other error stops the loop immediately; the state on disk is the last
/// checkpoint, so rerunning resumes from there.
pub fn run_loop<F: FnMut(&StepOutcome)>(
    orchestrator: &Orchestrator<'_>,
    state: &mut PipelineState,
    max_steps: Option<u32>,
    mut on_step: F,
) -> Result<LoopOutcome> {
    let mut steps_executed = 0u32;
    loop {
        if let Some(max_steps) = max_steps
            && steps_executed >= max_steps
        {
            let stop = if state.is_complete() {
                LoopStop::Complete
            } else {
                LoopStop::StepLimit { max_steps }
            };
            return Ok(LoopOutcome {
                steps_executed,
                stop,
            });
        }

        match orchestrator.run_step(state) {
            Ok(StepOutcome::Complete) => {
                return Ok(LoopOutcome {
                    steps_executed,
                    stop: LoopStop::Complete,
                });
            }
            Ok(step) => {
                steps_executed += 1;
                on_step(&step);
            }
            Err(err) => {
                if let Some(halt) = err.downcast_ref::<DryRunHalt>() {
                    return Ok(LoopOutcome {
                        steps_executed,
                        stop: LoopStop::DryRun(halt.clone()),
                    });
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::UnitStatus;
    use crate::io::config::PipelineConfig;
    use crate::io::scaffold::HeadingScaffolder;
    use crate::io::templates::PromptTemplates;
    use crate::orchestrator::Collaborators;
    use crate::test_support::{
        RecordingLogger, ScriptedGateway, TestProject, milestone, phase, pipeline,
    };

    fn run(
        state: &mut PipelineState,
        max_steps: Option<u32>,
        dry_run: bool,
    ) -> (Result<LoopOutcome>, Vec<StepOutcome>) {
        let project = TestProject::new(state).expect("project");
        let config = PipelineConfig::default();
        let gateway = ScriptedGateway::default();
        let templates = PromptTemplates::builtin();
        let logger = RecordingLogger::default();
        let orchestrator = Orchestrator::new(
            project.root(),
            &config,
            Collaborators {
                gateway: &gateway,
                templates: &templates,
                scaffolder: &HeadingScaffolder,
                logger: &logger,
            },
        )
        .with_dry_run(dry_run);
        let mut seen = Vec::new();
        let outcome = run_loop(&orchestrator, state, max_steps, |step| seen.push(step.clone()));
        (outcome, seen)
    }

    #[test]
    fn complete_pipeline_stops_without_steps() {
        let mut state = pipeline(vec![("m01", milestone(UnitStatus::Completed, vec![]))]);
        let (outcome, seen) = run(&mut state, None, false);
        assert_eq!(
            outcome.expect("loop"),
            LoopOutcome {
                steps_executed: 0,
                stop: LoopStop::Complete,
            }
        );
        assert!(seen.is_empty());
    }

    #[test]
    fn step_limit_stops_early() {
        let mut state = pipeline(vec![
            ("m01", milestone(UnitStatus::Pending, vec![])),
            ("m02", milestone(UnitStatus::Pending, vec![])),
        ]);
        let (outcome, seen) = run(&mut state, Some(1), false);
        assert_eq!(
            outcome.expect("loop"),
            LoopOutcome {
                steps_executed: 1,
                stop: LoopStop::StepLimit { max_steps: 1 },
            }
        );
        assert_eq!(seen.len(), 1);
        assert_eq!(state.milestones["m01"].status, UnitStatus::Planning);
    }

    #[test]
    fn completing_on_the_last_allowed_step_reports_complete() {
        let mut state = pipeline(vec![(
            "m01",
            milestone(
                UnitStatus::InProgress,
                vec![("p01", phase(UnitStatus::Completed, vec![]))],
            ),
        )]);
        let (outcome, _) = run(&mut state, Some(1), false);
        assert_eq!(outcome.expect("loop").stop, LoopStop::Complete);
    }

    #[test]
    fn dry_run_reports_halt_as_stop() {
        let mut state = pipeline(vec![("m01", milestone(UnitStatus::Pending, vec![]))]);
        let (outcome, seen) = run(&mut state, None, true);
        let outcome = outcome.expect("loop");
        assert_eq!(outcome.steps_executed, 1);
        assert_eq!(seen.len(), 1);
        match outcome.stop {
            LoopStop::DryRun(halt) => assert_eq!(halt.label, "m01"),
            other => panic!("expected dry run stop, got {other:?}"),
        }
    }

    #[test]
    fn agent_failure_propagates() {
        let mut state = pipeline(vec![("m01", milestone(UnitStatus::Planning, vec![]))]);
        let (outcome, seen) = run(&mut state, None, false);
        let err = outcome.expect_err("exhausted script");
        assert!(err.downcast_ref::<crate::error::AgentCallError>().is_some());
        assert!(seen.is_empty());
    }
}
