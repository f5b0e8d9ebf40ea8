//! Deterministic selection of the next actionable unit.
//!
//! Traversal is depth-first and left-to-right in lexical key order, descending
//! only into units that are `in_progress`.

use std::collections::BTreeMap;
use std::fmt;

use crate::core::types::{PipelineState, TaskStatus, UnitStatus};

/// Next unit of work. The deepest populated id names the unit needing attention.
///
/// - `{milestone}`: milestone-level planning, scaffolding, or completion.
/// - `{milestone, phase}`: phase-level planning, scaffolding, or completion.
/// - `{milestone, phase, task}`: task planning or implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    pub milestone_id: String,
    pub phase_id: Option<String>,
    pub task_id: Option<String>,
}

impl ResumePoint {
    pub fn milestone(milestone_id: &str) -> Self {
        Self {
            milestone_id: milestone_id.to_string(),
            phase_id: None,
            task_id: None,
        }
    }

    pub fn phase(milestone_id: &str, phase_id: &str) -> Self {
        Self {
            phase_id: Some(phase_id.to_string()),
            ..Self::milestone(milestone_id)
        }
    }

    pub fn task(milestone_id: &str, phase_id: &str, task_id: &str) -> Self {
        Self {
            task_id: Some(task_id.to_string()),
            ..Self::phase(milestone_id, phase_id)
        }
    }

    /// `/`-separated id path, e.g. `m01/p02/t03`.
    pub fn path(&self) -> String {
        let mut parts = vec![self.milestone_id.as_str()];
        parts.extend(self.phase_id.as_deref());
        parts.extend(self.task_id.as_deref());
        parts.join("/")
    }
}

impl fmt::Display for ResumePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Find the next actionable unit, or `None` when every milestone is completed.
pub fn find_resume_point(state: &PipelineState) -> Option<ResumePoint> {
    // A stale pointer (unknown or completed milestone) falls back to key order.
    let current = state.current_milestone.as_deref().filter(|id| {
        state
            .milestones
            .get(*id)
            .is_some_and(|m| m.status != UnitStatus::Completed)
    });
    let milestone_id = match current {
        Some(id) => id,
        None => first_incomplete(&state.milestones, |m| m.status == UnitStatus::Completed)?,
    };
    let milestone = &state.milestones[milestone_id];
    if milestone.status != UnitStatus::InProgress {
        return Some(ResumePoint::milestone(milestone_id));
    }

    let Some(phase_id) = first_incomplete(&milestone.phases, |p| p.status == UnitStatus::Completed)
    else {
        return Some(ResumePoint::milestone(milestone_id));
    };
    let phase = &milestone.phases[phase_id];
    if phase.status != UnitStatus::InProgress {
        return Some(ResumePoint::phase(milestone_id, phase_id));
    }

    match first_incomplete(&phase.tasks, |t| t.status == TaskStatus::Completed) {
        Some(task_id) => Some(ResumePoint::task(milestone_id, phase_id, task_id)),
        None => Some(ResumePoint::phase(milestone_id, phase_id)),
    }
}

fn first_incomplete<'a, T>(
    map: &'a BTreeMap<String, T>,
    is_completed: impl Fn(&T) -> bool,
) -> Option<&'a str> {
    map.iter()
        .find(|(_, value)| !is_completed(value))
        .map(|(key, _)| key.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{milestone, phase, pipeline, task};

    #[test]
    fn empty_pipeline_has_no_resume_point() {
        assert_eq!(find_resume_point(&PipelineState::new("demo")), None);
    }

    #[test]
    fn all_completed_returns_none() {
        let state = pipeline(vec![
            ("m01", milestone(UnitStatus::Completed, vec![])),
            ("m02", milestone(UnitStatus::Completed, vec![])),
        ]);
        assert_eq!(find_resume_point(&state), None);
    }

    #[test]
    fn pending_milestone_needs_planning() {
        let state = pipeline(vec![
            ("m02", milestone(UnitStatus::Pending, vec![])),
            ("m01", milestone(UnitStatus::Completed, vec![])),
        ]);
        assert_eq!(find_resume_point(&state), Some(ResumePoint::milestone("m02")));
    }

    #[test]
    fn current_milestone_takes_precedence() {
        let mut state = pipeline(vec![
            ("m01", milestone(UnitStatus::Pending, vec![])),
            ("m02", milestone(UnitStatus::Planning, vec![])),
        ]);
        state.current_milestone = Some("m02".to_string());
        assert_eq!(find_resume_point(&state), Some(ResumePoint::milestone("m02")));
    }

    #[test]
    fn completed_current_milestone_is_ignored() {
        let mut state = pipeline(vec![
            ("m01", milestone(UnitStatus::Completed, vec![])),
            ("m02", milestone(UnitStatus::Pending, vec![])),
        ]);
        state.current_milestone = Some("m01".to_string());
        assert_eq!(find_resume_point(&state), Some(ResumePoint::milestone("m02")));
    }

    #[test]
    fn descends_to_earliest_incomplete_task() {
        let state = pipeline(vec![(
            "m01",
            milestone(
                UnitStatus::InProgress,
                vec![
                    (
                        "p01",
                        phase(
                            UnitStatus::Completed,
                            vec![("t01", task(TaskStatus::Completed))],
                        ),
                    ),
                    (
                        "p02",
                        phase(
                            UnitStatus::InProgress,
                            vec![
                                ("t01", task(TaskStatus::Completed)),
                                ("t03", task(TaskStatus::Pending)),
                                ("t02", task(TaskStatus::Implementing)),
                            ],
                        ),
                    ),
                ],
            ),
        )]);
        assert_eq!(
            find_resume_point(&state),
            Some(ResumePoint::task("m01", "p02", "t02"))
        );
    }

    #[test]
    fn phase_not_in_progress_needs_phase_planning() {
        let state = pipeline(vec![(
            "m01",
            milestone(
                UnitStatus::InProgress,
                vec![("p01", phase(UnitStatus::SpecLocked, vec![]))],
            ),
        )]);
        assert_eq!(
            find_resume_point(&state),
            Some(ResumePoint::phase("m01", "p01"))
        );
    }

    #[test]
    fn in_progress_milestone_without_phases_points_at_milestone() {
        let state = pipeline(vec![("m01", milestone(UnitStatus::InProgress, vec![]))]);
        assert_eq!(find_resume_point(&state), Some(ResumePoint::milestone("m01")));
    }

    #[test]
    fn in_progress_phase_with_all_tasks_done_points_at_phase() {
        let state = pipeline(vec![(
            "m01",
            milestone(
                UnitStatus::InProgress,
                vec![(
                    "p01",
                    phase(
                        UnitStatus::InProgress,
                        vec![("t01", task(TaskStatus::Completed))],
                    ),
                )],
            ),
        )]);
        assert_eq!(
            find_resume_point(&state),
            Some(ResumePoint::phase("m01", "p01"))
        );
    }

    #[test]
    fn resume_point_path_is_slash_joined() {
        assert_eq!(ResumePoint::task("m01", "p02", "t03").path(), "m01/p02/t03");
        assert_eq!(ResumePoint::milestone("m01").to_string(), "m01");
    }
}
