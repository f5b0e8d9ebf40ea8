//! One-way status transitions for every hierarchy level.
//!
//! Each level's status line is a strict total order and the only legal edge is
//! to the immediate successor. Validation happens before any write, so a
//! rejected transition leaves the state untouched.

use crate::core::types::{PipelineState, TaskStatus, UnitStatus};
use crate::error::{Error, Result};

/// Immediate successor on the milestone/phase status line.
pub fn next_unit_status(current: UnitStatus) -> Option<UnitStatus> {
    match current {
        UnitStatus::Pending => Some(UnitStatus::Planning),
        UnitStatus::Planning => Some(UnitStatus::SpecLocked),
        UnitStatus::SpecLocked => Some(UnitStatus::InProgress),
        UnitStatus::InProgress => Some(UnitStatus::Completed),
        UnitStatus::Completed => None,
    }
}

/// Immediate successor on the task status line.
pub fn next_task_status(current: TaskStatus) -> Option<TaskStatus> {
    match current {
        TaskStatus::Pending => Some(TaskStatus::Planning),
        TaskStatus::Planning => Some(TaskStatus::PlanLocked),
        TaskStatus::PlanLocked => Some(TaskStatus::Implementing),
        TaskStatus::Implementing => Some(TaskStatus::Completed),
        TaskStatus::Completed => None,
    }
}

pub fn can_transition_unit(from: UnitStatus, to: UnitStatus) -> bool {
    next_unit_status(from) == Some(to)
}

pub fn can_transition_task(from: TaskStatus, to: TaskStatus) -> bool {
    next_task_status(from) == Some(to)
}

pub fn transition_milestone<'a>(
    state: &'a mut PipelineState,
    milestone_id: &str,
    to: UnitStatus,
) -> Result<&'a mut PipelineState> {
    let entity = milestone_id.to_string();
    let milestone = state
        .milestone_mut(milestone_id)
        .ok_or_else(|| Error::UnknownEntity(entity.clone()))?;
    check_unit_edge(&entity, milestone.status, to)?;
    milestone.status = to;
    Ok(state)
}

pub fn transition_phase<'a>(
    state: &'a mut PipelineState,
    milestone_id: &str,
    phase_id: &str,
    to: UnitStatus,
) -> Result<&'a mut PipelineState> {
    let entity = format!("{milestone_id}/{phase_id}");
    let phase = state
        .phase_mut(milestone_id, phase_id)
        .ok_or_else(|| Error::UnknownEntity(entity.clone()))?;
    check_unit_edge(&entity, phase.status, to)?;
    phase.status = to;
    Ok(state)
}

pub fn transition_task<'a>(
    state: &'a mut PipelineState,
    milestone_id: &str,
    phase_id: &str,
    task_id: &str,
    to: TaskStatus,
) -> Result<&'a mut PipelineState> {
    let entity = format!("{milestone_id}/{phase_id}/{task_id}");
    let task = state
        .task_mut(milestone_id, phase_id, task_id)
        .ok_or_else(|| Error::UnknownEntity(entity.clone()))?;
    if !can_transition_task(task.status, to) {
        return Err(Error::InvalidTransition {
            entity,
            from: task.status.to_string(),
            to: to.to_string(),
        });
    }
    task.status = to;
    Ok(state)
}

fn check_unit_edge(entity: &str, from: UnitStatus, to: UnitStatus) -> Result<()> {
    if can_transition_unit(from, to) {
        return Ok(());
    }
    Err(Error::InvalidTransition {
        entity: entity.to_string(),
        from: from.to_string(),
        to: to.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{milestone, phase, pipeline, task};

    fn sample() -> PipelineState {
        pipeline(vec![(
            "m01",
            milestone(
                UnitStatus::InProgress,
                vec![(
                    "p01",
                    phase(
                        UnitStatus::InProgress,
                        vec![("t01", task(TaskStatus::Pending))],
                    ),
                )],
            ),
        )])
    }

    #[test]
    fn unit_status_line_is_strictly_linear() {
        let mut status = UnitStatus::Pending;
        let mut walked = vec![status];
        while let Some(next) = next_unit_status(status) {
            status = next;
            walked.push(status);
        }
        assert_eq!(walked, UnitStatus::ALL.to_vec());
    }

    /// Every pair outside the successor edge is rejected and leaves status unchanged.
    #[test]
    fn milestone_and_phase_transitions_are_total() {
        for from in UnitStatus::ALL {
            for to in UnitStatus::ALL {
                let mut state = sample();
                state.milestones.get_mut("m01").unwrap().status = from;
                state.phase_mut("m01", "p01").unwrap().status = from;
                let allowed = next_unit_status(from) == Some(to);

                let milestone_result = transition_milestone(&mut state, "m01", to).map(|_| ());
                let phase_result = transition_phase(&mut state, "m01", "p01", to).map(|_| ());
                assert_eq!(milestone_result.is_ok(), allowed, "{from} -> {to}");
                assert_eq!(phase_result.is_ok(), allowed, "{from} -> {to}");

                let expected = if allowed { to } else { from };
                assert_eq!(state.milestones["m01"].status, expected);
                assert_eq!(state.phase("m01", "p01").unwrap().status, expected);
                if !allowed {
                    assert!(matches!(
                        milestone_result,
                        Err(Error::InvalidTransition { .. })
                    ));
                }
            }
        }
    }

    #[test]
    fn task_transitions_are_total() {
        for from in TaskStatus::ALL {
            for to in TaskStatus::ALL {
                let mut state = sample();
                state.task_mut("m01", "p01", "t01").unwrap().status = from;
                let before = state.clone();
                let allowed = next_task_status(from) == Some(to);

                let result = transition_task(&mut state, "m01", "p01", "t01", to).map(|_| ());
                assert_eq!(result.is_ok(), allowed, "{from} -> {to}");
                if allowed {
                    assert_eq!(state.task("m01", "p01", "t01").unwrap().status, to);
                } else {
                    assert_eq!(state, before);
                }
            }
        }
    }

    #[test]
    fn rejected_edge_names_entity_path() {
        let mut state = sample();
        let err = transition_task(&mut state, "m01", "p01", "t01", TaskStatus::Completed)
            .map(|_| ())
            .expect_err("skip should fail");
        assert_eq!(
            err.to_string(),
            "invalid transition for m01/p01/t01: pending -> completed"
        );
    }

    #[test]
    fn unknown_entity_is_reported() {
        let mut state = sample();
        let err = transition_phase(&mut state, "m01", "p09", UnitStatus::Planning)
            .map(|_| ())
            .expect_err("missing phase");
        assert!(matches!(err, Error::UnknownEntity(ref path) if path == "m01/p09"));
    }
}
