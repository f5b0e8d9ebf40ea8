//! Semantic invariants not expressible via JSON Schema.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{PipelineState, TaskStatus, UnitStatus};

static ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z][0-9]{2,}$").unwrap());

/// Check semantic invariants of a pipeline state:
/// - ids are a letter plus two or more digits, one width per map
/// - `current*` pointers reference existing keys
/// - children of a unit not yet `in_progress` are all `pending`
/// - a `completed` unit has only `completed` children
pub fn validate_invariants(state: &PipelineState) -> Vec<String> {
    let mut errors = Vec::new();

    check_ids(&state.milestones, "milestones", &mut errors);
    check_pointer(
        state.current_milestone.as_deref(),
        &state.milestones,
        "currentMilestone",
        &mut errors,
    );

    for (m_id, milestone) in &state.milestones {
        check_ids(&milestone.phases, m_id, &mut errors);
        check_pointer(
            milestone.current_phase.as_deref(),
            &milestone.phases,
            &format!("{m_id}.currentPhase"),
            &mut errors,
        );
        let phase_statuses: Vec<_> = milestone.phases.values().map(|p| p.status).collect();
        check_children(
            m_id,
            milestone.status,
            phase_statuses.iter().map(|s| *s == UnitStatus::Pending),
            phase_statuses.iter().map(|s| *s == UnitStatus::Completed),
            &mut errors,
        );

        for (p_id, phase) in &milestone.phases {
            let path = format!("{m_id}/{p_id}");
            check_ids(&phase.tasks, &path, &mut errors);
            check_pointer(
                phase.current_task.as_deref(),
                &phase.tasks,
                &format!("{path}.currentTask"),
                &mut errors,
            );
            check_children(
                &path,
                phase.status,
                phase.tasks.values().map(|t| t.status == TaskStatus::Pending),
                phase.tasks.values().map(|t| t.status == TaskStatus::Completed),
                &mut errors,
            );
        }
    }

    errors
}

fn check_ids<T>(map: &BTreeMap<String, T>, path: &str, errors: &mut Vec<String>) {
    let mut width = None;
    for id in map.keys() {
        if !ID_RE.is_match(id) {
            errors.push(format!("{path}: invalid id '{id}'"));
            continue;
        }
        match width {
            None => width = Some(id.len()),
            Some(w) if w != id.len() => {
                errors.push(format!("{path}: id '{id}' width differs from siblings"));
            }
            Some(_) => {}
        }
    }
}

fn check_pointer<T>(
    pointer: Option<&str>,
    map: &BTreeMap<String, T>,
    path: &str,
    errors: &mut Vec<String>,
) {
    if let Some(id) = pointer
        && !map.contains_key(id)
    {
        errors.push(format!("{path}: references unknown id '{id}'"));
    }
}

fn check_children(
    path: &str,
    status: UnitStatus,
    mut pending: impl Iterator<Item = bool>,
    mut completed: impl Iterator<Item = bool>,
    errors: &mut Vec<String>,
) {
    let started = matches!(status, UnitStatus::InProgress | UnitStatus::Completed);
    if !started && !pending.all(|p| p) {
        errors.push(format!("{path}: children advanced before parent is in_progress"));
    }
    if status == UnitStatus::Completed && !completed.all(|c| c) {
        errors.push(format!("{path}: completed with incomplete children"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{milestone, phase, pipeline, task};

    #[test]
    fn well_formed_state_has_no_errors() {
        let mut state = pipeline(vec![
            (
                "m01",
                milestone(
                    UnitStatus::Completed,
                    vec![(
                        "p01",
                        phase(
                            UnitStatus::Completed,
                            vec![("t01", task(TaskStatus::Completed))],
                        ),
                    )],
                ),
            ),
            (
                "m02",
                milestone(
                    UnitStatus::InProgress,
                    vec![(
                        "p01",
                        phase(
                            UnitStatus::InProgress,
                            vec![
                                ("t01", task(TaskStatus::Implementing)),
                                ("t02", task(TaskStatus::Pending)),
                            ],
                        ),
                    )],
                ),
            ),
        ]);
        state.current_milestone = Some("m02".to_string());
        assert!(validate_invariants(&state).is_empty());
    }

    #[test]
    fn rejects_malformed_and_mixed_width_ids() {
        let state = pipeline(vec![
            ("m01", milestone(UnitStatus::Pending, vec![])),
            ("m002", milestone(UnitStatus::Pending, vec![])),
            ("First", milestone(UnitStatus::Pending, vec![])),
        ]);
        let errors = validate_invariants(&state);
        assert_eq!(errors.len(), 2, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("invalid id 'First'")));
        assert!(errors.iter().any(|e| e.contains("width")));
    }

    #[test]
    fn rejects_dangling_pointers() {
        let mut state = pipeline(vec![(
            "m01",
            milestone(UnitStatus::InProgress, vec![("p01", phase(UnitStatus::InProgress, vec![]))]),
        )]);
        state.current_milestone = Some("m09".to_string());
        state.phase_mut("m01", "p01").unwrap().current_task = Some("t01".to_string());
        let errors = validate_invariants(&state);
        assert_eq!(errors.len(), 2, "{errors:?}");
        assert!(errors[0].starts_with("currentMilestone"));
        assert!(errors[1].starts_with("m01/p01.currentTask"));
    }

    #[test]
    fn rejects_children_ahead_of_parent() {
        let state = pipeline(vec![(
            "m01",
            milestone(
                UnitStatus::SpecLocked,
                vec![("p01", phase(UnitStatus::Planning, vec![]))],
            ),
        )]);
        let errors = validate_invariants(&state);
        assert_eq!(
            errors,
            vec!["m01: children advanced before parent is in_progress".to_string()]
        );
    }

    #[test]
    fn rejects_completed_parent_with_open_children() {
        let state = pipeline(vec![(
            "m01",
            milestone(
                UnitStatus::InProgress,
                vec![(
                    "p01",
                    phase(
                        UnitStatus::Completed,
                        vec![("t01", task(TaskStatus::PlanLocked))],
                    ),
                )],
            ),
        )]);
        let errors = validate_invariants(&state);
        assert_eq!(
            errors,
            vec!["m01/p01: completed with incomplete children".to_string()]
        );
    }
}
