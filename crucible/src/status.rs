//! Human-readable hierarchy summary for `crucible status`.

use std::fmt::Write;

use crate::core::resume::find_resume_point;
use crate::core::types::{IterationState, PipelineState};
use crate::io::state_store::Checkpoint;

/// Render the hierarchy, one unit per line, with iteration counters.
pub fn render_status(state: &PipelineState, last: Option<&Checkpoint>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "project: {}", state.project);
    for (m_id, milestone) in &state.milestones {
        let _ = writeln!(
            out,
            "{m_id}  {}{}",
            milestone.status,
            counters(&[("spec", &milestone.planning)])
        );
        for (p_id, phase) in &milestone.phases {
            let _ = writeln!(
                out,
                "  {p_id}  {}{}",
                phase.status,
                counters(&[("spec", &phase.planning)])
            );
            for (t_id, task) in &phase.tasks {
                let _ = writeln!(
                    out,
                    "    {t_id}  {}{}",
                    task.status,
                    counters(&[("plan", &task.planning), ("impl", &task.implementation)])
                );
            }
        }
    }
    match find_resume_point(state) {
        Some(point) => {
            let _ = writeln!(out, "next: {point}");
        }
        None => out.push_str("next: (complete)\n"),
    }
    if let Some(checkpoint) = last {
        let _ = writeln!(
            out,
            "last checkpoint: {} at {}",
            checkpoint.step, checkpoint.saved_at
        );
    }
    out
}

fn counters(parts: &[(&str, &IterationState)]) -> String {
    let shown: Vec<String> = parts
        .iter()
        .filter(|(_, it)| it.total_attempts > 0 || it.iteration > 0)
        .map(|(name, it)| {
            let tiebreak = if it.tiebreaker_used { ", tiebreak" } else { "" };
            format!(
                "{name}: round {}, {} calls{tiebreak}",
                it.iteration, it.total_attempts
            )
        })
        .collect();
    if shown.is_empty() {
        String::new()
    } else {
        format!("  ({})", shown.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{TaskStatus, UnitStatus};
    use crate::test_support::{milestone, phase, pipeline, task};

    #[test]
    fn renders_tree_with_counters_and_next_unit() {
        let mut state = pipeline(vec![(
            "m01",
            milestone(
                UnitStatus::InProgress,
                vec![(
                    "p01",
                    phase(
                        UnitStatus::InProgress,
                        vec![
                            ("t01", task(TaskStatus::Completed)),
                            ("t02", task(TaskStatus::Planning)),
                        ],
                    ),
                )],
            ),
        )]);
        let m = state.milestones.get_mut("m01").unwrap();
        m.planning = IterationState {
            iteration: 3,
            total_attempts: 7,
            tiebreaker_used: true,
        };
        let checkpoint = Checkpoint {
            step: "m01/p01/t02: pending -> planning".to_string(),
            saved_at: "2026-01-02T03:04:05Z".to_string(),
        };

        let rendered = render_status(&state, Some(&checkpoint));

        assert_eq!(
            rendered,
            "project: demo\n\
             m01  in_progress  (spec: round 3, 7 calls, tiebreak)\n\
             \x20 p01  in_progress\n\
             \x20   t01  completed\n\
             \x20   t02  planning\n\
             next: m01/p01/t02\n\
             last checkpoint: m01/p01/t02: pending -> planning at 2026-01-02T03:04:05Z\n"
        );
    }

    #[test]
    fn complete_pipeline_says_so() {
        let state = pipeline(vec![("m01", milestone(UnitStatus::Completed, vec![]))]);
        assert!(render_status(&state, None).ends_with("next: (complete)\n"));
    }
}
