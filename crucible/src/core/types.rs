//! Hierarchical pipeline state.
//!
//! These types are the single root aggregate persisted to `.crucible/state.json`.
//! Maps are `BTreeMap` so that serialization and every ordered traversal use
//! lexical key order, which stands in for creation order (`m01 < m02`).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Rounds consumed by one planning or implementation cycle at a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationState {
    /// Highest round the cycle has reached.
    pub iteration: u32,
    /// External agent calls issued for this cycle (failed calls included).
    pub total_attempts: u32,
    pub tiebreaker_used: bool,
}

impl IterationState {
    /// Record that round `iteration` was entered. Never decreases.
    pub fn reach(&mut self, iteration: u32) {
        self.iteration = self.iteration.max(iteration);
    }

    pub fn record_attempt(&mut self) {
        self.total_attempts = self.total_attempts.saturating_add(1);
    }

    pub fn mark_tiebreaker(&mut self) {
        self.tiebreaker_used = true;
    }
}

/// Status line shared by milestones and phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    #[default]
    Pending,
    Planning,
    SpecLocked,
    InProgress,
    Completed,
}

impl UnitStatus {
    pub const ALL: [UnitStatus; 5] = [
        UnitStatus::Pending,
        UnitStatus::Planning,
        UnitStatus::SpecLocked,
        UnitStatus::InProgress,
        UnitStatus::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Planning => "planning",
            UnitStatus::SpecLocked => "spec_locked",
            UnitStatus::InProgress => "in_progress",
            UnitStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Planning,
    PlanLocked,
    Implementing,
    Completed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Planning,
        TaskStatus::PlanLocked,
        TaskStatus::Implementing,
        TaskStatus::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Planning => "planning",
            TaskStatus::PlanLocked => "plan_locked",
            TaskStatus::Implementing => "implementing",
            TaskStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskState {
    pub status: TaskStatus,
    pub planning: IterationState,
    pub implementation: IterationState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseState {
    pub status: UnitStatus,
    pub planning: IterationState,
    pub current_task: Option<String>,
    pub tasks: BTreeMap<String, TaskState>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneState {
    pub status: UnitStatus,
    pub planning: IterationState,
    pub current_phase: Option<String>,
    pub phases: BTreeMap<String, PhaseState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    pub project: String,
    pub current_milestone: Option<String>,
    pub milestones: BTreeMap<String, MilestoneState>,
}

impl PipelineState {
    /// Fresh state with no milestones registered.
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            current_milestone: None,
            milestones: BTreeMap::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.milestones
            .values()
            .all(|m| m.status == UnitStatus::Completed)
    }

    pub fn milestone(&self, milestone_id: &str) -> Option<&MilestoneState> {
        self.milestones.get(milestone_id)
    }

    pub fn phase(&self, milestone_id: &str, phase_id: &str) -> Option<&PhaseState> {
        self.milestone(milestone_id)?.phases.get(phase_id)
    }

    pub fn task(&self, milestone_id: &str, phase_id: &str, task_id: &str) -> Option<&TaskState> {
        self.phase(milestone_id, phase_id)?.tasks.get(task_id)
    }

    pub fn milestone_mut(&mut self, milestone_id: &str) -> Option<&mut MilestoneState> {
        self.milestones.get_mut(milestone_id)
    }

    pub fn phase_mut(&mut self, milestone_id: &str, phase_id: &str) -> Option<&mut PhaseState> {
        self.milestone_mut(milestone_id)?.phases.get_mut(phase_id)
    }

    pub fn task_mut(
        &mut self,
        milestone_id: &str,
        phase_id: &str,
        task_id: &str,
    ) -> Option<&mut TaskState> {
        self.phase_mut(milestone_id, phase_id)?.tasks.get_mut(task_id)
    }
}

/// Hierarchy level a cycle runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Milestone,
    Phase,
    Task,
    Implementation,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Milestone => "milestone",
            Level::Phase => "phase",
            Level::Task => "task",
            Level::Implementation => "implementation",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
