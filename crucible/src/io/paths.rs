//! Filesystem layout under `.crucible/`.

use std::path::{Path, PathBuf};

use crate::core::resume::ResumePoint;

/// Resolved paths for one project root.
#[derive(Debug, Clone)]
pub struct CruciblePaths {
    pub root: PathBuf,
    pub dir: PathBuf,
}

impl CruciblePaths {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            dir: root.join(".crucible"),
        }
    }

    pub fn state(&self) -> PathBuf {
        self.dir.join("state.json")
    }

    pub fn config(&self) -> PathBuf {
        self.dir.join("config.toml")
    }

    pub fn activity_log(&self) -> PathBuf {
        self.dir.join("activity.jsonl")
    }

    /// Copy of the project spec the milestones were scaffolded from.
    pub fn project_spec(&self) -> PathBuf {
        self.dir.join("PROJECT.md")
    }

    pub fn schemas_dir(&self) -> PathBuf {
        self.dir.join("schemas")
    }

    /// Templates override directory; relative config values resolve against `.crucible/`.
    pub fn templates_dir(&self, configured: &Path) -> PathBuf {
        self.dir.join(configured)
    }

    pub fn pipeline_dir(&self) -> PathBuf {
        self.dir.join("pipeline")
    }

    pub fn milestone_dir(&self, milestone_id: &str) -> PathBuf {
        self.pipeline_dir().join("milestones").join(milestone_id)
    }

    pub fn phase_dir(&self, milestone_id: &str, phase_id: &str) -> PathBuf {
        self.milestone_dir(milestone_id)
            .join("phases")
            .join(phase_id)
    }

    pub fn task_dir(&self, milestone_id: &str, phase_id: &str, task_id: &str) -> PathBuf {
        self.phase_dir(milestone_id, phase_id)
            .join("tasks")
            .join(task_id)
    }

    pub fn plan_dir(&self, milestone_id: &str, phase_id: &str, task_id: &str) -> PathBuf {
        self.task_dir(milestone_id, phase_id, task_id).join("plan")
    }

    pub fn impl_dir(&self, milestone_id: &str, phase_id: &str, task_id: &str) -> PathBuf {
        self.task_dir(milestone_id, phase_id, task_id).join("impl")
    }

    /// Directory holding the unit's `brief.md`.
    pub fn unit_dir(&self, point: &ResumePoint) -> PathBuf {
        match (&point.phase_id, &point.task_id) {
            (Some(p), Some(t)) => self.task_dir(&point.milestone_id, p, t),
            (Some(p), None) => self.phase_dir(&point.milestone_id, p),
            _ => self.milestone_dir(&point.milestone_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_nests_under_pipeline_dir() {
        let paths = CruciblePaths::new(Path::new("/proj"));
        assert_eq!(paths.state(), Path::new("/proj/.crucible/state.json"));
        assert_eq!(
            paths.plan_dir("m01", "p02", "t03"),
            Path::new("/proj/.crucible/pipeline/milestones/m01/phases/p02/tasks/t03/plan")
        );
        assert_eq!(
            paths.unit_dir(&ResumePoint::phase("m01", "p02")),
            Path::new("/proj/.crucible/pipeline/milestones/m01/phases/p02")
        );
    }
}
