//! Test-only builders and scripted collaborators.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::decision::DecisionSchema;
use crate::core::types::{
    MilestoneState, PhaseState, PipelineState, TaskState, TaskStatus, UnitStatus,
};
use crate::error::{AgentCallError, AgentFailure};
use crate::io::activity_log::{LogEntry, Logger};
use crate::io::gateway::{AgentGateway, CallOptions, Role};
use crate::io::paths::CruciblePaths;
use crate::io::state_store::{load_state, save_state};

/// Pipeline named `demo` with the given milestones and no current pointer.
pub fn pipeline(milestones: Vec<(&str, MilestoneState)>) -> PipelineState {
    let mut state = PipelineState::new("demo");
    for (id, milestone) in milestones {
        state.milestones.insert(id.to_string(), milestone);
    }
    state
}

pub fn milestone(status: UnitStatus, phases: Vec<(&str, PhaseState)>) -> MilestoneState {
    MilestoneState {
        status,
        phases: phases
            .into_iter()
            .map(|(id, p)| (id.to_string(), p))
            .collect(),
        ..MilestoneState::default()
    }
}

pub fn phase(status: UnitStatus, tasks: Vec<(&str, TaskState)>) -> PhaseState {
    PhaseState {
        status,
        tasks: tasks
            .into_iter()
            .map(|(id, t)| (id.to_string(), t))
            .collect(),
        ..PhaseState::default()
    }
}

pub fn task(status: TaskStatus) -> TaskState {
    TaskState {
        status,
        ..TaskState::default()
    }
}

/// Challenge/review reply approving the draft.
pub fn approved(feedback: &str) -> String {
    serde_json::json!({ "verdict": "approved", "feedback": feedback }).to_string()
}

/// Challenge/review reply requesting changes.
pub fn needs_revision(feedback: &str) -> String {
    serde_json::json!({ "verdict": "needs_revision", "feedback": feedback }).to_string()
}

/// One scripted gateway reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail(AgentFailure),
}

/// A call observed by [`ScriptedGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub role: Role,
    pub agent: String,
    pub prompt: String,
    pub schema: Option<DecisionSchema>,
}

/// Gateway that replays a fixed queue of replies and records every call.
///
/// Running out of replies is an `AgentFailure::Spawn`, so an unexpected extra
/// call surfaces as an error instead of hanging.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    replies: RefCell<VecDeque<Reply>>,
    calls: RefCell<Vec<RecordedCall>>,
}

impl ScriptedGateway {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Gateway whose replies are all successful texts.
    pub fn texts<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self::new(replies.into_iter().map(|s| Reply::Text(s.into())).collect())
    }

    pub fn push(&self, reply: Reply) {
        self.replies.borrow_mut().push_back(reply);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.borrow().clone()
    }

    pub fn roles(&self) -> Vec<Role> {
        self.calls.borrow().iter().map(|c| c.role).collect()
    }

    pub fn remaining(&self) -> usize {
        self.replies.borrow().len()
    }
}

impl AgentGateway for ScriptedGateway {
    fn call(&self, role: Role, prompt: &str, options: &CallOptions) -> Result<String, AgentCallError> {
        self.calls.borrow_mut().push(RecordedCall {
            role,
            agent: options.agent.clone(),
            prompt: prompt.to_string(),
            schema: options.schema,
        });
        match self.replies.borrow_mut().pop_front() {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(failure)) => Err(AgentCallError::new(
                role.as_str(),
                &options.agent,
                failure,
            )),
            None => Err(AgentCallError::new(
                role.as_str(),
                &options.agent,
                AgentFailure::Spawn("script exhausted".to_string()),
            )),
        }
    }
}

/// Logger that keeps entries in memory.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    entries: RefCell<Vec<LogEntry>>,
}

impl RecordingLogger {
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.borrow().clone()
    }

    pub fn phases(&self) -> Vec<String> {
        self.entries.borrow().iter().map(|e| e.phase.clone()).collect()
    }
}

impl Logger for RecordingLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries.borrow_mut().push(entry.clone());
    }
}

/// Temporary project root whose `.crucible/state.json` holds a given state.
pub struct TestProject {
    temp: tempfile::TempDir,
}

impl TestProject {
    pub fn new(state: &PipelineState) -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp dir")?;
        let project = Self { temp };
        save_state(&project.paths().state(), state)?;
        Ok(project)
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn paths(&self) -> CruciblePaths {
        CruciblePaths::new(self.root())
    }

    /// Write `contents` to `rel`, relative to `.crucible/`.
    pub fn write(&self, rel: impl AsRef<Path>, contents: &str) -> Result<PathBuf> {
        let path = self.paths().dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// Reload the state from disk.
    pub fn state(&self) -> Result<PipelineState> {
        Ok(load_state(&self.paths().state())?)
    }
}
