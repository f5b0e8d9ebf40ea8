//! Typed error taxonomy for the pipeline core.
//!
//! Pure modules (`core`) and the state store return [`Result`]. Orchestration
//! layers wrap these in `anyhow::Error` with context; callers that need to
//! branch on the kind use `downcast_ref::<Error>()` or
//! `downcast_ref::<AgentCallError>()`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Attempted status edge outside the allowed set for the entity's level.
    #[error("invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("unknown entity {0}")]
    UnknownEntity(String),

    /// Agent output failed decoding against a named decision schema.
    #[error("{schema} validation failed: {}", .messages.join("; "))]
    SchemaValidation {
        schema: String,
        messages: Vec<String>,
    },

    #[error(transparent)]
    AgentCall(#[from] AgentCallError),

    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// State file parsed but violates the schema or semantic invariants.
    #[error("corrupt state {}: {}", .path.display(), .messages.join("; "))]
    CorruptState {
        path: PathBuf,
        messages: Vec<String>,
    },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn schema(schema: impl Into<String>, messages: Vec<String>) -> Self {
        Self::SchemaValidation {
            schema: schema.into(),
            messages,
        }
    }
}

/// How an external agent call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentFailure {
    /// The call exceeded its deadline and the process was killed.
    Timeout(Duration),
    /// The process exited unsuccessfully.
    ProcessFailed { code: Option<i32>, stderr: String },
    /// The process could not be started.
    Spawn(String),
    /// The process succeeded but produced no output.
    EmptyOutput,
}

/// External agent call failure. Nothing is written when this is returned.
#[derive(Debug, Clone, Error)]
#[error("agent call failed ({role} via {agent}): {}", describe(.failure))]
pub struct AgentCallError {
    pub role: String,
    pub agent: String,
    pub failure: AgentFailure,
}

impl AgentCallError {
    pub fn new(role: impl Into<String>, agent: impl Into<String>, failure: AgentFailure) -> Self {
        Self {
            role: role.into(),
            agent: agent.into(),
            failure,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.failure, AgentFailure::Timeout(_))
    }
}

fn describe(failure: &AgentFailure) -> String {
    match failure {
        AgentFailure::Timeout(after) => format!("timed out after {}s", after.as_secs()),
        AgentFailure::ProcessFailed { code, stderr } => {
            let stderr = stderr.trim();
            if stderr.is_empty() {
                format!("exited with status {code:?}")
            } else {
                format!("exited with status {code:?}: {stderr}")
            }
        }
        AgentFailure::Spawn(reason) => format!("spawn failed: {reason}"),
        AgentFailure::EmptyOutput => "empty output".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_message_names_entity_and_edge() {
        let err = Error::InvalidTransition {
            entity: "m01/p02".to_string(),
            from: "pending".to_string(),
            to: "completed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid transition for m01/p02: pending -> completed"
        );
    }

    #[test]
    fn agent_timeout_is_distinguishable() {
        let err = AgentCallError::new(
            "creator",
            "codex",
            AgentFailure::Timeout(Duration::from_secs(1200)),
        );
        assert!(err.is_timeout());
        assert!(err.to_string().contains("timed out after 1200s"));
    }
}
