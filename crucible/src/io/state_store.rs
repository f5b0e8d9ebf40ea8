//! Durable storage for the pipeline state (`.crucible/state.json`).
//!
//! Loading never falls back to a default: a missing file is an `Io` error and a
//! file that fails the schema or the semantic invariants is `CorruptState`.
//! Creating a fresh state is the caller's decision (`crucible init`).

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{SecondsFormat, Utc};
use jsonschema::{Draft, Validator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::invariants::validate_invariants;
use crate::core::types::PipelineState;
use crate::error::{Error, Result};
use crate::io::fsutil::{read_optional, write_atomic};

const STATE_SCHEMA: &str = include_str!("../../schemas/pipeline-state.schema.json");

static STATE_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(STATE_SCHEMA).expect("state schema should be json");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("state schema should compile")
});

/// Sidecar written after every checkpointed save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Label of the step that produced the checkpoint (e.g. `m01/p01: planning -> spec_locked`).
    pub step: String,
    /// RFC 3339 UTC timestamp.
    pub saved_at: String,
}

/// Sidecar path for a state file: `checkpoint.json` in the same directory.
pub fn checkpoint_path(state_path: &Path) -> PathBuf {
    state_path.with_file_name("checkpoint.json")
}

/// Read, schema-validate, decode and invariant-check the state file.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_state(path: &Path) -> Result<PipelineState> {
    let contents = std::fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
    let value: Value = serde_json::from_str(&contents).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let schema_errors: Vec<String> = STATE_VALIDATOR
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !schema_errors.is_empty() {
        return Err(Error::CorruptState {
            path: path.to_path_buf(),
            messages: schema_errors,
        });
    }

    let state: PipelineState = serde_json::from_value(value).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let invariant_errors = validate_invariants(&state);
    if !invariant_errors.is_empty() {
        return Err(Error::CorruptState {
            path: path.to_path_buf(),
            messages: invariant_errors,
        });
    }
    debug!(
        milestones = state.milestones.len(),
        current = ?state.current_milestone,
        "state loaded"
    );
    Ok(state)
}

/// Atomically write the state as pretty JSON with a trailing newline.
pub fn save_state(path: &Path, state: &PipelineState) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(state).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Save the state, then record which step produced it.
#[instrument(skip_all, fields(path = %path.display(), step = %step))]
pub fn checkpoint(path: &Path, state: &PipelineState, step: &str) -> Result<()> {
    save_state(path, state)?;
    let marker = Checkpoint {
        step: step.to_string(),
        saved_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    };
    let sidecar = checkpoint_path(path);
    let mut buf = serde_json::to_string_pretty(&marker).map_err(|source| Error::Parse {
        path: sidecar.clone(),
        source,
    })?;
    buf.push('\n');
    write_atomic(&sidecar, &buf)?;
    debug!("checkpoint written");
    Ok(())
}

/// Last checkpoint marker, if one has been written.
pub fn load_checkpoint(state_path: &Path) -> Result<Option<Checkpoint>> {
    let sidecar = checkpoint_path(state_path);
    let Some(contents) = read_optional(&sidecar)? else {
        return Ok(None);
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| Error::Parse {
            path: sidecar,
            source,
        })
}
