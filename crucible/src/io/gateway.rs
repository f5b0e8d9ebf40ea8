//! Agent gateway abstraction for external creator/challenger/tiebreaker calls.
//!
//! The [`AgentGateway`] trait decouples the cycle engine from the actual agent
//! CLIs. Tests use scripted gateways that return predetermined replies without
//! spawning processes.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::decision::{Decision, DecisionSchema, parse_decision};
use crate::error::{AgentCallError, AgentFailure};
use crate::io::config::{AgentConfig, PipelineConfig, RoleConfig, Sandbox};
use crate::io::fsutil::write_atomic;
use crate::io::process::run_command_with_timeout;

/// Participant in a deliberation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Creator,
    Challenger,
    Tiebreaker,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Creator => "creator",
            Role::Challenger => "challenger",
            Role::Tiebreaker => "tiebreaker",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call options resolved from a level's role configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOptions {
    pub agent: String,
    pub model: Option<String>,
    pub allowed_tools: Vec<String>,
    pub sandbox: Sandbox,
    pub max_turns: Option<u32>,
    /// Decision shape the reply must satisfy, for structured calls.
    pub schema: Option<DecisionSchema>,
}

impl CallOptions {
    pub fn from_role(role: &RoleConfig) -> Self {
        Self {
            agent: role.agent.clone(),
            model: role.model.clone(),
            allowed_tools: role.allowed_tools.clone(),
            sandbox: role.sandbox,
            max_turns: role.max_turns,
            schema: None,
        }
    }
}

/// Abstraction over agent backends.
pub trait AgentGateway {
    /// Send `prompt` to the agent playing `role` and return its reply text.
    fn call(&self, role: Role, prompt: &str, options: &CallOptions) -> Result<String, AgentCallError>;

    /// Call and decode the reply as a decision of the given shape.
    fn call_structured(
        &self,
        role: Role,
        prompt: &str,
        options: &CallOptions,
        schema: DecisionSchema,
    ) -> crate::error::Result<Decision> {
        let options = CallOptions {
            schema: Some(schema),
            ..options.clone()
        };
        let raw = self.call(role, prompt, &options)?;
        parse_decision(&raw, schema)
    }
}

/// Gateway that launches the configured agent CLI per call, prompt on stdin.
pub struct CommandGateway {
    agents: BTreeMap<String, AgentConfig>,
    workdir: PathBuf,
    schema_dir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandGateway {
    /// `workdir` is where agents run (the project root); `schema_dir` receives
    /// the decision schema files handed to agents with a schema flag.
    pub fn new(config: &PipelineConfig, workdir: &Path, schema_dir: &Path) -> Self {
        Self {
            agents: config.agents.clone(),
            workdir: workdir.to_path_buf(),
            schema_dir: schema_dir.to_path_buf(),
            timeout: Duration::from_secs(config.agent_timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    fn build_command(
        &self,
        agent: &AgentConfig,
        options: &CallOptions,
    ) -> Result<Command, AgentFailure> {
        let mut cmd = Command::new(&agent.program);
        cmd.args(&agent.args).current_dir(&self.workdir);
        if let (Some(flag), Some(model)) = (&agent.model_flag, &options.model) {
            cmd.arg(flag).arg(model);
        }
        if let Some(flag) = &agent.tools_flag
            && !options.allowed_tools.is_empty()
        {
            cmd.arg(flag).arg(options.allowed_tools.join(","));
        }
        if let Some(flag) = &agent.sandbox_flag {
            cmd.arg(flag).arg(options.sandbox.as_cli_value());
        }
        if let (Some(flag), Some(turns)) = (&agent.max_turns_flag, options.max_turns) {
            cmd.arg(flag).arg(turns.to_string());
        }
        if let (Some(flag), Some(schema)) = (&agent.schema_flag, options.schema) {
            let path = self.schema_dir.join(format!("{}.schema.json", schema.name()));
            if !path.exists() {
                write_atomic(&path, schema.document())
                    .map_err(|err| AgentFailure::Spawn(err.to_string()))?;
            }
            cmd.arg(flag).arg(path);
        }
        Ok(cmd)
    }
}

impl AgentGateway for CommandGateway {
    #[instrument(skip_all, fields(role = %role, agent = %options.agent))]
    fn call(&self, role: Role, prompt: &str, options: &CallOptions) -> Result<String, AgentCallError> {
        let fail = |failure| AgentCallError::new(role.as_str(), &options.agent, failure);
        let agent = self.agents.get(&options.agent).ok_or_else(|| {
            fail(AgentFailure::Spawn(format!(
                "agent '{}' is not configured",
                options.agent
            )))
        })?;
        let cmd = self.build_command(agent, options).map_err(fail)?;

        info!(prompt_bytes = prompt.len(), "invoking agent");
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .map_err(|err| fail(AgentFailure::Spawn(format!("{err:#}"))))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "agent timed out");
            return Err(fail(AgentFailure::Timeout(self.timeout)));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent failed");
            return Err(fail(AgentFailure::ProcessFailed {
                code: output.status.code(),
                stderr: output.stderr_text(),
            }));
        }
        let reply = output.stdout_text();
        if reply.trim().is_empty() {
            return Err(fail(AgentFailure::EmptyOutput));
        }
        debug!(reply_bytes = reply.len(), "agent replied");
        Ok(reply)
    }
}
