//! Pipeline configuration stored under `.crucible/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::core::types::Level;
use crate::io::fsutil::write_atomic;

/// Pipeline configuration (TOML).
///
/// Hand-edited; every field has a default so a partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Deadline for a single external agent call.
    pub agent_timeout_secs: u64,

    /// Truncate captured agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Directory of `*.md` prompt templates overriding the built-ins
    /// (relative to `.crucible/`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub templates_dir: Option<PathBuf>,

    pub agents: BTreeMap<String, AgentConfig>,

    pub levels: LevelsConfig,
}

/// How to launch one agent CLI. Optional flags are only passed when both the
/// flag and the corresponding role setting are present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AgentConfig {
    pub program: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_flag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools_flag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_flag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns_flag: Option<String>,
    /// Flag taking a path to the JSON Schema a structured reply must satisfy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_flag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LevelsConfig {
    pub milestone: LevelConfig,
    pub phase: LevelConfig,
    pub task: LevelConfig,
    pub implementation: LevelConfig,
}

impl LevelsConfig {
    pub fn get(&self, level: Level) -> &LevelConfig {
        match level {
            Level::Milestone => &self.milestone,
            Level::Phase => &self.phase,
            Level::Task => &self.task,
            Level::Implementation => &self.implementation,
        }
    }
}

impl Default for LevelsConfig {
    fn default() -> Self {
        Self {
            milestone: LevelConfig::planning(),
            phase: LevelConfig::planning(),
            task: LevelConfig::planning(),
            implementation: LevelConfig::implementation(),
        }
    }
}

/// Cycle settings for one hierarchy level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LevelConfig {
    /// Creator/challenger rounds before the tiebreaker decides.
    pub max_iterations: u32,
    pub creator: RoleConfig,
    pub challenger: RoleConfig,
    pub tiebreaker: RoleConfig,
    pub templates: TemplateNames,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self::planning()
    }
}

impl LevelConfig {
    fn planning() -> Self {
        Self {
            max_iterations: 3,
            creator: RoleConfig::new("claude", Sandbox::ReadOnly),
            challenger: RoleConfig::new("codex", Sandbox::ReadOnly),
            tiebreaker: RoleConfig::new("claude", Sandbox::ReadOnly),
            templates: TemplateNames {
                draft: "draft".to_string(),
                challenge: "challenge".to_string(),
                refine: "refine".to_string(),
                tiebreak: "tiebreak".to_string(),
            },
        }
    }

    fn implementation() -> Self {
        Self {
            max_iterations: 3,
            creator: RoleConfig::new("claude", Sandbox::WorkspaceWrite),
            challenger: RoleConfig::new("codex", Sandbox::ReadOnly),
            tiebreaker: RoleConfig::new("claude", Sandbox::ReadOnly),
            templates: TemplateNames {
                draft: "implement".to_string(),
                challenge: "review".to_string(),
                refine: "revise".to_string(),
                tiebreak: "arbitrate".to_string(),
            },
        }
    }
}

/// Agent identity and call options for one role within a level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct RoleConfig {
    /// Key into `[agents]`.
    pub agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub allowed_tools: Vec<String>,
    pub sandbox: Sandbox,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
}

impl RoleConfig {
    fn new(agent: &str, sandbox: Sandbox) -> Self {
        Self {
            agent: agent.to_string(),
            sandbox,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Sandbox {
    #[default]
    ReadOnly,
    WorkspaceWrite,
    FullAccess,
}

impl Sandbox {
    /// Value passed to an agent's sandbox flag.
    pub fn as_cli_value(self) -> &'static str {
        match self {
            Sandbox::ReadOnly => "read-only",
            Sandbox::WorkspaceWrite => "workspace-write",
            Sandbox::FullAccess => "danger-full-access",
        }
    }
}

/// Template names for the four cycle prompts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct TemplateNames {
    pub draft: String,
    pub challenge: String,
    pub refine: String,
    pub tiebreak: String,
}

fn default_agents() -> BTreeMap<String, AgentConfig> {
    let claude = AgentConfig {
        program: "claude".to_string(),
        args: vec!["-p".to_string()],
        model_flag: Some("--model".to_string()),
        tools_flag: Some("--allowedTools".to_string()),
        max_turns_flag: Some("--max-turns".to_string()),
        ..AgentConfig::default()
    };
    let codex = AgentConfig {
        program: "codex".to_string(),
        args: vec!["exec".to_string()],
        model_flag: Some("--model".to_string()),
        sandbox_flag: Some("--sandbox".to_string()),
        schema_flag: Some("--output-schema".to_string()),
        ..AgentConfig::default()
    };
    BTreeMap::from([("claude".to_string(), claude), ("codex".to_string(), codex)])
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            agent_timeout_secs: 20 * 60,
            output_limit_bytes: 1_000_000,
            templates_dir: None,
            agents: default_agents(),
            levels: LevelsConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.agent_timeout_secs == 0 {
            bail!("agent_timeout_secs must be > 0");
        }
        if self.output_limit_bytes == 0 {
            bail!("output_limit_bytes must be > 0");
        }
        for (name, agent) in &self.agents {
            if agent.program.trim().is_empty() {
                bail!("agents.{name}.program must be non-empty");
            }
        }
        for level in [Level::Milestone, Level::Phase, Level::Task, Level::Implementation] {
            let cfg = self.levels.get(level);
            if cfg.max_iterations == 0 {
                bail!("levels.{level}.max_iterations must be >= 1");
            }
            for (role, role_cfg) in [
                ("creator", &cfg.creator),
                ("challenger", &cfg.challenger),
                ("tiebreaker", &cfg.tiebreaker),
            ] {
                if !self.agents.contains_key(&role_cfg.agent) {
                    return Err(anyhow!(
                        "levels.{level}.{role}.agent references undefined agent '{}'",
                        role_cfg.agent
                    ));
                }
            }
            let names = &cfg.templates;
            for (key, name) in [
                ("draft", &names.draft),
                ("challenge", &names.challenge),
                ("refine", &names.refine),
                ("tiebreak", &names.tiebreak),
            ] {
                if name.trim().is_empty() {
                    bail!("levels.{level}.templates.{key} must be non-empty");
                }
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PipelineConfig::default()`.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        let cfg = PipelineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk.
pub fn write_config(path: &Path, cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, PipelineConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = PipelineConfig::default();
        cfg.templates_dir = Some(PathBuf::from("prompts"));
        cfg.levels.task.creator.model = Some("opus".to_string());
        cfg.levels.task.creator.max_turns = Some(12);
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "agent_timeout_secs = 60\n\n[levels.phase]\nmax_iterations = 5\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.agent_timeout_secs, 60);
        assert_eq!(cfg.levels.phase.max_iterations, 5);
        assert_eq!(cfg.levels.phase.templates.draft, "draft");
        assert_eq!(cfg.levels.implementation.templates.challenge, "review");
    }

    #[test]
    fn rejects_zero_iterations() {
        let mut cfg = PipelineConfig::default();
        cfg.levels.implementation.max_iterations = 0;
        let err = cfg.validate().expect_err("zero iterations");
        assert!(err.to_string().contains("levels.implementation.max_iterations"));
    }

    #[test]
    fn rejects_undefined_agent() {
        let mut cfg = PipelineConfig::default();
        cfg.levels.milestone.challenger.agent = "gemini".to_string();
        let err = cfg.validate().expect_err("undefined agent");
        assert!(err.to_string().contains("undefined agent 'gemini'"));
    }

    #[test]
    fn sandbox_parses_snake_case() {
        let role: RoleConfig =
            toml::from_str("agent = \"codex\"\nsandbox = \"workspace_write\"\n").expect("parse");
        assert_eq!(role.sandbox, Sandbox::WorkspaceWrite);
        assert_eq!(role.sandbox.as_cli_value(), "workspace-write");
    }
}
