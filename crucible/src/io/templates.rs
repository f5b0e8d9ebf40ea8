//! Prompt rendering for cycle roles.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use minijinja::Environment;
use tracing::debug;

/// Variables available to every prompt template.
pub type TemplateVars = BTreeMap<String, String>;

/// Source of rendered prompts, keyed by template name.
pub trait TemplateResolver {
    fn render(&self, name: &str, vars: &TemplateVars) -> Result<String>;
}

const BUILTIN_TEMPLATES: [(&str, &str); 8] = [
    ("draft", include_str!("prompts/draft.md")),
    ("challenge", include_str!("prompts/challenge.md")),
    ("refine", include_str!("prompts/refine.md")),
    ("tiebreak", include_str!("prompts/tiebreak.md")),
    ("implement", include_str!("prompts/implement.md")),
    ("review", include_str!("prompts/review.md")),
    ("revise", include_str!("prompts/revise.md")),
    ("arbitrate", include_str!("prompts/arbitrate.md")),
];

/// Built-in templates, optionally overridden by `{name}.md` files from a
/// templates directory.
pub struct PromptTemplates {
    env: Environment<'static>,
    overrides: BTreeMap<String, String>,
}

impl PromptTemplates {
    pub fn builtin() -> Self {
        let mut env = Environment::new();
        for (name, source) in BUILTIN_TEMPLATES {
            env.add_template(name, source)
                .expect("built-in template should be valid");
        }
        Self {
            env,
            overrides: BTreeMap::new(),
        }
    }

    /// Built-ins plus every `*.md` file in `dir` (a missing directory is empty).
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let mut templates = Self::builtin();
        let Some(dir) = dir else {
            return Ok(templates);
        };
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "templates directory missing; using built-ins");
            return Ok(templates);
        }
        let entries =
            fs::read_dir(dir).with_context(|| format!("read templates dir {}", dir.display()))?;
        for entry in entries {
            let path = entry
                .with_context(|| format!("read templates dir {}", dir.display()))?
                .path();
            if path.extension().is_none_or(|ext| ext != "md") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let source = fs::read_to_string(&path)
                .with_context(|| format!("read template {}", path.display()))?;
            debug!(name, path = %path.display(), "template override loaded");
            templates.overrides.insert(name.to_string(), source);
        }
        Ok(templates)
    }

    pub fn has(&self, name: &str) -> bool {
        self.overrides.contains_key(name) || self.env.get_template(name).is_ok()
    }
}

impl TemplateResolver for PromptTemplates {
    fn render(&self, name: &str, vars: &TemplateVars) -> Result<String> {
        let rendered = match self.overrides.get(name) {
            Some(source) => self.env.render_str(source, vars),
            None => {
                let template = self
                    .env
                    .get_template(name)
                    .map_err(|_| anyhow!("unknown template '{name}'"))?;
                template.render(vars)
            }
        };
        rendered.with_context(|| format!("render template '{name}'"))
    }
}
