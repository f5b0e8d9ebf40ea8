//! Child-unit extraction from locked specifications.

use std::path::PathBuf;

use anyhow::{Result, bail};
use tracing::debug;

use crate::io::fsutil::write_atomic;

/// A child unit discovered in a locked artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildUnit {
    pub id: String,
    pub title: String,
    /// Contents for the child's `brief.md`.
    pub brief: String,
}

pub trait Scaffolder {
    /// Extract ordered child units, assigning ids with the given prefix letter.
    fn extract(&self, locked: &str, prefix: char) -> Result<Vec<ChildUnit>>;
}

/// Takes each second-level Markdown heading (`## Title`) as one child; the
/// text up to the next heading of level 1 or 2 becomes its brief. Headings
/// inside fenced code blocks are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadingScaffolder;

impl Scaffolder for HeadingScaffolder {
    fn extract(&self, locked: &str, prefix: char) -> Result<Vec<ChildUnit>> {
        let mut sections: Vec<(String, Vec<&str>)> = Vec::new();
        let mut in_fence = false;
        let mut open = false;
        for line in locked.lines() {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
            }
            if !in_fence {
                if let Some(title) = line.strip_prefix("## ") {
                    sections.push((title.trim().to_string(), Vec::new()));
                    open = true;
                    continue;
                }
                if line.starts_with("# ") {
                    open = false;
                    continue;
                }
            }
            if open && let Some((_, body)) = sections.last_mut() {
                body.push(line);
            }
        }

        if sections.is_empty() {
            bail!("no `## ` headings found; nothing to scaffold");
        }
        let width = sections.len().to_string().len().max(2);
        let children = sections
            .into_iter()
            .enumerate()
            .map(|(index, (title, body))| ChildUnit {
                id: format!("{prefix}{:0width$}", index + 1),
                brief: format!("# {title}\n\n{}\n", body.join("\n").trim()),
                title,
            })
            .collect();
        Ok(children)
    }
}

/// Extract children and write each `brief.md` (into `dir_for(id)`) before
/// returning them for registration.
pub fn scaffold_children(
    scaffolder: &dyn Scaffolder,
    locked: &str,
    prefix: char,
    dir_for: impl Fn(&str) -> PathBuf,
) -> Result<Vec<ChildUnit>> {
    let children = scaffolder.extract(locked, prefix)?;
    for child in &children {
        let path = dir_for(&child.id).join("brief.md");
        write_atomic(&path, &child.brief)?;
        debug!(id = %child.id, path = %path.display(), "brief written");
    }
    Ok(children)
}
