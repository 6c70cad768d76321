//! Source file enumeration for projects

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{ConfigError, ProjectError, Result};

use super::graph::{Project, ProjectGraph};
use super::expand_placeholders;

/// Directory names never treated as sources
const ALWAYS_SKIPPED: &[&str] = &[".git", "node_modules"];

/// Decides which files under a project root count as its sources.
///
/// Excludes the cache directory, every declared target output and the
/// configured ignore globs, so that running a task never changes its own
/// inputs.
#[derive(Debug, Clone)]
pub struct SourceFilter {
    excluded: GlobSet,
}

impl SourceFilter {
    /// Build a filter from raw workspace-relative glob patterns
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = normalize(pattern);
            for candidate in [pattern.clone(), format!("{}/**", pattern)] {
                let glob = Glob::new(&candidate).map_err(|e| ConfigError::InvalidGlob {
                    pattern: candidate.clone(),
                    reason: e.to_string(),
                })?;
                builder.add(glob);
            }
        }
        let excluded = builder.build().map_err(|e| ConfigError::InvalidGlob {
            pattern: patterns.join(", "),
            reason: e.to_string(),
        })?;
        Ok(Self { excluded })
    }

    /// Build the workspace filter: ignore globs, cache dir and all outputs
    pub fn from_config(config: &Config, graph: &ProjectGraph) -> Result<Self> {
        let mut patterns = config.tasks.ignore.clone();
        patterns.push(config.tasks.cache.dir.to_string_lossy().to_string());
        for project in graph.projects() {
            for (target_name, target) in &project.targets {
                for output in &target.outputs {
                    patterns.push(expand_placeholders(output, project, target_name));
                }
            }
        }
        Self::new(&patterns)
    }

    /// Whether a workspace-relative path is excluded
    pub fn is_excluded(&self, relative: &str) -> bool {
        self.excluded.is_match(relative)
    }

    /// Sorted workspace-relative paths (forward slashes) of a project's files
    pub fn project_files(&self, workspace_root: &Path, project: &Project) -> Result<Vec<String>> {
        let project_dir = match project.root_str().as_str() {
            "." => workspace_root.to_path_buf(),
            root => workspace_root.join(root),
        };
        if !project_dir.exists() {
            debug!(project = %project.name, path = %project_dir.display(), "project root missing");
            return Ok(Vec::new());
        }

        let walker = WalkDir::new(&project_dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 {
                    return true;
                }
                let skipped_name = entry.file_type().is_dir()
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|n| ALWAYS_SKIPPED.contains(&n));
                !skipped_name
                    && !self.is_excluded(&relative_to(workspace_root, entry.path()))
            });

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| ProjectError::FileWalk {
                project: project.name.clone(),
                reason: e.to_string(),
            })?;
            if entry.file_type().is_file() {
                files.push(relative_to(workspace_root, entry.path()));
            }
        }

        files.sort();
        debug!(project = %project.name, files = files.len(), "collected project files");
        Ok(files)
    }
}

/// Workspace-relative path with forward slashes
pub fn relative_to(root: &Path, path: &Path) -> String {
    let relative: PathBuf = path.strip_prefix(root).unwrap_or(path).to_path_buf();
    relative.to_string_lossy().replace('\\', "/")
}

fn normalize(pattern: &str) -> String {
    let pattern = pattern.replace('\\', "/");
    let pattern = pattern.strip_prefix("./").unwrap_or(&pattern);
    pattern.trim_end_matches('/').to_string()
}
