//! Workspace loading shared by commands

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::debug;

use strata_core::config::load_config_from_dir;
use strata_core::{Config, ProjectGraph};

/// Configuration and project graph of the current workspace
#[derive(Debug)]
pub struct Workspace {
    pub root: PathBuf,
    pub config: Config,
    pub projects: Arc<ProjectGraph>,
}

impl Workspace {
    /// Load the workspace containing the current directory
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&std::env::current_dir()?)
    }

    /// Load the workspace containing `dir`
    pub fn load_from(dir: &Path) -> anyhow::Result<Self> {
        let loaded = load_config_from_dir(dir)?;
        let projects = ProjectGraph::from_config(&loaded.config)
            .with_context(|| format!("invalid projects in {}", loaded.path.display()))?;
        debug!(
            root = %loaded.workspace_root.display(),
            projects = projects.len(),
            "workspace loaded"
        );

        Ok(Self {
            root: loaded.workspace_root,
            config: loaded.config,
            projects: Arc::new(projects),
        })
    }
}
