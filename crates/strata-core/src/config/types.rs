//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Main configuration for Strata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Version of the config schema
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Workspace name
    pub name: Option<String>,

    /// Task orchestration configuration
    pub tasks: TasksConfig,

    /// Workspace-wide target definitions, inherited by every project
    pub targets: BTreeMap<String, TargetConfig>,

    /// Projects in the workspace
    pub projects: Vec<ProjectConfig>,
}

/// Task orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    /// Maximum concurrent tasks (defaults to host parallelism)
    pub parallel: Option<usize>,

    /// Target names whose results may be cached
    pub cacheable_operations: Vec<String>,

    /// Files whose content feeds every task hash (root manifests, lockfiles)
    pub shared_inputs: Vec<String>,

    /// Environment variables whose values feed every task hash
    pub env: Vec<String>,

    /// Glob patterns excluded from project source files
    pub ignore: Vec<String>,

    /// Cache configuration
    pub cache: CacheConfig,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            parallel: None,
            cacheable_operations: Vec::new(),
            shared_inputs: Vec::new(),
            env: Vec::new(),
            ignore: Vec::new(),
            cache: CacheConfig::default(),
        }
    }
}

impl TasksConfig {
    /// Effective worker count
    pub fn concurrency(&self) -> usize {
        self.parallel.unwrap_or_else(host_parallelism)
    }
}

/// Number of workers the host can run in parallel
pub fn host_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether caching is enabled
    pub enabled: bool,

    /// Cache directory, relative to the workspace root
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".strata/cache"),
        }
    }
}

/// A target definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Shell command to execute. Supports `{project}`, `{root}` and `{target}`.
    pub command: String,

    /// Output paths (or glob patterns) relative to the workspace root
    pub outputs: Vec<String>,
}

/// A project declared in the workspace
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Unique project name
    pub name: String,

    /// Project root, relative to the workspace root
    pub root: PathBuf,

    /// Projects this project depends on
    pub dependencies: Vec<String>,

    /// Per-project target definitions, overriding workspace targets
    pub targets: BTreeMap<String, TargetConfig>,
}
