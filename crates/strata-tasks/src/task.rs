//! Task types and definitions

use std::fmt;

use serde::{Deserialize, Serialize};

use strata_core::{expand_placeholders, Project, TargetConfig};

/// Unique identifier for a task: a target run on a project
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    /// Project name
    pub project: String,
    /// Target name (e.g., "build", "test", "lint")
    pub target: String,
}

impl TaskId {
    /// Create a new task ID
    pub fn new(project: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            target: target.into(),
        }
    }

    /// Parse a task ID from "project:target" format
    pub fn parse(s: &str) -> Option<Self> {
        let (project, target) = s.split_once(':')?;
        if project.is_empty() || target.is_empty() {
            return None;
        }
        Some(Self::new(project, target))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.target)
    }
}

/// Lifecycle state of a task within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting on dependencies
    Pending,
    /// All dependencies succeeded; waiting for a worker
    Ready,
    /// Picked up by a worker
    Running,
    /// Served from the cache without running
    CachedHit,
    /// Executed successfully
    Succeeded,
    /// Executed and failed
    Failed,
    /// Never started
    Skipped,
}

impl TaskStatus {
    /// Succeeded or served from cache
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::CachedHit)
    }

    /// No further transitions will happen
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CachedHit | Self::Succeeded | Self::Failed | Self::Skipped
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::CachedHit => "cached",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// A resolved unit of work: one target on one project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier
    pub id: TaskId,
    /// Project root, relative to the workspace root
    pub project_root: String,
    /// Shell command with placeholders substituted
    pub command: String,
    /// Declared output paths (or globs), relative to the workspace root
    pub outputs: Vec<String>,
}

impl Task {
    /// Resolve a project's target definition into a task
    pub fn resolve(project: &Project, target_name: &str, target: &TargetConfig) -> Self {
        Self {
            id: TaskId::new(&project.name, target_name),
            project_root: project.root_str(),
            command: expand_placeholders(&target.command, project, target_name),
            outputs: target
                .outputs
                .iter()
                .map(|o| expand_placeholders(o, project, target_name))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_display() {
        let id = TaskId::new("core", "build");
        assert_eq!(id.to_string(), "core:build");
    }

    #[test]
    fn test_task_id_parse() {
        let id = TaskId::parse("core:build").unwrap();
        assert_eq!(id.project, "core");
        assert_eq!(id.target, "build");
    }

    #[test]
    fn test_task_id_parse_invalid() {
        assert!(TaskId::parse("nobuild").is_none());
        assert!(TaskId::parse(":build").is_none());
        assert!(TaskId::parse("core:").is_none());
    }

    #[test]
    fn test_task_id_ordering_is_by_project_then_target() {
        let mut ids = vec![
            TaskId::new("b", "build"),
            TaskId::new("a", "test"),
            TaskId::new("a", "build"),
        ];
        ids.sort();
        assert_eq!(ids[0], TaskId::new("a", "build"));
        assert_eq!(ids[2], TaskId::new("b", "build"));
    }

    #[test]
    fn test_status_classification() {
        assert!(TaskStatus::Succeeded.is_success());
        assert!(TaskStatus::CachedHit.is_success());
        assert!(!TaskStatus::Failed.is_success());
        assert!(!TaskStatus::Skipped.is_success());
        assert!(TaskStatus::Skipped.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Ready.is_terminal());
    }

    #[test]
    fn test_resolve_expands_placeholders() {
        let project = Project::new("web", "apps/web");
        let target = TargetConfig {
            command: "build {root} for {project}".to_string(),
            outputs: vec!["dist/{root}".to_string()],
        };
        let task = Task::resolve(&project, "build", &target);
        assert_eq!(task.id, TaskId::new("web", "build"));
        assert_eq!(task.command, "build apps/web for web");
        assert_eq!(task.outputs, vec!["dist/apps/web"]);
        assert_eq!(task.project_root, "apps/web");
    }
}
