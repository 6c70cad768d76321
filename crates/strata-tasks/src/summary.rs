//! Run summaries rendered from final task state

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde::Serialize;

use crate::graph::TaskGraph;
use crate::scheduler::RunResults;
use crate::task::{TaskId, TaskStatus};

/// Printed before output replayed for a single cached task
pub const CACHED_OUTPUT_MARKER: &str = "Cached Output:";

const BANNER: &str = ">  STRATA  ";

/// Header printed before a run starts
pub fn render_header(target: &str, projects: &[String]) -> String {
    let mut out = format!("{}Running target {} for projects:\n", BANNER, target);
    for project in projects {
        let _ = writeln!(out, "  - {}", project);
    }
    out
}

/// Header for a single task run directly
pub fn single_task_banner(id: &TaskId) -> String {
    format!("> strata run {}", id)
}

/// A task that never ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedProject {
    pub project: String,
    pub reason: String,
}

/// Projection of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Target that was run
    pub target: String,
    /// Every project with a task in the graph, sorted
    pub projects: Vec<String>,
    /// Projects whose task executed successfully
    pub succeeded: Vec<String>,
    /// Projects whose task failed
    pub failed: Vec<String>,
    /// Projects whose task never ran
    pub skipped: Vec<SkippedProject>,
    /// Projects served from the cache, sorted
    pub cached: Vec<String>,
    /// Number of tasks
    pub total: usize,
    /// Whether the run was cancelled
    pub cancelled: bool,
    /// Wall time of the run
    pub duration_ms: u64,
}

impl RunSummary {
    /// Summarize the results of running a graph
    pub fn new(graph: &TaskGraph, results: &RunResults) -> Self {
        let projects_with = |status: TaskStatus| -> Vec<String> {
            results
                .with_status(status)
                .iter()
                .map(|r| r.id.project.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        };

        let skipped = results
            .skipped()
            .iter()
            .map(|r| SkippedProject {
                project: r.id.project.clone(),
                reason: r
                    .skip_reason
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            })
            .collect();

        Self {
            target: graph.targets().join(","),
            projects: graph.projects(),
            succeeded: projects_with(TaskStatus::Succeeded),
            failed: projects_with(TaskStatus::Failed),
            skipped,
            cached: projects_with(TaskStatus::CachedHit),
            total: results.results().len(),
            cancelled: results.is_cancelled(),
            duration_ms: results.duration().as_millis() as u64,
        }
    }

    /// Whether every task succeeded or was served from cache
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && !self.cancelled
    }

    /// Completion report: outcome, failures, skips, then the cache section
    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.is_success() {
            let _ = writeln!(out, "{}Successfully ran target {} for projects:", BANNER, self.target);
        } else {
            let _ = writeln!(out, "{}Ran target {} for projects:", BANNER, self.target);
        }
        for project in &self.projects {
            let _ = writeln!(out, "  - {}", project);
        }

        if self.cancelled {
            let _ = write!(out, "\n  Run was cancelled.\n");
        }

        if !self.failed.is_empty() {
            let _ = write!(out, "\n  Failed tasks:\n");
            for project in &self.failed {
                let _ = writeln!(out, "  - {}", project);
            }
        }

        if !self.skipped.is_empty() {
            let _ = write!(out, "\n  Skipped tasks:\n");
            for skipped in &self.skipped {
                let _ = writeln!(out, "  - {} (skipped: {})", skipped.project, skipped.reason);
            }
        }

        if let Some(section) = self.render_cache_section() {
            out.push('\n');
            out.push_str(&section);
        }
        out
    }

    /// Cache-hit listing, or `None` when nothing came from the cache
    pub fn render_cache_section(&self) -> Option<String> {
        if self.cached.is_empty() {
            return None;
        }
        let mut out = format!(
            "  Strata read the output from cache instead of running the command for {} out of {} tasks:\n",
            self.cached.len(),
            self.total
        );
        for project in &self.cached {
            let _ = writeln!(out, "  - {}", project);
        }
        Some(out)
    }

    /// Machine-readable summary
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use strata_core::{Project, ProjectGraph, TargetConfig};

    use crate::scheduler::{SkipReason, TaskResult};

    fn graph() -> TaskGraph {
        let target = TargetConfig {
            command: "build".to_string(),
            outputs: Vec::new(),
        };
        let projects = ProjectGraph::from_projects(vec![
            Project::new("app", "apps/app")
                .with_dependency("lib")
                .with_target("build", target.clone()),
            Project::new("lib", "libs/lib").with_target("build", target.clone()),
            Project::new("web", "apps/web").with_target("build", target),
        ])
        .unwrap();
        TaskGraph::build(
            &projects,
            &[TaskId::new("app", "build"), TaskId::new("web", "build")],
            true,
        )
        .unwrap()
    }

    fn result(project: &str, status: TaskStatus) -> TaskResult {
        TaskResult {
            status,
            error: None,
            ..TaskResult::failed(TaskId::new(project, "build"), None, Duration::ZERO, String::new())
        }
    }

    #[test]
    fn test_header_lists_projects() {
        let header = render_header("build", &["app".to_string(), "lib".to_string()]);
        assert_eq!(
            header,
            ">  STRATA  Running target build for projects:\n  - app\n  - lib\n"
        );
        assert_eq!(
            single_task_banner(&TaskId::new("app", "build")),
            "> strata run app:build"
        );
    }

    #[test]
    fn test_all_cached_run() {
        let results = RunResults::new(
            vec![
                result("web", TaskStatus::CachedHit),
                result("app", TaskStatus::CachedHit),
                result("lib", TaskStatus::Succeeded),
            ],
            Duration::from_millis(12),
            false,
        );
        let summary = RunSummary::new(&graph(), &results);

        assert!(summary.is_success());
        assert_eq!(summary.cached, vec!["app", "web"]);
        let rendered = summary.render();
        assert!(rendered.starts_with(">  STRATA  Successfully ran target build for projects:\n"));
        assert!(rendered.ends_with(
            "  Strata read the output from cache instead of running the command for 2 out of 3 tasks:\n  - app\n  - web\n"
        ));
    }

    #[test]
    fn test_failures_come_before_cache_section() {
        let results = RunResults::new(
            vec![
                result("lib", TaskStatus::Failed),
                TaskResult::skipped(
                    TaskId::new("app", "build"),
                    SkipReason::DependencyFailed(TaskId::new("lib", "build")),
                ),
                result("web", TaskStatus::CachedHit),
            ],
            Duration::ZERO,
            false,
        );
        let summary = RunSummary::new(&graph(), &results);
        let rendered = summary.render();

        assert!(!summary.is_success());
        assert!(rendered.starts_with(">  STRATA  Ran target build for projects:\n"));
        let failed = rendered.find("Failed tasks:\n  - lib").unwrap();
        let skipped = rendered.find("  - app (skipped: lib failed)").unwrap();
        let cache = rendered.find("read the output from cache").unwrap();
        assert!(failed < skipped && skipped < cache);
    }

    #[test]
    fn test_no_cache_section_without_hits() {
        let results = RunResults::new(
            vec![result("app", TaskStatus::Succeeded)],
            Duration::ZERO,
            false,
        );
        let summary = RunSummary::new(&graph(), &results);
        assert!(summary.render_cache_section().is_none());
        assert!(!summary.render().contains("from cache"));
    }

    #[test]
    fn test_json_summary() {
        let results = RunResults::new(
            vec![result("app", TaskStatus::CachedHit)],
            Duration::from_millis(5),
            false,
        );
        let json = RunSummary::new(&graph(), &results).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["target"], "build");
        assert_eq!(value["cached"][0], "app");
        assert_eq!(value["projects"].as_array().unwrap().len(), 3);
    }
}
