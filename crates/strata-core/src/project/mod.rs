//! Project graph input
//!
//! The workspace's projects, their declared dependencies and source files.
//! Everything here is read-only for the duration of a run.

pub mod affected;
pub mod files;
pub mod graph;

pub use affected::affected_projects;
pub use files::{relative_to, SourceFilter};
pub use graph::{Project, ProjectGraph};

/// Substitute `{project}`, `{root}` and `{target}` in a command or output path
pub fn expand_placeholders(template: &str, project: &Project, target: &str) -> String {
    template
        .replace("{project}", &project.name)
        .replace("{root}", &project.root_str())
        .replace("{target}", target)
}
