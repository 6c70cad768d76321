//! Affected project selection from a list of changed files

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, info};

use super::graph::ProjectGraph;

/// Projects impacted by a set of changed workspace-relative files.
///
/// A file belongs to the project with the deepest root containing it. Touching
/// a shared input affects every project. Transitive dependents of an owning
/// project are affected too. The result is sorted.
pub fn affected_projects(
    graph: &ProjectGraph,
    changed_files: &[String],
    shared_inputs: &[String],
) -> Vec<String> {
    let shared: BTreeSet<String> = shared_inputs.iter().map(|s| normalize(s)).collect();
    let mut affected = BTreeSet::new();

    for file in changed_files.iter().map(|f| normalize(f)).filter(|f| !f.is_empty()) {
        if shared.contains(&file) {
            info!(file = %file, "shared input changed, every project is affected");
            return graph.names();
        }

        match owning_project(graph, &file) {
            Some(owner) => {
                debug!(file = %file, project = owner, "file belongs to project");
                affected.insert(owner.to_string());
                affected.extend(graph.transitive_dependents(owner));
            }
            None => debug!(file = %file, "file belongs to no project"),
        }
    }

    affected.into_iter().collect()
}

fn owning_project<'a>(graph: &'a ProjectGraph, file: &str) -> Option<&'a str> {
    let file = Path::new(file);
    graph
        .projects()
        .filter(|p| {
            let root = p.root_str();
            root == "." || file.starts_with(&root)
        })
        .max_by_key(|p| {
            let root = p.root_str();
            if root == "." {
                0
            } else {
                Path::new(&root).components().count()
            }
        })
        .map(|p| p.name.as_str())
}

fn normalize(path: &str) -> String {
    let path = path.trim().trim_matches('"').replace('\\', "/");
    path.strip_prefix("./").unwrap_or(&path).to_string()
}
