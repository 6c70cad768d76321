//! Project dependency graph

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{Config, TargetConfig};
use crate::error::{ProjectError, Result};

/// A project in the workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Unique project name
    pub name: String,
    /// Project root, relative to the workspace root
    pub root: PathBuf,
    /// Projects this project depends on (sorted, deduplicated)
    pub dependencies: Vec<String>,
    /// Targets available on this project
    pub targets: BTreeMap<String, TargetConfig>,
}

impl Project {
    /// Create a project with no dependencies and no targets
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            dependencies: Vec::new(),
            targets: BTreeMap::new(),
        }
    }

    /// Add a dependency
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        let dep = dep.into();
        if let Err(pos) = self.dependencies.binary_search(&dep) {
            self.dependencies.insert(pos, dep);
        }
        self
    }

    /// Add a target
    pub fn with_target(mut self, name: impl Into<String>, target: TargetConfig) -> Self {
        self.targets.insert(name.into(), target);
        self
    }

    /// Look up a target definition
    pub fn target(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.get(name)
    }

    /// Whether this project defines the target
    pub fn has_target(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    /// Root rendered with forward slashes, `.` for the workspace root itself
    pub fn root_str(&self) -> String {
        let root = self.root.to_string_lossy().replace('\\', "/");
        let root = root.trim_end_matches('/');
        if root.is_empty() {
            ".".to_string()
        } else {
            root.to_string()
        }
    }
}

/// Read-only dependency graph of workspace projects.
///
/// Cycles are representable: they only become an error once a task graph
/// needs to traverse one.
#[derive(Debug, Clone, Default)]
pub struct ProjectGraph {
    projects: BTreeMap<String, Project>,
    dependents: BTreeMap<String, Vec<String>>,
}

impl ProjectGraph {
    /// Build the graph from configuration, resolving each project's targets
    /// as the workspace targets overlaid with its own.
    pub fn from_config(config: &Config) -> Result<Self> {
        let projects = config
            .projects
            .iter()
            .map(|p| {
                let mut project = Project::new(&p.name, &p.root);
                project.targets = config.targets.clone();
                project.targets.extend(p.targets.clone());
                p.dependencies
                    .iter()
                    .fold(project, |project, dep| project.with_dependency(dep))
            })
            .collect();
        Self::from_projects(projects)
    }

    /// Build the graph from already-resolved projects
    pub fn from_projects(projects: Vec<Project>) -> Result<Self> {
        let mut by_name: BTreeMap<String, Project> = BTreeMap::new();
        for mut project in projects {
            project.dependencies.sort();
            project.dependencies.dedup();
            if by_name.contains_key(&project.name) {
                return Err(ProjectError::DuplicateProject(project.name).into());
            }
            by_name.insert(project.name.clone(), project);
        }

        let mut dependents: BTreeMap<String, Vec<String>> =
            by_name.keys().map(|n| (n.clone(), Vec::new())).collect();
        for project in by_name.values() {
            for dep in &project.dependencies {
                match dependents.get_mut(dep) {
                    Some(list) => list.push(project.name.clone()),
                    None => return Err(ProjectError::UnknownProject(dep.clone()).into()),
                }
            }
        }

        debug!(projects = by_name.len(), "project graph built");
        Ok(Self {
            projects: by_name,
            dependents,
        })
    }

    /// Get a project
    pub fn get(&self, name: &str) -> Option<&Project> {
        self.projects.get(name)
    }

    /// Get a project, failing when it is not part of the workspace
    pub fn project(&self, name: &str) -> Result<&Project> {
        self.get(name)
            .ok_or_else(|| ProjectError::UnknownProject(name.to_string()).into())
    }

    /// Whether the workspace has a project with this name
    pub fn contains(&self, name: &str) -> bool {
        self.projects.contains_key(name)
    }

    /// All projects, ordered by name
    pub fn projects(&self) -> impl Iterator<Item = &Project> {
        self.projects.values()
    }

    /// All project names, sorted
    pub fn names(&self) -> Vec<String> {
        self.projects.keys().cloned().collect()
    }

    /// Number of projects
    pub fn len(&self) -> usize {
        self.projects.len()
    }

    /// Check if the graph is empty
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Direct dependencies of a project
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.projects
            .get(name)
            .map(|p| p.dependencies.as_slice())
            .unwrap_or_default()
    }

    /// Direct dependents of a project
    pub fn dependents(&self, name: &str) -> &[String] {
        self.dependents
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every project reachable through the dependency relation, excluding `name`
    pub fn transitive_dependencies(&self, name: &str) -> BTreeSet<String> {
        self.reachable(name, |n| self.dependencies(n))
    }

    /// Every project that transitively depends on `name`, excluding `name`
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        self.reachable(name, |n| self.dependents(n))
    }

    fn reachable<'a, F>(&'a self, name: &str, next: F) -> BTreeSet<String>
    where
        F: Fn(&str) -> &'a [String],
    {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(name);

        while let Some(current) = queue.pop_front() {
            for neighbour in next(current) {
                if seen.insert(neighbour.clone()) {
                    queue.push_back(neighbour);
                }
            }
        }

        seen.remove(name);
        seen
    }

    /// Projects in dependency order (dependencies first). Projects caught in
    /// a cycle are left out; see [`ProjectGraph::cycles`].
    pub fn sorted(&self) -> Vec<String> {
        let mut in_degree: HashMap<&str, usize> = self
            .projects
            .values()
            .map(|p| (p.name.as_str(), p.dependencies.len()))
            .collect();
        let mut queue: VecDeque<&str> = self
            .projects
            .keys()
            .map(String::as_str)
            .filter(|n| in_degree.get(n) == Some(&0))
            .collect();
        let mut sorted = Vec::new();

        while let Some(name) = queue.pop_front() {
            sorted.push(name.to_string());
            for dependent in self.dependents(name) {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        sorted
    }

    /// Circular dependencies, each listed as a closed path (`a -> b -> a`)
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let sorted: HashSet<String> = self.sorted().into_iter().collect();
        let mut cycles: Vec<Vec<String>> = Vec::new();

        for name in self.projects.keys().filter(|n| !sorted.contains(*n)) {
            if let Some(cycle) = self.find_cycle_from(name) {
                let members: BTreeSet<&String> = cycle.iter().collect();
                let known = cycles.iter().any(|c| {
                    let existing: BTreeSet<&String> = c.iter().collect();
                    existing == members
                });
                if !known {
                    cycles.push(cycle);
                }
            }
        }

        cycles
    }

    /// Find a dependency cycle reachable from `start`, returned as a closed
    /// path whose first and last element are the same project.
    pub fn find_cycle_from(&self, start: &str) -> Option<Vec<String>> {
        // iterative DFS: each frame is a project and the next dependency to visit
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        let mut on_path: HashMap<&str, usize> = HashMap::from([(start, 0)]);
        let mut done: HashSet<&str> = HashSet::new();

        while let Some(frame) = stack.last_mut() {
            let (current, next) = *frame;
            let Some(dep) = self.dependencies(current).get(next) else {
                stack.pop();
                on_path.remove(current);
                done.insert(current);
                continue;
            };
            frame.1 += 1;

            let dep = dep.as_str();
            if let Some(&pos) = on_path.get(dep) {
                let mut cycle: Vec<String> = stack[pos..].iter().map(|(p, _)| p.to_string()).collect();
                cycle.push(dep.to_string());
                return Some(cycle);
            }
            if !done.contains(dep) {
                on_path.insert(dep, stack.len());
                stack.push((dep, 0));
            }
        }

        None
    }
}
