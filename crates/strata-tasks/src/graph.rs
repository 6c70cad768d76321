//! Task graph construction

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use tracing::{debug, info, instrument};

use strata_core::ProjectGraph;

use crate::task::{Task, TaskId};

/// Position of a task in the graph's arena
pub type TaskIndex = usize;

/// Directed acyclic graph of tasks to execute.
///
/// Tasks live in an arena ordered by [`TaskId`]; edges are index lists in
/// both directions.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    index: HashMap<TaskId, TaskIndex>,
    /// Tasks that must complete before each task
    dependencies: Vec<Vec<TaskIndex>>,
    /// Tasks waiting on each task
    dependents: Vec<Vec<TaskIndex>>,
    /// Tasks the caller asked for, before dependency expansion
    requested: Vec<TaskId>,
    /// Topologically sorted order
    sorted_order: Vec<TaskIndex>,
    /// Tasks grouped by longest dependency chain
    waves: Vec<Vec<TaskIndex>>,
}

impl TaskGraph {
    /// Build a task graph for the requested tasks.
    ///
    /// With `include_dependencies`, every requested task pulls in the same
    /// target on each project it transitively depends on, with an edge from
    /// the dependency task to the dependent. A dependency project without the
    /// target contributes no task; its own dependencies are wired through.
    #[instrument(skip_all, fields(requested = requested.len(), include_dependencies))]
    pub fn build(
        projects: &ProjectGraph,
        requested: &[TaskId],
        include_dependencies: bool,
    ) -> Result<Self, GraphError> {
        let requested: Vec<TaskId> = requested
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        for id in &requested {
            let project = projects
                .get(&id.project)
                .ok_or_else(|| GraphError::UnknownProject(id.project.clone()))?;
            if !project.has_target(&id.target) {
                return Err(GraphError::TargetNotFound {
                    project: id.project.clone(),
                    target: id.target.clone(),
                });
            }
            if let Some(cycle) = projects.find_cycle_from(&id.project) {
                return Err(GraphError::CyclicDependency { cycle });
            }
        }

        let mut edges: BTreeMap<TaskId, BTreeSet<TaskId>> = BTreeMap::new();
        let mut queue: VecDeque<TaskId> = requested.iter().cloned().collect();
        while let Some(id) = queue.pop_front() {
            if edges.contains_key(&id) {
                continue;
            }
            let deps = if include_dependencies {
                task_dependencies(projects, &id.project, &id.target)
            } else {
                BTreeSet::new()
            };
            queue.extend(deps.iter().cloned());
            edges.insert(id, deps);
        }

        let mut tasks = Vec::with_capacity(edges.len());
        let mut index = HashMap::with_capacity(edges.len());
        for id in edges.keys() {
            let project = projects
                .get(&id.project)
                .ok_or_else(|| GraphError::UnknownProject(id.project.clone()))?;
            let target = project.target(&id.target).ok_or_else(|| GraphError::TargetNotFound {
                project: id.project.clone(),
                target: id.target.clone(),
            })?;
            index.insert(id.clone(), tasks.len());
            tasks.push(Task::resolve(project, &id.target, target));
        }

        let mut dependencies = vec![Vec::new(); tasks.len()];
        let mut dependents = vec![Vec::new(); tasks.len()];
        for (id, deps) in &edges {
            let to = index[id];
            for dep in deps {
                let from = index[dep];
                dependencies[to].push(from);
                dependents[from].push(to);
            }
        }
        for list in dependents.iter_mut() {
            list.sort_unstable();
        }

        let sorted_order = topological_sort(&tasks, &dependencies, &dependents)?;
        let waves = compute_waves(&dependencies, &sorted_order);

        info!(
            task_count = tasks.len(),
            wave_count = waves.len(),
            "task graph built"
        );

        Ok(Self {
            tasks,
            index,
            dependencies,
            dependents,
            requested,
            sorted_order,
            waves,
        })
    }

    /// All tasks, ordered by id
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Task at an arena index
    pub fn task(&self, idx: TaskIndex) -> &Task {
        &self.tasks[idx]
    }

    /// Look up a task by id
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.index_of(id).map(|idx| &self.tasks[idx])
    }

    /// Arena index of a task
    pub fn index_of(&self, id: &TaskId) -> Option<TaskIndex> {
        self.index.get(id).copied()
    }

    /// Direct dependency tasks
    pub fn dependencies(&self, idx: TaskIndex) -> &[TaskIndex] {
        &self.dependencies[idx]
    }

    /// Direct dependent tasks
    pub fn dependents(&self, idx: TaskIndex) -> &[TaskIndex] {
        &self.dependents[idx]
    }

    /// Ids of the direct dependencies of a task
    pub fn dependency_ids(&self, id: &TaskId) -> Vec<&TaskId> {
        self.index_of(id)
            .map(|idx| {
                self.dependencies[idx]
                    .iter()
                    .map(|d| &self.tasks[*d].id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.dependencies.iter().map(Vec::len).sum()
    }

    /// Tasks requested before dependency expansion
    pub fn requested(&self) -> &[TaskId] {
        &self.requested
    }

    /// Sorted, deduplicated names of every project with a task in the graph
    pub fn projects(&self) -> Vec<String> {
        self.tasks
            .iter()
            .map(|t| t.id.project.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Sorted, deduplicated target names in the graph
    pub fn targets(&self) -> Vec<String> {
        self.tasks
            .iter()
            .map(|t| t.id.target.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Topologically sorted order (dependencies first)
    pub fn sorted(&self) -> &[TaskIndex] {
        &self.sorted_order
    }

    /// Execution waves (tasks in one wave have no edges between them)
    pub fn waves(&self) -> &[Vec<TaskIndex>] {
        &self.waves
    }

    /// Get the total number of tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if the graph is empty
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Get a human-readable summary of the execution plan
    pub fn execution_plan(&self) -> String {
        let mut plan = String::new();
        for (i, wave) in self.waves.iter().enumerate() {
            plan.push_str(&format!("Wave {} ({} tasks):\n", i, wave.len()));
            for &idx in wave {
                let task = &self.tasks[idx];
                let deps: Vec<String> = self.dependencies[idx]
                    .iter()
                    .map(|d| self.tasks[*d].id.to_string())
                    .collect();
                if deps.is_empty() {
                    plan.push_str(&format!("  {} -> {}\n", task.id, task.command));
                } else {
                    plan.push_str(&format!(
                        "  {} -> {} (after: {})\n",
                        task.id,
                        task.command,
                        deps.join(", ")
                    ));
                }
            }
        }
        plan
    }
}

/// Nearest tasks for `target` among the dependencies of `project`, looking
/// through projects that do not define the target.
fn task_dependencies(projects: &ProjectGraph, project: &str, target: &str) -> BTreeSet<TaskId> {
    let mut found = BTreeSet::new();
    let mut visited = BTreeSet::new();
    let mut queue: VecDeque<&str> = projects
        .dependencies(project)
        .iter()
        .map(String::as_str)
        .collect();

    while let Some(dep) = queue.pop_front() {
        if !visited.insert(dep) {
            continue;
        }
        match projects.get(dep) {
            Some(p) if p.has_target(target) => {
                found.insert(TaskId::new(dep, target));
            }
            Some(_) => {
                debug!(project = dep, target, "dependency lacks target, looking through it");
                queue.extend(projects.dependencies(dep).iter().map(String::as_str));
            }
            None => {}
        }
    }

    found
}

/// Topological sort using Kahn's algorithm
fn topological_sort(
    tasks: &[Task],
    dependencies: &[Vec<TaskIndex>],
    dependents: &[Vec<TaskIndex>],
) -> Result<Vec<TaskIndex>, GraphError> {
    let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut queue: VecDeque<TaskIndex> = (0..tasks.len()).filter(|i| in_degree[*i] == 0).collect();
    let mut sorted = Vec::with_capacity(tasks.len());

    while let Some(idx) = queue.pop_front() {
        sorted.push(idx);
        for &dependent in &dependents[idx] {
            in_degree[dependent] = in_degree[dependent].saturating_sub(1);
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if sorted.len() != tasks.len() {
        let mut cycle: Vec<String> = (0..tasks.len())
            .filter(|i| in_degree[*i] > 0)
            .map(|i| tasks[i].id.to_string())
            .collect();
        if let Some(first) = cycle.first().cloned() {
            cycle.push(first);
        }
        return Err(GraphError::CyclicDependency { cycle });
    }

    Ok(sorted)
}

/// Compute execution waves (groups of tasks that can run in parallel)
fn compute_waves(dependencies: &[Vec<TaskIndex>], sorted: &[TaskIndex]) -> Vec<Vec<TaskIndex>> {
    let mut wave_of = vec![0usize; dependencies.len()];
    let mut waves: Vec<Vec<TaskIndex>> = Vec::new();

    for &idx in sorted {
        let wave = dependencies[idx]
            .iter()
            .map(|d| wave_of[*d] + 1)
            .max()
            .unwrap_or(0);
        wave_of[idx] = wave;
        if waves.len() <= wave {
            waves.resize_with(wave + 1, Vec::new);
        }
        waves[wave].push(idx);
    }

    for wave in waves.iter_mut() {
        wave.sort_unstable();
    }
    waves
}

/// Errors during task graph construction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Cyclic dependency detected
    #[error("Cyclic dependency detected: {}", cycle.join(" -> "))]
    CyclicDependency {
        /// Closed path of project (or task) names
        cycle: Vec<String>,
    },

    /// Project is not part of the workspace
    #[error("Project '{0}' not found in workspace")]
    UnknownProject(String),

    /// Requested project does not define the target
    #[error("Project '{project}' has no target '{target}'")]
    TargetNotFound { project: String, target: String },
}
