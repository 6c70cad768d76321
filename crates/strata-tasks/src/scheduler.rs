//! Task scheduler: cache-aware async executor using tokio
//!
//! One coordinator owns every status transition. Workers run in a
//! [`JoinSet`] bounded by the configured concurrency and hand their result
//! back to the coordinator, which releases dependents or skips them.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use strata_core::config::host_parallelism;

use crate::cache::{CacheEntry, CacheLookup, TaskCache};
use crate::executor::{ExecutionError, TaskExecutor};
use crate::graph::{TaskGraph, TaskIndex};
use crate::hasher::{Hasher, TaskHash};
use crate::reporter::{TaskEvent, TaskReporter};
use crate::task::{Task, TaskId, TaskStatus};

/// Options for the task scheduler
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum concurrent tasks
    pub concurrency: usize,
    /// Skip cache lookups (results are still stored)
    pub skip_cache: bool,
    /// Cancel the run after this long
    pub timeout: Option<Duration>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency: host_parallelism(),
            skip_cache: false,
            timeout: None,
        }
    }
}

/// Everything a run needs, shared by the coordinator and its workers
pub struct RunContext {
    pub executor: Arc<dyn TaskExecutor>,
    pub cache: Arc<TaskCache>,
    pub hasher: Arc<Hasher>,
    pub reporter: Arc<dyn TaskReporter>,
    pub options: SchedulerOptions,
    pub cancel: CancellationToken,
}

/// Why a task never ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "task")]
pub enum SkipReason {
    /// A (transitive) dependency failed
    DependencyFailed(TaskId),
    /// The run was cancelled before the task started
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DependencyFailed(id) => write!(f, "{} failed", id.project),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Result of a single task
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    /// Task that was scheduled
    pub id: TaskId,
    /// Final status
    pub status: TaskStatus,
    /// Input hash, when one was computed
    pub hash: Option<TaskHash>,
    /// Wall time spent on the task
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    /// Captured (or replayed) stdout
    pub stdout: String,
    /// Captured (or replayed) stderr
    pub stderr: String,
    /// Exit code of the command, when it ran to completion
    pub exit_code: Option<i32>,
    /// Failure description
    pub error: Option<String>,
    /// Why the task was skipped
    pub skip_reason: Option<SkipReason>,
}

impl TaskResult {
    pub(crate) fn skipped(id: TaskId, reason: SkipReason) -> Self {
        Self {
            id,
            status: TaskStatus::Skipped,
            hash: None,
            duration: Duration::ZERO,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            error: None,
            skip_reason: Some(reason),
        }
    }

    pub(crate) fn failed(id: TaskId, hash: Option<TaskHash>, duration: Duration, error: String) -> Self {
        Self {
            id,
            status: TaskStatus::Failed,
            hash,
            duration,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            error: Some(error),
            skip_reason: None,
        }
    }
}

fn as_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Final state of every task in a run
#[derive(Debug, Clone)]
pub struct RunResults {
    results: Vec<TaskResult>,
    duration: Duration,
    cancelled: bool,
}

impl RunResults {
    pub(crate) fn new(results: Vec<TaskResult>, duration: Duration, cancelled: bool) -> Self {
        Self {
            results,
            duration,
            cancelled,
        }
    }

    /// All results, ordered by task id
    pub fn results(&self) -> &[TaskResult] {
        &self.results
    }

    /// Result of one task
    pub fn get(&self, id: &TaskId) -> Option<&TaskResult> {
        self.results.iter().find(|r| &r.id == id)
    }

    /// Tasks with a given final status
    pub fn with_status(&self, status: TaskStatus) -> Vec<&TaskResult> {
        self.results.iter().filter(|r| r.status == status).collect()
    }

    /// Tasks served from the cache
    pub fn cached(&self) -> Vec<&TaskResult> {
        self.with_status(TaskStatus::CachedHit)
    }

    /// Tasks that failed
    pub fn failed(&self) -> Vec<&TaskResult> {
        self.with_status(TaskStatus::Failed)
    }

    /// Tasks that never ran
    pub fn skipped(&self) -> Vec<&TaskResult> {
        self.with_status(TaskStatus::Skipped)
    }

    /// Whether any task failed
    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| r.status == TaskStatus::Failed)
    }

    /// Whether every task succeeded or was served from cache
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.status.is_success())
    }

    /// Whether the run was cancelled (signal or timeout)
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Total wall time of the run
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// Task scheduler: executes a task graph with bounded parallelism
pub struct TaskScheduler {
    ctx: Arc<RunContext>,
}

impl TaskScheduler {
    /// Create a new scheduler
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    /// The run context
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Execute every task in the graph
    pub async fn execute(&self, graph: &TaskGraph) -> RunResults {
        let start = Instant::now();
        let n = graph.len();
        let concurrency = self.ctx.options.concurrency.max(1);
        let deadline = self
            .ctx
            .options
            .timeout
            .map(|timeout| tokio::time::Instant::now() + timeout);

        let mut status = vec![TaskStatus::Pending; n];
        let mut results: Vec<Option<TaskResult>> = (0..n).map(|_| None).collect();
        let mut remaining: Vec<usize> = (0..n).map(|idx| graph.dependencies(idx).len()).collect();
        let mut ready: VecDeque<TaskIndex> = VecDeque::new();
        for idx in 0..n {
            if remaining[idx] == 0 {
                status[idx] = TaskStatus::Ready;
                ready.push_back(idx);
            }
        }

        let mut running: JoinSet<(TaskIndex, Result<TaskResult, JoinError>)> = JoinSet::new();
        let mut cancelled = self.ctx.cancel.is_cancelled();

        info!(tasks = n, concurrency, "starting run");

        loop {
            while !cancelled && running.len() < concurrency {
                let Some(idx) = ready.pop_front() else {
                    break;
                };
                status[idx] = TaskStatus::Running;
                let task = graph.task(idx).clone();
                let ctx = self.ctx.clone();
                // nested spawn so a panicking worker still reports its index
                running.spawn(async move { (idx, tokio::spawn(run_task(ctx, task)).await) });
            }

            if running.is_empty() {
                break;
            }

            let joined = tokio::select! {
                joined = running.join_next() => joined,
                _ = self.ctx.cancel.cancelled(), if !cancelled => {
                    warn!("run cancelled, waiting for in-flight tasks");
                    cancelled = true;
                    continue;
                }
                _ = wait_until(deadline), if !cancelled => {
                    warn!("run timed out, cancelling");
                    cancelled = true;
                    self.ctx.cancel.cancel();
                    continue;
                }
            };

            let (idx, result) = match joined {
                Some(Ok((idx, Ok(result)))) => (idx, result),
                Some(Ok((idx, Err(e)))) => {
                    error!(task = %graph.task(idx).id, error = %e, "task worker panicked");
                    let result = TaskResult::failed(
                        graph.task(idx).id.clone(),
                        None,
                        Duration::ZERO,
                        format!("task worker panicked: {}", e),
                    );
                    self.ctx.reporter.report(&TaskEvent::Failed {
                        id: result.id.clone(),
                        duration: Duration::ZERO,
                        error: e.to_string(),
                    });
                    (idx, result)
                }
                Some(Err(e)) => {
                    error!(error = %e, "scheduler worker lost");
                    continue;
                }
                None => break,
            };

            status[idx] = result.status;
            let outcome = result.status;
            results[idx] = Some(result);

            if outcome.is_success() {
                for &dependent in graph.dependents(idx) {
                    remaining[dependent] -= 1;
                    if remaining[dependent] == 0 && status[dependent] == TaskStatus::Pending {
                        status[dependent] = TaskStatus::Ready;
                        ready.push_back(dependent);
                    }
                }
            } else if outcome == TaskStatus::Failed {
                // a task killed by cancellation did not fail on its own
                let reason = if cancelled || self.ctx.cancel.is_cancelled() {
                    SkipReason::Cancelled
                } else {
                    SkipReason::DependencyFailed(graph.task(idx).id.clone())
                };
                self.skip_dependents(graph, idx, reason, &mut status, &mut results);
            }
        }

        // whatever never reached a terminal state was cut off by cancellation
        for idx in 0..n {
            if results[idx].is_none() {
                let id = graph.task(idx).id.clone();
                self.ctx.reporter.report(&TaskEvent::Skipped {
                    id: id.clone(),
                    reason: SkipReason::Cancelled.to_string(),
                });
                results[idx] = Some(TaskResult::skipped(id, SkipReason::Cancelled));
            }
        }

        let results: Vec<TaskResult> = results.into_iter().flatten().collect();
        let count = |s: TaskStatus| results.iter().filter(|r| r.status == s).count();
        let duration = start.elapsed();
        self.ctx.reporter.report(&TaskEvent::AllCompleted {
            total: results.len(),
            succeeded: results.iter().filter(|r| r.status.is_success()).count(),
            failed: count(TaskStatus::Failed),
            cached: count(TaskStatus::CachedHit),
            skipped: count(TaskStatus::Skipped),
            duration,
        });

        RunResults::new(results, duration, cancelled || self.ctx.cancel.is_cancelled())
    }

    /// Mark every transitive dependent of a failed task as skipped
    fn skip_dependents(
        &self,
        graph: &TaskGraph,
        failed: TaskIndex,
        reason: SkipReason,
        status: &mut [TaskStatus],
        results: &mut [Option<TaskResult>],
    ) {
        let failed_id = graph.task(failed).id.clone();
        let mut queue: VecDeque<TaskIndex> = graph.dependents(failed).iter().copied().collect();

        while let Some(idx) = queue.pop_front() {
            if status[idx] != TaskStatus::Pending {
                continue;
            }
            status[idx] = TaskStatus::Skipped;
            let id = graph.task(idx).id.clone();
            debug!(task = %id, dependency = %failed_id, %reason, "skipping dependent of failed task");
            self.ctx.reporter.report(&TaskEvent::Skipped {
                id: id.clone(),
                reason: reason.to_string(),
            });
            results[idx] = Some(TaskResult::skipped(id, reason.clone()));
            queue.extend(graph.dependents(idx).iter().copied());
        }
    }
}

async fn wait_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Run a blocking closure off the async workers, flattening both error layers
async fn blocking<T, E, F>(f: F) -> Result<T, String>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("blocking task failed: {}", e)),
    }
}

/// Hash, look up and replay or execute a single task
async fn run_task(ctx: Arc<RunContext>, task: Task) -> TaskResult {
    let start = Instant::now();
    let id = task.id.clone();

    let hash = if ctx.cache.is_cacheable(&id.target) {
        let hasher = ctx.hasher.clone();
        let to_hash = task.clone();
        match blocking(move || hasher.hash(&to_hash)).await {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!(task = %id, error = %e, "hashing failed, running uncached");
                None
            }
        }
    } else {
        None
    };

    if let (Some(hash), false) = (&hash, ctx.options.skip_cache) {
        if let Some(result) = try_cache(&ctx, &task, hash, start).await {
            return result;
        }
    }

    if ctx.cancel.is_cancelled() {
        ctx.reporter.report(&TaskEvent::Skipped {
            id: id.clone(),
            reason: SkipReason::Cancelled.to_string(),
        });
        return TaskResult::skipped(id, SkipReason::Cancelled);
    }

    ctx.reporter.report(&TaskEvent::Started {
        id: id.clone(),
        command: task.command.clone(),
    });

    let executed = ctx
        .executor
        .execute(&task, ctx.reporter.as_ref(), ctx.cancel.clone())
        .await;
    let duration = start.elapsed();

    let output = match executed {
        Ok(output) => output,
        Err(e) => {
            let error = match e {
                ExecutionError::Cancelled => "cancelled".to_string(),
                other => other.to_string(),
            };
            ctx.reporter.report(&TaskEvent::Failed {
                id: id.clone(),
                duration,
                error: error.clone(),
            });
            return TaskResult::failed(id, hash, duration, error);
        }
    };

    if !output.success() {
        let error = format!("command exited with code {}", output.exit_code);
        ctx.reporter.report(&TaskEvent::Failed {
            id: id.clone(),
            duration,
            error: error.clone(),
        });
        return TaskResult {
            status: TaskStatus::Failed,
            exit_code: Some(output.exit_code),
            stdout: output.stdout,
            stderr: output.stderr,
            ..TaskResult::failed(id, hash, duration, error)
        };
    }

    if let Some(hash) = &hash {
        if ctx.cancel.is_cancelled() {
            debug!(task = %id, "run cancelled, not storing result");
        } else {
            let cache = ctx.cache.clone();
            let (to_store, stored_hash, stored_output) = (task.clone(), hash.clone(), output.clone());
            match blocking(move || cache.store(&stored_hash, &to_store, &stored_output, duration)).await {
                Ok(outcome) => debug!(task = %id, ?outcome, "cache store"),
                Err(e) => warn!(task = %id, error = %e, "failed to store cache entry"),
            }
        }
    }

    ctx.reporter.report(&TaskEvent::Completed {
        id: id.clone(),
        duration,
        cached: false,
    });

    TaskResult {
        id,
        status: TaskStatus::Succeeded,
        hash,
        duration,
        stdout: output.stdout,
        stderr: output.stderr,
        exit_code: Some(output.exit_code),
        error: None,
        skip_reason: None,
    }
}

/// Serve a task from the cache. `None` means it has to execute.
async fn try_cache(
    ctx: &Arc<RunContext>,
    task: &Task,
    hash: &TaskHash,
    start: Instant,
) -> Option<TaskResult> {
    let id = &task.id;
    let cache = ctx.cache.clone();
    let lookup_hash = hash.clone();
    let entry = match blocking(move || cache.lookup(&lookup_hash)).await {
        Ok(CacheLookup::Hit(entry)) => entry,
        Ok(CacheLookup::Miss) => {
            debug!(task = %id, %hash, "cache miss");
            return None;
        }
        Err(e) => {
            warn!(task = %id, error = %e, "cache lookup failed, executing");
            return None;
        }
    };

    let cache = ctx.cache.clone();
    let replayed: Arc<CacheEntry> = Arc::from(entry);
    let to_replay = replayed.clone();
    if let Err(e) = blocking(move || cache.replay(&to_replay)).await {
        warn!(task = %id, error = %e, "cache replay failed, executing");
        return None;
    }

    ctx.reporter.report(&TaskEvent::CacheHit {
        id: id.clone(),
        hash: hash.clone(),
    });
    for (text, is_stderr) in [(&replayed.stdout, false), (&replayed.stderr, true)] {
        for line in text.lines() {
            ctx.reporter.report(&TaskEvent::Output {
                id: id.clone(),
                line: line.to_string(),
                is_stderr,
                replayed: true,
            });
        }
    }

    let duration = start.elapsed();
    ctx.reporter.report(&TaskEvent::Completed {
        id: id.clone(),
        duration,
        cached: true,
    });

    Some(TaskResult {
        id: id.clone(),
        status: TaskStatus::CachedHit,
        hash: Some(hash.clone()),
        duration,
        stdout: replayed.stdout.clone(),
        stderr: replayed.stderr.clone(),
        exit_code: Some(replayed.exit_code),
        error: None,
        skip_reason: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::path::Path;

    use strata_core::{Project, ProjectGraph, SourceFilter, TargetConfig};
    use tempfile::TempDir;

    use crate::reporter::CollectingReporter;
    use crate::test_support::{write, RecordingExecutor, Step};

    const SHARED: &str = "package.json";

    fn build_target() -> TargetConfig {
        TargetConfig {
            command: "build {root}".to_string(),
            outputs: vec!["dist/{root}".to_string()],
        }
    }

    /// Two independent apps, A1 and A2
    fn apps(temp: &TempDir) -> ProjectGraph {
        write(temp.path(), "apps/a1/src/main.ts", "a1");
        write(temp.path(), "apps/a2/src/main.ts", "a2");
        write(temp.path(), SHARED, "{}");
        ProjectGraph::from_projects(vec![
            Project::new("a1", "apps/a1").with_target("build", build_target()),
            Project::new("a2", "apps/a2").with_target("build", build_target()),
        ])
        .unwrap()
    }

    /// app depends on lib1 and lib2; lib2 depends on core
    fn layered(temp: &TempDir) -> ProjectGraph {
        for root in ["apps/app", "libs/lib1", "libs/lib2", "libs/core"] {
            write(temp.path(), &format!("{}/src/index.ts", root), root);
        }
        ProjectGraph::from_projects(vec![
            Project::new("app", "apps/app")
                .with_dependency("lib1")
                .with_dependency("lib2")
                .with_target("build", build_target()),
            Project::new("lib1", "libs/lib1").with_target("build", build_target()),
            Project::new("lib2", "libs/lib2")
                .with_dependency("core")
                .with_target("build", build_target()),
            Project::new("core", "libs/core").with_target("build", build_target()),
        ])
        .unwrap()
    }

    struct Harness {
        executor: Arc<RecordingExecutor>,
        reporter: Arc<CollectingReporter>,
        scheduler: TaskScheduler,
    }

    fn harness(root: &Path, projects: &ProjectGraph, executor: RecordingExecutor, options: SchedulerOptions) -> Harness {
        let projects = Arc::new(projects.clone());
        let filter = SourceFilter::new(&["dist".to_string(), ".strata".to_string()]).unwrap();
        let hasher = Hasher::new(root, projects, filter, vec![SHARED.to_string()], BTreeMap::new());
        let cache = TaskCache::new(root, root.join(".strata/cache"), ["build"]);
        let executor = Arc::new(executor);
        let reporter = Arc::new(CollectingReporter::default());
        let scheduler = TaskScheduler::new(RunContext {
            executor: executor.clone(),
            cache: Arc::new(cache),
            hasher: Arc::new(hasher),
            reporter: reporter.clone(),
            options,
            cancel: CancellationToken::new(),
        });
        Harness {
            executor,
            reporter,
            scheduler,
        }
    }

    async fn run(root: &Path, projects: &ProjectGraph, requested: &[&str], options: SchedulerOptions) -> (RunResults, Harness) {
        let requested: Vec<TaskId> = requested
            .iter()
            .map(|p| TaskId::new(*p, "build"))
            .collect();
        let graph = TaskGraph::build(projects, &requested, true).unwrap();
        let harness = harness(root, projects, RecordingExecutor::new(root), options);
        let results = harness.scheduler.execute(&graph).await;
        (results, harness)
    }

    fn cached_projects(results: &RunResults) -> Vec<String> {
        results
            .cached()
            .iter()
            .map(|r| r.id.project.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_cache_hits_across_runs() {
        let temp = TempDir::new().unwrap();
        let projects = apps(&temp);
        let requested = ["a1", "a2"];

        let (first, h) = run(temp.path(), &projects, &requested, SchedulerOptions::default()).await;
        assert!(first.all_succeeded());
        assert!(first.cached().is_empty());
        assert_eq!(h.executor.executed().len(), 2);
        let original = std::fs::read(temp.path().join("dist/apps/a1/out.txt")).unwrap();

        std::fs::remove_dir_all(temp.path().join("dist")).unwrap();
        let (second, h) = run(temp.path(), &projects, &requested, SchedulerOptions::default()).await;
        assert_eq!(cached_projects(&second), vec!["a1", "a2"]);
        assert!(h.executor.executed().is_empty());
        assert_eq!(
            std::fs::read(temp.path().join("dist/apps/a1/out.txt")).unwrap(),
            original
        );
        assert_eq!(
            h.reporter.output_lines(&TaskId::new("a1", "build")),
            vec!["built a1:build"]
        );

        write(temp.path(), "apps/a1/src/main.ts", "a1 changed");
        let (third, h) = run(temp.path(), &projects, &requested, SchedulerOptions::default()).await;
        assert_eq!(cached_projects(&third), vec!["a2"]);
        assert_eq!(h.executor.executed(), vec![TaskId::new("a1", "build")]);

        write(temp.path(), SHARED, "{\"changed\": true}");
        let (fourth, _) = run(temp.path(), &projects, &requested, SchedulerOptions::default()).await;
        assert!(fourth.cached().is_empty());
    }

    #[tokio::test]
    async fn test_skip_cache_executes_but_stores() {
        let temp = TempDir::new().unwrap();
        let projects = apps(&temp);
        let bypass = SchedulerOptions {
            skip_cache: true,
            ..Default::default()
        };

        let (first, h) = run(temp.path(), &projects, &["a1"], bypass.clone()).await;
        assert!(first.all_succeeded());
        assert_eq!(h.executor.executed().len(), 1);

        let (again, h) = run(temp.path(), &projects, &["a1"], bypass).await;
        assert!(again.cached().is_empty());
        assert_eq!(h.executor.executed().len(), 1);

        let (cached, h) = run(temp.path(), &projects, &["a1"], SchedulerOptions::default()).await;
        assert_eq!(cached_projects(&cached), vec!["a1"]);
        assert!(h.executor.executed().is_empty());
    }

    #[tokio::test]
    async fn test_non_cacheable_target_always_runs() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "apps/a1/src/main.ts", "a1");
        let projects = ProjectGraph::from_projects(vec![
            Project::new("a1", "apps/a1").with_target("serve", build_target()),
        ])
        .unwrap();
        let graph = TaskGraph::build(&projects, &[TaskId::new("a1", "serve")], false).unwrap();

        for _ in 0..2 {
            let h = harness(temp.path(), &projects, RecordingExecutor::new(temp.path()), SchedulerOptions::default());
            let results = h.scheduler.execute(&graph).await;
            assert_eq!(results.results()[0].status, TaskStatus::Succeeded);
            assert!(results.results()[0].hash.is_none());
            assert_eq!(h.executor.executed().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_dependencies_finish_before_dependents_start() {
        let temp = TempDir::new().unwrap();
        let projects = layered(&temp);
        let graph = TaskGraph::build(&projects, &[TaskId::new("app", "build")], true).unwrap();
        let executor = RecordingExecutor::new(temp.path()).with_delay(Duration::from_millis(10));
        let options = SchedulerOptions {
            concurrency: 4,
            ..Default::default()
        };
        let h = harness(temp.path(), &projects, executor, options);

        let results = h.scheduler.execute(&graph).await;
        assert!(results.all_succeeded());

        let steps = h.executor.steps();
        let position: HashMap<Step, usize> = steps
            .iter()
            .enumerate()
            .map(|(pos, step)| (step.clone(), pos))
            .collect();
        for task in graph.tasks() {
            for dep in graph.dependency_ids(&task.id) {
                assert!(
                    position[&Step::Finish(dep.clone())] < position[&Step::Start(task.id.clone())],
                    "{} started before {} finished",
                    task.id,
                    dep
                );
            }
        }
    }

    #[tokio::test]
    async fn test_concurrency_limit() {
        let temp = TempDir::new().unwrap();
        let projects = layered(&temp);
        let requested: Vec<TaskId> = ["app", "lib1", "lib2", "core"]
            .iter()
            .map(|p| TaskId::new(*p, "build"))
            .collect();
        let graph = TaskGraph::build(&projects, &requested, false).unwrap();
        let executor = RecordingExecutor::new(temp.path()).with_delay(Duration::from_millis(20));
        let options = SchedulerOptions {
            concurrency: 2,
            skip_cache: true,
            ..Default::default()
        };
        let h = harness(temp.path(), &projects, executor, options);

        let results = h.scheduler.execute(&graph).await;
        assert!(results.all_succeeded());
        assert_eq!(h.executor.max_running(), 2);
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_only() {
        let temp = TempDir::new().unwrap();
        let projects = layered(&temp);
        let graph = TaskGraph::build(&projects, &[TaskId::new("app", "build")], true).unwrap();
        let executor = RecordingExecutor::new(temp.path()).failing("core");
        let h = harness(temp.path(), &projects, executor, SchedulerOptions::default());

        let results = h.scheduler.execute(&graph).await;

        assert!(results.has_failures());
        let status = |p: &str| results.get(&TaskId::new(p, "build")).unwrap().status;
        assert_eq!(status("core"), TaskStatus::Failed);
        assert_eq!(status("lib1"), TaskStatus::Succeeded);
        assert_eq!(status("lib2"), TaskStatus::Skipped);
        assert_eq!(status("app"), TaskStatus::Skipped);

        let app = results.get(&TaskId::new("app", "build")).unwrap();
        assert_eq!(
            app.skip_reason,
            Some(SkipReason::DependencyFailed(TaskId::new("core", "build")))
        );
        assert_eq!(app.skip_reason.as_ref().unwrap().to_string(), "core failed");

        let executed = h.executor.executed();
        assert!(!executed.contains(&TaskId::new("lib2", "build")));
        assert!(!executed.contains(&TaskId::new("app", "build")));
    }

    #[tokio::test]
    async fn test_failed_results_are_not_cached() {
        let temp = TempDir::new().unwrap();
        let projects = apps(&temp);
        let graph = TaskGraph::build(&projects, &[TaskId::new("a1", "build")], false).unwrap();

        let failing = harness(
            temp.path(),
            &projects,
            RecordingExecutor::new(temp.path()).failing("a1"),
            SchedulerOptions::default(),
        );
        assert!(failing.scheduler.execute(&graph).await.has_failures());

        let h = harness(temp.path(), &projects, RecordingExecutor::new(temp.path()), SchedulerOptions::default());
        let results = h.scheduler.execute(&graph).await;
        assert!(results.cached().is_empty());
        assert_eq!(h.executor.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_skips_pending_and_stores_nothing() {
        let temp = TempDir::new().unwrap();
        let projects = layered(&temp);
        let graph = TaskGraph::build(&projects, &[TaskId::new("app", "build")], true).unwrap();
        let executor = RecordingExecutor::new(temp.path()).with_delay(Duration::from_secs(30));
        let options = SchedulerOptions {
            concurrency: 4,
            ..Default::default()
        };
        let h = harness(temp.path(), &projects, executor, options);

        let cancel = h.scheduler.context().cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let results = h.scheduler.execute(&graph).await;
        assert!(results.is_cancelled());
        assert!(!results.all_succeeded());

        // core and lib1 were in flight, the rest never started
        let status = |p: &str| results.get(&TaskId::new(p, "build")).unwrap().status;
        assert_eq!(status("core"), TaskStatus::Failed);
        assert_eq!(status("lib1"), TaskStatus::Failed);
        assert_eq!(status("lib2"), TaskStatus::Skipped);
        // nothing failed on its own, so no skip blames a dependency
        for skipped in results.skipped() {
            assert_eq!(skipped.skip_reason, Some(SkipReason::Cancelled), "{}", skipped.id);
        }
        assert_eq!(
            results.get(&TaskId::new("app", "build")).unwrap().skip_reason,
            Some(SkipReason::Cancelled)
        );
        assert_eq!(h.scheduler.context().cache.status().unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_timeout_cancels_run() {
        let temp = TempDir::new().unwrap();
        let projects = apps(&temp);
        let graph = TaskGraph::build(&projects, &[TaskId::new("a1", "build")], false).unwrap();
        let executor = RecordingExecutor::new(temp.path()).with_delay(Duration::from_secs(30));
        let options = SchedulerOptions {
            timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let h = harness(temp.path(), &projects, executor, options);

        let results = h.scheduler.execute(&graph).await;
        assert!(results.is_cancelled());
        assert_eq!(results.failed().len(), 1);
    }

    #[tokio::test]
    async fn test_emits_all_completed() {
        let temp = TempDir::new().unwrap();
        let projects = apps(&temp);
        let (_, h) = run(temp.path(), &projects, &["a1", "a2"], SchedulerOptions::default()).await;

        let summary = h.reporter.events().into_iter().find_map(|e| match e {
            TaskEvent::AllCompleted {
                total, succeeded, ..
            } => Some((total, succeeded)),
            _ => None,
        });
        assert_eq!(summary, Some((2, 2)));
    }
}
