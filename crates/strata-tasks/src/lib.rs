//! Strata Tasks - Task orchestration engine
//!
//! This crate turns a project graph into a task graph, computes content
//! hashes for tasks, serves results from a content-addressed cache and
//! schedules the remaining work across a bounded pool of workers.

pub mod cache;
pub mod executor;
pub mod graph;
pub mod hasher;
pub mod reporter;
pub mod scheduler;
pub mod summary;
pub mod task;

#[cfg(test)]
mod test_support;

pub use cache::{CacheEntry, CachedFile, CachedSymlink, CacheError, CacheLookup, CacheStats, PruneStats, StoreOutcome, TaskCache};
pub use executor::{ExecutionError, ExecutionOutput, ShellExecutor, TaskExecutor};
pub use graph::{GraphError, TaskGraph, TaskIndex};
pub use hasher::{HashDetails, HashError, Hasher, TaskHash};
pub use reporter::{CollectingReporter, TaskEvent, TaskReporter, TaskReporterRegistry, TracingReporter};
pub use scheduler::{RunContext, RunResults, SchedulerOptions, SkipReason, TaskResult, TaskScheduler};
pub use summary::{render_header, single_task_banner, RunSummary, SkippedProject, CACHED_OUTPUT_MARKER};
pub use task::{Task, TaskId, TaskStatus};
