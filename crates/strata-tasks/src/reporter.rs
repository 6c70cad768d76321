//! Task execution reporting

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::hasher::TaskHash;
use crate::task::TaskId;

/// Events emitted during task execution
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// A task is starting execution
    Started { id: TaskId, command: String },
    /// A task produced output, live or replayed from the cache
    Output {
        id: TaskId,
        line: String,
        is_stderr: bool,
        replayed: bool,
    },
    /// A task is being served from the cache; replayed output follows
    CacheHit { id: TaskId, hash: TaskHash },
    /// A task completed successfully
    Completed {
        id: TaskId,
        duration: Duration,
        cached: bool,
    },
    /// A task failed
    Failed {
        id: TaskId,
        duration: Duration,
        error: String,
    },
    /// A task never ran
    Skipped { id: TaskId, reason: String },
    /// All tasks completed
    AllCompleted {
        total: usize,
        succeeded: usize,
        failed: usize,
        cached: usize,
        skipped: usize,
        duration: Duration,
    },
}

/// Trait for reporting task execution progress
pub trait TaskReporter: Send + Sync {
    /// Handle a task event
    fn report(&self, event: &TaskEvent);
}

/// Simple reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Started { id, command } => {
                tracing::info!("Starting {}: {}", id, command);
            }
            TaskEvent::Output {
                id,
                line,
                is_stderr,
                replayed,
            } => {
                if *is_stderr {
                    tracing::warn!(replayed, "[{}] {}", id, line);
                } else {
                    tracing::debug!(replayed, "[{}] {}", id, line);
                }
            }
            TaskEvent::CacheHit { id, hash } => {
                tracing::info!(%hash, "{} served from cache", id);
            }
            TaskEvent::Completed {
                id,
                duration,
                cached,
            } => {
                if *cached {
                    tracing::info!("{} completed (cached) in {:.1}s", id, duration.as_secs_f64());
                } else {
                    tracing::info!("{} completed in {:.1}s", id, duration.as_secs_f64());
                }
            }
            TaskEvent::Failed {
                id,
                duration,
                error,
            } => {
                tracing::error!("{} failed after {:.1}s: {}", id, duration.as_secs_f64(), error);
            }
            TaskEvent::Skipped { id, reason } => {
                tracing::info!("{} skipped: {}", id, reason);
            }
            TaskEvent::AllCompleted {
                total,
                succeeded,
                failed,
                cached,
                skipped,
                duration,
            } => {
                tracing::info!(
                    "All tasks complete: {}/{} succeeded, {} failed, {} cached, {} skipped ({:.1}s)",
                    succeeded,
                    total,
                    failed,
                    cached,
                    skipped,
                    duration.as_secs_f64()
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Output lines reported for a task, in order
    pub fn output_lines(&self, id: &TaskId) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TaskEvent::Output { id: ref e, line, .. } if e == id => Some(line),
                _ => None,
            })
            .collect()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Fan-out over several reporters
pub struct TaskReporterRegistry {
    reporters: Vec<Arc<dyn TaskReporter>>,
}

impl TaskReporterRegistry {
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(TracingReporter)],
        }
    }

    pub fn register<R: TaskReporter + 'static>(&mut self, reporter: R) {
        self.reporters.push(Arc::new(reporter));
    }

    /// Broadcast an event to all registered reporters
    pub fn broadcast(&self, event: &TaskEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}

impl Default for TaskReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: TaskReporter + ?Sized> TaskReporter for Arc<R> {
    fn report(&self, event: &TaskEvent) {
        (**self).report(event);
    }
}

impl TaskReporter for TaskReporterRegistry {
    fn report(&self, event: &TaskEvent) {
        self.broadcast(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::default();
        let id = TaskId::new("core", "build");

        reporter.report(&TaskEvent::Started {
            id: id.clone(),
            command: "cargo build".to_string(),
        });
        reporter.report(&TaskEvent::Output {
            id: id.clone(),
            line: "compiling".to_string(),
            is_stderr: false,
            replayed: false,
        });
        reporter.report(&TaskEvent::Completed {
            id: id.clone(),
            duration: Duration::from_secs(5),
            cached: false,
        });

        assert_eq!(reporter.events().len(), 3);
        assert_eq!(reporter.output_lines(&id), vec!["compiling"]);
    }

    #[test]
    fn test_registry_forwards_alongside_tracing() {
        let collecting = Arc::new(CollectingReporter::default());
        let mut registry = TaskReporterRegistry::new();
        registry.register(collecting.clone());

        let reporter: &dyn TaskReporter = &registry;
        reporter.report(&TaskEvent::Started {
            id: TaskId::new("core", "build"),
            command: "cargo build".to_string(),
        });
        reporter.report(&TaskEvent::Skipped {
            id: TaskId::new("app", "build"),
            reason: "cancelled".to_string(),
        });

        let events = collecting.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], TaskEvent::Skipped { reason, .. } if reason == "cancelled"));
    }

    #[test]
    fn test_registry_fans_out_to_every_reporter() {
        let first = Arc::new(CollectingReporter::default());
        let second = Arc::new(CollectingReporter::default());
        let mut registry = TaskReporterRegistry::new();
        registry.register(first.clone());
        registry.register(second.clone());

        registry.broadcast(&TaskEvent::CacheHit {
            id: TaskId::new("lib", "build"),
            hash: crate::hasher::TaskHash::new("ab".repeat(32)),
        });

        assert_eq!(first.events().len(), 1);
        assert_eq!(second.events().len(), 1);
    }
}
