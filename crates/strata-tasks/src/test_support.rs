//! Shared fixtures for unit tests

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::executor::{ExecutionError, ExecutionOutput, TaskExecutor};
use crate::hasher::TaskHash;
use crate::reporter::{TaskEvent, TaskReporter};
use crate::task::{Task, TaskId};

pub fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

pub fn hash_of(seed: &str) -> TaskHash {
    TaskHash::new(format!("{:x}", Sha256::digest(seed.as_bytes())))
}

/// Start or finish of a task, in the order the executor saw them
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    Start(TaskId),
    Finish(TaskId),
}

/// In-memory executor that records every invocation.
///
/// Each declared output is created as a directory holding `out.txt`, whose
/// contents depend only on the task id.
#[derive(Debug)]
pub struct RecordingExecutor {
    root: PathBuf,
    failing: BTreeSet<String>,
    delay: Option<Duration>,
    steps: Mutex<Vec<Step>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl RecordingExecutor {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            failing: BTreeSet::new(),
            delay: None,
            steps: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    /// Make every task of a project exit with status 1
    pub fn failing(mut self, project: &str) -> Self {
        self.failing.insert(project.to_string());
        self
    }

    /// Sleep before finishing each task
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn steps(&self) -> Vec<Step> {
        self.steps.lock().unwrap().clone()
    }

    /// Tasks that were executed, in start order
    pub fn executed(&self) -> Vec<TaskId> {
        self.steps()
            .into_iter()
            .filter_map(|step| match step {
                Step::Start(id) => Some(id),
                Step::Finish(_) => None,
            })
            .collect()
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskExecutor for RecordingExecutor {
    async fn execute(
        &self,
        task: &Task,
        reporter: &dyn TaskReporter,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutput, ExecutionError> {
        self.steps.lock().unwrap().push(Step::Start(task.id.clone()));
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let result = async {
            if let Some(delay) = self.delay {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            if self.failing.contains(&task.id.project) {
                return Ok(ExecutionOutput {
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: format!("{} failed\n", task.id),
                });
            }

            for output in &task.outputs {
                write(&self.root.join(output), "out.txt", &format!("{} output\n", task.id));
            }
            let line = format!("built {}", task.id);
            reporter.report(&TaskEvent::Output {
                id: task.id.clone(),
                line: line.clone(),
                is_stderr: false,
                replayed: false,
            });
            Ok(ExecutionOutput {
                exit_code: 0,
                stdout: format!("{}\n", line),
                stderr: String::new(),
            })
        }
        .await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.steps.lock().unwrap().push(Step::Finish(task.id.clone()));
        result
    }
}
