//! Content hashing of task inputs

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use strata_core::{Config, ProjectGraph, SourceFilter, StrataError};

use crate::task::Task;

/// Bumped whenever the layout of the hash input changes
const HASH_VERSION: &str = "strata-task-hash-v1";

/// Recorded for shared inputs that do not exist
const MISSING: &str = "missing";

/// SHA-256 digest of a task's inputs, as 64 lowercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHash(String);

impl TaskHash {
    pub(crate) fn new(hex: String) -> Self {
        Self(hex)
    }

    /// Hex representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TaskHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Everything that went into a task hash
#[derive(Debug, Clone, Serialize)]
pub struct HashDetails {
    /// The resulting hash
    pub hash: TaskHash,
    /// Resolved command
    pub command: String,
    /// Source files of the project and its transitive dependencies
    pub files: BTreeMap<String, String>,
    /// Shared configuration inputs
    pub shared: BTreeMap<String, String>,
    /// Configured environment variables (unset ones are omitted)
    pub env: BTreeMap<String, String>,
}

/// Computes task hashes for one run.
///
/// File digests and project file lists are memoized, so a hasher must not
/// outlive the run it was created for.
#[derive(Debug)]
pub struct Hasher {
    workspace_root: PathBuf,
    projects: Arc<ProjectGraph>,
    filter: SourceFilter,
    shared_inputs: Vec<String>,
    env: BTreeMap<String, String>,
    digests: Mutex<HashMap<String, String>>,
    project_files: Mutex<HashMap<String, Vec<String>>>,
}

impl Hasher {
    /// Create a hasher with explicit environment values
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        projects: Arc<ProjectGraph>,
        filter: SourceFilter,
        shared_inputs: Vec<String>,
        env: BTreeMap<String, String>,
    ) -> Self {
        let mut shared_inputs = shared_inputs;
        shared_inputs.sort();
        shared_inputs.dedup();
        Self {
            workspace_root: workspace_root.into(),
            projects,
            filter,
            shared_inputs,
            env,
            digests: Mutex::new(HashMap::new()),
            project_files: Mutex::new(HashMap::new()),
        }
    }

    /// Create a hasher from workspace configuration, reading the configured
    /// environment variables from the current process
    pub fn from_config(
        workspace_root: &Path,
        config: &Config,
        projects: Arc<ProjectGraph>,
    ) -> Result<Self, HashError> {
        let filter = SourceFilter::from_config(config, &projects)?;
        let env = config
            .tasks
            .env
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|value| (name.clone(), value)))
            .collect();
        Ok(Self::new(
            workspace_root,
            projects,
            filter,
            config.tasks.shared_inputs.clone(),
            env,
        ))
    }

    /// Compute the hash of a task
    pub fn hash(&self, task: &Task) -> Result<TaskHash, HashError> {
        self.details(task).map(|details| details.hash)
    }

    /// Compute the hash of a task along with the inputs that produced it
    #[instrument(skip_all, fields(task = %task.id))]
    pub fn details(&self, task: &Task) -> Result<HashDetails, HashError> {
        let files = self.input_files(&task.id.project)?;
        let shared = self.shared_digests()?;

        let mut hasher = Sha256::new();
        let mut field = |tag: &str, value: &str| {
            hasher.update(tag.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        };

        field("version", HASH_VERSION);
        field("task", &task.id.to_string());
        field("command", &task.command);
        for output in &task.outputs {
            field("output", output);
        }
        for (path, digest) in &files {
            field("file", path);
            field("digest", digest);
        }
        for (path, digest) in &shared {
            field("shared", path);
            field("digest", digest);
        }
        for (name, value) in &self.env {
            field("env", name);
            field("value", value);
        }

        let hash = TaskHash::new(format!("{:x}", hasher.finalize()));
        debug!(hash = %hash, files = files.len(), "computed task hash");

        Ok(HashDetails {
            hash,
            command: task.command.clone(),
            files,
            shared,
            env: self.env.clone(),
        })
    }

    /// Digests of every source file of a project and its transitive dependencies
    fn input_files(&self, project: &str) -> Result<BTreeMap<String, String>, HashError> {
        let mut names = self.projects.transitive_dependencies(project);
        names.insert(project.to_string());

        let mut files = BTreeMap::new();
        for name in &names {
            for path in self.files_of(name)? {
                let digest = self.digest(&path)?;
                files.insert(path, digest);
            }
        }
        Ok(files)
    }

    fn files_of(&self, name: &str) -> Result<Vec<String>, HashError> {
        if let Some(files) = lock(&self.project_files).get(name) {
            return Ok(files.clone());
        }

        let project = self.projects.project(name)?;
        let files = self.filter.project_files(&self.workspace_root, project)?;
        lock(&self.project_files).insert(name.to_string(), files.clone());
        Ok(files)
    }

    fn shared_digests(&self) -> Result<BTreeMap<String, String>, HashError> {
        let mut shared = BTreeMap::new();
        for path in &self.shared_inputs {
            let digest = if self.workspace_root.join(path).is_file() {
                self.digest(path)?
            } else {
                MISSING.to_string()
            };
            shared.insert(path.clone(), digest);
        }
        Ok(shared)
    }

    fn digest(&self, relative: &str) -> Result<String, HashError> {
        if let Some(digest) = lock(&self.digests).get(relative) {
            return Ok(digest.clone());
        }

        let path = self.workspace_root.join(relative);
        let bytes = fs::read(&path).map_err(|source| HashError::Io {
            path: path.clone(),
            source,
        })?;
        let digest = format!("{:x}", Sha256::digest(&bytes));
        lock(&self.digests).insert(relative.to_string(), digest.clone());
        Ok(digest)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Errors while hashing task inputs
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// An input file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Project lookup or file enumeration failed
    #[error(transparent)]
    Project(#[from] StrataError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{Project, TargetConfig};
    use tempfile::TempDir;

    use crate::test_support::write;

    fn build_target() -> TargetConfig {
        TargetConfig {
            command: "build {root}".to_string(),
            outputs: vec!["dist/{root}".to_string()],
        }
    }

    /// app depends on lib; other is unrelated
    fn workspace(temp: &TempDir) -> Arc<ProjectGraph> {
        write(temp.path(), "apps/app/src/main.ts", "main");
        write(temp.path(), "libs/lib/src/index.ts", "lib");
        write(temp.path(), "libs/other/src/index.ts", "other");
        write(temp.path(), "package.json", "{}");
        Arc::new(
            ProjectGraph::from_projects(vec![
                Project::new("app", "apps/app")
                    .with_dependency("lib")
                    .with_target("build", build_target()),
                Project::new("lib", "libs/lib").with_target("build", build_target()),
                Project::new("other", "libs/other").with_target("build", build_target()),
            ])
            .unwrap(),
        )
    }

    fn hasher(temp: &TempDir, projects: &Arc<ProjectGraph>) -> Hasher {
        hasher_with_env(temp, projects, BTreeMap::new())
    }

    fn hasher_with_env(
        temp: &TempDir,
        projects: &Arc<ProjectGraph>,
        env: BTreeMap<String, String>,
    ) -> Hasher {
        let filter = SourceFilter::new(&["dist".to_string()]).unwrap();
        Hasher::new(
            temp.path(),
            projects.clone(),
            filter,
            vec!["package.json".to_string()],
            env,
        )
    }

    fn task(projects: &ProjectGraph, name: &str) -> Task {
        let project = projects.get(name).unwrap();
        Task::resolve(project, "build", project.target("build").unwrap())
    }

    #[test]
    fn test_hash_is_stable_hex() {
        let temp = TempDir::new().unwrap();
        let projects = workspace(&temp);
        let app = task(&projects, "app");

        let first = hasher(&temp, &projects).hash(&app).unwrap();
        let second = hasher(&temp, &projects).hash(&app).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 64);
        assert!(first
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_dependency_change_invalidates_dependent() {
        let temp = TempDir::new().unwrap();
        let projects = workspace(&temp);
        let app = task(&projects, "app");
        let lib = task(&projects, "lib");

        let app_before = hasher(&temp, &projects).hash(&app).unwrap();
        let lib_before = hasher(&temp, &projects).hash(&lib).unwrap();

        write(temp.path(), "apps/app/src/main.ts", "changed");
        let after = hasher(&temp, &projects);
        assert_ne!(after.hash(&app).unwrap(), app_before);
        assert_eq!(after.hash(&lib).unwrap(), lib_before);

        write(temp.path(), "libs/lib/src/index.ts", "changed");
        let after = hasher(&temp, &projects);
        assert_ne!(after.hash(&lib).unwrap(), lib_before);
    }

    #[test]
    fn test_unrelated_and_identical_rewrites_do_not_change_hash() {
        let temp = TempDir::new().unwrap();
        let projects = workspace(&temp);
        let app = task(&projects, "app");
        let before = hasher(&temp, &projects).hash(&app).unwrap();

        write(temp.path(), "libs/other/src/index.ts", "unrelated change");
        write(temp.path(), "apps/app/src/main.ts", "main");
        write(temp.path(), "dist/apps/app/main.js", "output");
        write(temp.path(), "README.md", "not a shared input");

        assert_eq!(hasher(&temp, &projects).hash(&app).unwrap(), before);
    }

    #[test]
    fn test_added_and_removed_files_change_hash() {
        let temp = TempDir::new().unwrap();
        let projects = workspace(&temp);
        let lib = task(&projects, "lib");
        let before = hasher(&temp, &projects).hash(&lib).unwrap();

        write(temp.path(), "libs/lib/src/extra.ts", "");
        let added = hasher(&temp, &projects).hash(&lib).unwrap();
        assert_ne!(added, before);

        fs::remove_file(temp.path().join("libs/lib/src/extra.ts")).unwrap();
        assert_eq!(hasher(&temp, &projects).hash(&lib).unwrap(), before);
    }

    #[test]
    fn test_shared_input_env_and_command_change_hash() {
        let temp = TempDir::new().unwrap();
        let projects = workspace(&temp);
        let other = task(&projects, "other");
        let before = hasher(&temp, &projects).hash(&other).unwrap();

        let mut changed_command = other.clone();
        changed_command.command.push_str(" --prod");
        assert_ne!(hasher(&temp, &projects).hash(&changed_command).unwrap(), before);

        let env = BTreeMap::from([("NODE_ENV".to_string(), "production".to_string())]);
        assert_ne!(
            hasher_with_env(&temp, &projects, env).hash(&other).unwrap(),
            before
        );

        write(temp.path(), "package.json", "{\"private\": true}");
        assert_ne!(hasher(&temp, &projects).hash(&other).unwrap(), before);
    }

    #[test]
    fn test_details_lists_transitive_files() {
        let temp = TempDir::new().unwrap();
        let projects = workspace(&temp);
        let details = hasher(&temp, &projects)
            .details(&task(&projects, "app"))
            .unwrap();

        let files: Vec<&str> = details.files.keys().map(String::as_str).collect();
        assert_eq!(files, vec!["apps/app/src/main.ts", "libs/lib/src/index.ts"]);
        assert_eq!(details.command, "build apps/app");
        assert!(details.shared.contains_key("package.json"));
    }

    #[test]
    fn test_missing_shared_input_is_recorded() {
        let temp = TempDir::new().unwrap();
        let projects = workspace(&temp);
        fs::remove_file(temp.path().join("package.json")).unwrap();

        let details = hasher(&temp, &projects)
            .details(&task(&projects, "lib"))
            .unwrap();
        assert_eq!(details.shared["package.json"], MISSING);
    }
}
