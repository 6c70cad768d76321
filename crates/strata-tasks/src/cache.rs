//! Content-addressable task cache
//!
//! Each entry lives in `<cache>/<hash>/` and holds `entry.json` plus the
//! task's output files under `outputs/`. Entries are assembled in
//! `<cache>/.staging/` and published with a single directory rename, so a
//! reader sees either a complete entry or none.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use strata_core::project::relative_to;
use strata_core::TasksConfig;

use crate::executor::ExecutionOutput;
use crate::hasher::TaskHash;
use crate::task::{Task, TaskId};

const ENTRY_FILE: &str = "entry.json";
const OUTPUTS_DIR: &str = "outputs";
const STAGING_DIR: &str = ".staging";

/// An output file captured in a cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedFile {
    /// Workspace-relative path (forward slashes)
    pub path: String,
    /// Size in bytes
    pub size: u64,
    /// SHA-256 of the contents
    pub sha256: String,
}

/// A symbolic link captured in a cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedSymlink {
    /// Workspace-relative path of the link
    pub path: String,
    /// Link target, exactly as read from the filesystem
    pub target: String,
}

/// A cached task result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Hash the entry is stored under
    pub hash: TaskHash,
    /// Task that produced it
    pub task_id: TaskId,
    /// Command that was executed
    pub command: String,
    /// Exit code of the command
    pub exit_code: i32,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Output files stored with the entry
    pub outputs: Vec<CachedFile>,
    /// Directories inside the outputs, recreated even when empty
    #[serde(default)]
    pub directories: Vec<String>,
    /// Symbolic links inside the outputs
    #[serde(default)]
    pub symlinks: Vec<CachedSymlink>,
    /// Output paths (or globs) declared by the task
    pub declared_outputs: Vec<String>,
    /// Original task duration
    pub duration_ms: u64,
    /// When this entry was created
    pub created_at: String,
}

/// Result of a cache lookup
#[derive(Debug)]
pub enum CacheLookup {
    /// A complete, valid entry exists
    Hit(Box<CacheEntry>),
    /// No usable entry
    Miss,
}

/// Result of a cache store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// A new entry was published
    Stored,
    /// A valid entry already existed and was left untouched
    AlreadyPresent,
}

/// Content-addressable task cache
#[derive(Debug, Clone)]
pub struct TaskCache {
    workspace_root: PathBuf,
    cache_dir: PathBuf,
    cacheable: BTreeSet<String>,
}

impl TaskCache {
    /// Create a new task cache
    pub fn new<I, S>(workspace_root: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>, cacheable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            workspace_root: workspace_root.into(),
            cache_dir: cache_dir.into(),
            cacheable: cacheable.into_iter().map(Into::into).collect(),
        }
    }

    /// Create the cache described by the workspace configuration.
    ///
    /// With caching disabled no target is cacheable.
    pub fn from_config(workspace_root: &Path, tasks: &TasksConfig) -> Self {
        let cacheable = if tasks.cache.enabled {
            tasks.cacheable_operations.clone()
        } else {
            Vec::new()
        };
        Self::new(workspace_root, workspace_root.join(&tasks.cache.dir), cacheable)
    }

    /// Whether results of a target may be cached
    pub fn is_cacheable(&self, target: &str) -> bool {
        self.cacheable.contains(target)
    }

    /// Get the cache directory
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn entry_dir(&self, hash: &TaskHash) -> PathBuf {
        self.cache_dir.join(hash.as_str())
    }

    /// Look up a cached result.
    ///
    /// An entry that fails validation is logged and reported as a miss.
    pub fn lookup(&self, hash: &TaskHash) -> Result<CacheLookup, CacheError> {
        if !self.entry_dir(hash).is_dir() {
            debug!(%hash, "cache miss");
            return Ok(CacheLookup::Miss);
        }

        match self.read_entry(hash) {
            Ok(entry) => {
                debug!(%hash, task = %entry.task_id, "cache hit");
                Ok(CacheLookup::Hit(Box::new(entry)))
            }
            Err(CacheError::Corrupt { reason, .. }) => {
                warn!(%hash, %reason, "corrupt cache entry, treating as miss");
                Ok(CacheLookup::Miss)
            }
            Err(e) => Err(e),
        }
    }

    /// Store a successful task result.
    ///
    /// A valid entry under the same hash is kept; a corrupt one is replaced.
    pub fn store(
        &self,
        hash: &TaskHash,
        task: &Task,
        output: &ExecutionOutput,
        duration: Duration,
    ) -> Result<StoreOutcome, CacheError> {
        let final_dir = self.entry_dir(hash);
        let staging_root = self.cache_dir.join(STAGING_DIR);
        fs::create_dir_all(&staging_root)?;

        if final_dir.exists() {
            match self.read_entry(hash) {
                Ok(_) => {
                    debug!(%hash, "cache entry already present");
                    return Ok(StoreOutcome::AlreadyPresent);
                }
                Err(e) => {
                    warn!(%hash, error = %e, "replacing unusable cache entry");
                    let trash = tempfile::Builder::new()
                        .prefix("trash-")
                        .tempdir_in(&staging_root)?;
                    fs::rename(&final_dir, trash.path().join(hash.as_str()))?;
                }
            }
        }

        let staging = tempfile::Builder::new()
            .prefix(&format!("{}-", hash))
            .tempdir_in(&staging_root)?;
        let staged = self.stage_outputs(&task.outputs, &staging.path().join(OUTPUTS_DIR))?;

        let entry = CacheEntry {
            hash: hash.clone(),
            task_id: task.id.clone(),
            command: task.command.clone(),
            exit_code: output.exit_code,
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
            outputs: staged.files,
            directories: staged.directories,
            symlinks: staged.symlinks,
            declared_outputs: task.outputs.clone(),
            duration_ms: duration.as_millis() as u64,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let json = serde_json::to_string_pretty(&entry)?;
        fs::write(staging.path().join(ENTRY_FILE), json)?;

        match fs::rename(staging.path(), &final_dir) {
            Ok(()) => {
                debug!(%hash, task = %task.id, files = entry.outputs.len(), "stored cache entry");
                Ok(StoreOutcome::Stored)
            }
            Err(_) if final_dir.exists() => {
                debug!(%hash, "cache entry published concurrently");
                Ok(StoreOutcome::AlreadyPresent)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Restore an entry's outputs into the workspace.
    ///
    /// Every stored file is verified before anything is touched. Existing
    /// paths matching the declared outputs are then removed so stale files
    /// do not survive. Directories and symlinks are recreated alongside the
    /// files. Returns the number of restored files.
    pub fn replay(&self, entry: &CacheEntry) -> Result<usize, CacheError> {
        let outputs_dir = self.entry_dir(&entry.hash).join(OUTPUTS_DIR);
        let corrupt = |reason: String| CacheError::Corrupt {
            hash: entry.hash.to_string(),
            reason,
        };

        let mut restored = Vec::with_capacity(entry.outputs.len());
        for file in &entry.outputs {
            if !is_safe_relative(&file.path) {
                return Err(corrupt(format!("unsafe output path '{}'", file.path)));
            }
            let bytes = fs::read(outputs_dir.join(&file.path))
                .map_err(|e| corrupt(format!("cannot read '{}': {}", file.path, e)))?;
            if sha256(&bytes) != file.sha256 {
                return Err(corrupt(format!("checksum mismatch for '{}'", file.path)));
            }
            restored.push((&file.path, bytes));
        }
        let unsafe_path = entry
            .directories
            .iter()
            .chain(entry.symlinks.iter().map(|link| &link.path))
            .find(|path| !is_safe_relative(path));
        if let Some(path) = unsafe_path {
            return Err(corrupt(format!("unsafe output path '{}'", path)));
        }

        for pattern in &entry.declared_outputs {
            for path in self.resolve_output(pattern)? {
                // a link is removed itself, never what it points to
                if fs::symlink_metadata(&path)?.is_dir() {
                    fs::remove_dir_all(&path)?;
                } else {
                    fs::remove_file(&path)?;
                }
            }
        }

        for dir in &entry.directories {
            fs::create_dir_all(self.workspace_root.join(dir))?;
        }
        for (path, bytes) in &restored {
            let target = self.workspace_root.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, bytes)?;
        }
        for link in &entry.symlinks {
            restore_symlink(&self.workspace_root.join(&link.path), &link.target)?;
        }

        debug!(hash = %entry.hash, files = restored.len(), "replayed cache entry");
        Ok(restored.len())
    }

    /// Remove old cache entries
    pub fn prune(&self, max_age: Duration) -> Result<PruneStats, CacheError> {
        info!(max_age_secs = max_age.as_secs(), "pruning cache");
        let mut stats = PruneStats::default();

        let cutoff = chrono::Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();

        for path in self.entry_dirs()? {
            stats.total += 1;

            let created = fs::read_to_string(path.join(ENTRY_FILE))
                .ok()
                .and_then(|contents| serde_json::from_str::<CacheEntry>(&contents).ok())
                .and_then(|entry| chrono::DateTime::parse_from_rfc3339(&entry.created_at).ok());

            // unreadable entries are never served, so they go too
            let expired = created.map_or(true, |created| created < cutoff);
            if expired && fs::remove_dir_all(&path).is_ok() {
                stats.removed += 1;
            } else {
                stats.kept += 1;
            }
        }

        info!(total = stats.total, removed = stats.removed, kept = stats.kept, "cache prune complete");
        Ok(stats)
    }

    /// Get cache statistics
    pub fn status(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats::default();

        for path in self.entry_dirs()? {
            stats.entries += 1;
            stats.total_size += WalkDir::new(&path)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter_map(|e| e.metadata().ok())
                .map(|m| m.len())
                .sum::<u64>();
        }

        Ok(stats)
    }

    /// Remove every entry. Returns the number of entries removed.
    pub fn clean(&self) -> Result<usize, CacheError> {
        let entries = self.entry_dirs()?.len();
        if self.cache_dir.exists() {
            fs::remove_dir_all(&self.cache_dir)?;
        }
        info!(entries, "cache cleaned");
        Ok(entries)
    }

    /// Published entry directories, skipping the staging area
    fn entry_dirs(&self) -> Result<Vec<PathBuf>, CacheError> {
        if !self.cache_dir.exists() {
            return Ok(Vec::new());
        }

        let mut dirs = Vec::new();
        for entry in fs::read_dir(&self.cache_dir)? {
            let entry = entry?;
            if entry.file_name() == STAGING_DIR || !entry.file_type()?.is_dir() {
                continue;
            }
            dirs.push(entry.path());
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Read and validate a published entry
    fn read_entry(&self, hash: &TaskHash) -> Result<CacheEntry, CacheError> {
        let dir = self.entry_dir(hash);
        let corrupt = |reason: String| CacheError::Corrupt {
            hash: hash.to_string(),
            reason,
        };

        let contents = fs::read_to_string(dir.join(ENTRY_FILE))
            .map_err(|e| corrupt(format!("cannot read {}: {}", ENTRY_FILE, e)))?;
        let entry: CacheEntry = serde_json::from_str(&contents)
            .map_err(|e| corrupt(format!("invalid {}: {}", ENTRY_FILE, e)))?;

        if &entry.hash != hash {
            return Err(corrupt(format!("entry is for hash {}", entry.hash)));
        }

        for file in &entry.outputs {
            if !is_safe_relative(&file.path) {
                return Err(corrupt(format!("unsafe output path '{}'", file.path)));
            }
            let size = fs::metadata(dir.join(OUTPUTS_DIR).join(&file.path))
                .map(|m| m.len())
                .map_err(|_| corrupt(format!("missing output '{}'", file.path)))?;
            if size != file.size {
                return Err(corrupt(format!(
                    "output '{}' is {} bytes, expected {}",
                    file.path, size, file.size
                )));
            }
        }

        Ok(entry)
    }

    /// Copy every file under the declared outputs into `dest`, recording
    /// directories and symlinks in place
    fn stage_outputs(&self, patterns: &[String], dest: &Path) -> Result<StagedOutputs, CacheError> {
        let mut sources: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut directories: BTreeSet<String> = BTreeSet::new();
        let mut symlinks: BTreeMap<String, String> = BTreeMap::new();

        for pattern in patterns {
            for path in self.resolve_output(pattern)? {
                for entry in WalkDir::new(&path).follow_links(false).follow_root_links(false) {
                    let entry = entry.map_err(|e| CacheError::Io(e.into()))?;
                    let relative = relative_to(&self.workspace_root, entry.path());
                    let file_type = entry.file_type();
                    if file_type.is_symlink() {
                        let target = fs::read_link(entry.path())?;
                        symlinks.insert(relative, target.to_string_lossy().replace('\\', "/"));
                    } else if file_type.is_dir() {
                        directories.insert(relative);
                    } else if file_type.is_file() {
                        sources.insert(relative, entry.into_path());
                    }
                }
            }
        }

        let mut files = Vec::with_capacity(sources.len());
        for (relative, source) in sources {
            let bytes = fs::read(&source)?;
            let target = dest.join(&relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, &bytes)?;
            files.push(CachedFile {
                path: relative,
                size: bytes.len() as u64,
                sha256: sha256(&bytes),
            });
        }

        Ok(StagedOutputs {
            files,
            directories: directories.into_iter().collect(),
            symlinks: symlinks
                .into_iter()
                .map(|(path, target)| CachedSymlink { path, target })
                .collect(),
        })
    }

    /// Existing workspace paths named by a declared output
    fn resolve_output(&self, pattern: &str) -> Result<Vec<PathBuf>, CacheError> {
        if !is_safe_relative(pattern) {
            return Err(CacheError::InvalidOutput {
                pattern: pattern.to_string(),
                reason: "outputs must stay inside the workspace".to_string(),
            });
        }

        if !pattern.contains(['*', '?', '[']) {
            let path = self.workspace_root.join(pattern);
            return Ok(if fs::symlink_metadata(&path).is_ok() {
                vec![path]
            } else {
                Vec::new()
            });
        }

        let full = self.workspace_root.join(pattern).to_string_lossy().to_string();
        let paths = glob::glob(&full).map_err(|e| CacheError::InvalidOutput {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(paths.flatten().collect())
    }
}

/// Outputs gathered while staging an entry
struct StagedOutputs {
    files: Vec<CachedFile>,
    directories: Vec<String>,
    symlinks: Vec<CachedSymlink>,
}

#[cfg(unix)]
fn restore_symlink(link: &Path, target: &str) -> std::io::Result<()> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)?;
    }
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn restore_symlink(link: &Path, target: &str) -> std::io::Result<()> {
    warn!(link = %link.display(), link_target = target, "symlinks are not restored on this platform");
    Ok(())
}

fn sha256(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Relative, and never climbing out of its base
fn is_safe_relative(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Statistics from a prune operation
#[derive(Debug, Default)]
pub struct PruneStats {
    /// Total entries found
    pub total: usize,
    /// Entries removed
    pub removed: usize,
    /// Entries kept
    pub kept: usize,
}

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Number of cache entries
    pub entries: usize,
    /// Total size in bytes
    pub total_size: u64,
}

impl CacheStats {
    /// Format total size in human-readable form
    pub fn formatted_size(&self) -> String {
        const KB: f64 = 1024.0;
        let size = self.total_size as f64;
        if size < KB {
            format!("{} B", self.total_size)
        } else if size < KB * KB {
            format!("{:.1} KB", size / KB)
        } else if size < KB * KB * KB {
            format!("{:.1} MB", size / (KB * KB))
        } else {
            format!("{:.1} GB", size / (KB * KB * KB))
        }
    }
}

/// Cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// IO error
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Cache serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored entry failed validation
    #[error("Corrupt cache entry {hash}: {reason}")]
    Corrupt { hash: String, reason: String },

    /// A declared output cannot be resolved
    #[error("Invalid output '{pattern}': {reason}")]
    InvalidOutput { pattern: String, reason: String },
}
