//! Exit codes for the CLI

use strata_core::{ProjectError, StrataError};
use strata_tasks::GraphError;

/// Success
pub const SUCCESS: i32 = 0;

/// General error, or at least one task failed
pub const ERROR: i32 = 1;

/// Configuration error
pub const CONFIG_ERROR: i32 = 2;

/// Graph validation error (cycle, unknown project or target)
pub const VALIDATION_ERROR: i32 = 5;

/// Cancelled by signal or timeout
pub const CANCELLED: i32 = 130;

/// A command that finished with a specific, non-zero exit code
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CommandExit {
    pub code: i32,
    pub message: String,
}

impl CommandExit {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Map an error to the process exit code
pub fn for_error(err: &anyhow::Error) -> i32 {
    if let Some(exit) = err.downcast_ref::<CommandExit>() {
        return exit.code;
    }
    if err.downcast_ref::<GraphError>().is_some() {
        return VALIDATION_ERROR;
    }
    match err.downcast_ref::<StrataError>() {
        Some(StrataError::Config(_)) | Some(StrataError::Toml(_)) => CONFIG_ERROR,
        Some(StrataError::Project(ProjectError::FileWalk { .. })) => ERROR,
        Some(StrataError::Project(_)) => VALIDATION_ERROR,
        _ => ERROR,
    }
}
