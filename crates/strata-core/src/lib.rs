//! Strata Core - Core library for the Strata task runner
//!
//! This crate provides configuration loading, error handling and the
//! project graph consumed by the task orchestration engine.

pub mod config;
pub mod error;
pub mod project;

pub use config::{Config, LoadedConfig, ProjectConfig, TargetConfig, TasksConfig};
pub use error::{ConfigError, ProjectError, Result, StrataError};
pub use project::{affected_projects, expand_placeholders, Project, ProjectGraph, SourceFilter};
