//! Configuration validation

use std::collections::HashSet;

use globset::Glob;
use tracing::debug;

use crate::error::{ConfigError, ProjectError, Result};

use super::types::{Config, TargetConfig};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_tasks(config)?;
    validate_targets(config)?;
    validate_projects(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_tasks(config: &Config) -> Result<()> {
    if config.tasks.parallel == Some(0) {
        return Err(invalid("tasks.parallel", "must be at least 1"));
    }

    if config.tasks.cache.dir.as_os_str().is_empty() {
        return Err(invalid("tasks.cache.dir", "cache directory cannot be empty"));
    }

    for pattern in &config.tasks.ignore {
        Glob::new(pattern).map_err(|e| ConfigError::InvalidGlob {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
    }

    Ok(())
}

fn validate_targets(config: &Config) -> Result<()> {
    for (name, target) in &config.targets {
        validate_target(&format!("targets.{}", name), target)?;
    }
    for project in &config.projects {
        for (name, target) in &project.targets {
            validate_target(
                &format!("projects.{}.targets.{}", project.name, name),
                target,
            )?;
        }
    }
    Ok(())
}

fn validate_target(field: &str, target: &TargetConfig) -> Result<()> {
    if target.command.trim().is_empty() {
        return Err(invalid(&format!("{}.command", field), "command cannot be empty"));
    }
    Ok(())
}

fn validate_projects(config: &Config) -> Result<()> {
    let mut names = HashSet::new();
    for project in &config.projects {
        if project.name.trim().is_empty() {
            return Err(invalid("projects.name", "project name cannot be empty"));
        }
        if !names.insert(project.name.as_str()) {
            return Err(ProjectError::DuplicateProject(project.name.clone()).into());
        }
    }

    for project in &config.projects {
        for dep in &project.dependencies {
            if !names.contains(dep.as_str()) {
                return Err(invalid(
                    &format!("projects.{}.dependencies", project.name),
                    &format!("unknown project '{}'", dep),
                ));
            }
        }
    }

    Ok(())
}

fn invalid(field: &str, message: &str) -> crate::error::StrataError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
    .into()
}
