//! Hash command: show the input hash of a task

use anyhow::Context;
use clap::Args;
use tracing::info;

use strata_tasks::{Hasher, Task, TaskId};

use super::workspace::Workspace;
use crate::cli::{output, Cli, OutputFormat};
use crate::exit_codes::{self, CommandExit};

/// Print the input hash of a task
#[derive(Debug, Args)]
pub struct HashCommand {
    /// Task to hash, as <project>:<target>
    pub task: String,
}

impl HashCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let id = TaskId::parse(&self.task).ok_or_else(|| {
            CommandExit::new(
                exit_codes::VALIDATION_ERROR,
                format!("invalid task '{}', expected <project>:<target>", self.task),
            )
        })?;

        let workspace = Workspace::load()?;
        let project = workspace.projects.project(&id.project)?;
        let target = project.target(&id.target).ok_or_else(|| {
            CommandExit::new(
                exit_codes::VALIDATION_ERROR,
                format!("project '{}' has no target '{}'", id.project, id.target),
            )
        })?;
        let task = Task::resolve(project, &id.target, target);

        let hasher = Hasher::from_config(&workspace.root, &workspace.config, workspace.projects.clone())
            .context("failed to prepare hasher")?;
        let details = hasher
            .details(&task)
            .with_context(|| format!("failed to hash {}", id))?;
        info!(task = %id, hash = %details.hash, files = details.files.len(), "task hashed");

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&details)?);
            return Ok(());
        }

        if !cli.verbose {
            println!("{}", details.hash);
            return Ok(());
        }

        println!("{}", output::header(&format!("Hash of {}", output::task_style().apply_to(&id))));
        println!();
        println!("{}", output::key_value("Hash", &output::hash_style().apply_to(&details.hash).to_string()));
        println!("{}", output::key_value("Command", &details.command));
        println!();
        println!("{}", output::header("Files"));
        for (path, digest) in &details.files {
            println!(
                "  {} {}",
                output::hash_style().apply_to(digest.get(..12).unwrap_or(digest)),
                output::path_style().apply_to(path)
            );
        }
        if !details.shared.is_empty() {
            println!();
            println!("{}", output::header("Shared inputs"));
            for (path, digest) in &details.shared {
                println!(
                    "  {} {}",
                    output::hash_style().apply_to(digest.get(..12).unwrap_or(digest)),
                    output::path_style().apply_to(path)
                );
            }
        }
        if !details.env.is_empty() {
            println!();
            println!("{}", output::header("Environment"));
            for (name, value) in &details.env {
                println!("{}", output::key_value(name, value));
            }
        }

        Ok(())
    }
}
