//! CLI definition and command handling

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use commands::{
    AffectedCommand, CacheCommand, CompletionsCommand, GraphCommand, HashCommand, RunCommand,
    RunManyCommand,
};

/// Strata - Monorepo task runner with content-addressed caching
#[derive(Debug, Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a target for a single project
    Run(RunCommand),

    /// Run a target for several projects
    RunMany(RunManyCommand),

    /// Run a target for projects affected by changed files
    Affected(AffectedCommand),

    /// Print the input hash of a task
    Hash(HashCommand),

    /// Print the project graph
    Graph(GraphCommand),

    /// Task cache management
    Cache(CacheCommand),

    /// Generate shell completions
    Completions(CompletionsCommand),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> anyhow::Result<()> {
        // Change to specified directory if provided
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        match self.command {
            Commands::Run(ref cmd) => cmd.execute(&self),
            Commands::RunMany(ref cmd) => cmd.execute(&self),
            Commands::Affected(ref cmd) => cmd.execute(&self),
            Commands::Hash(ref cmd) => cmd.execute(&self),
            Commands::Graph(ref cmd) => cmd.execute(&self),
            Commands::Cache(ref cmd) => cmd.execute(&self),
            Commands::Completions(ref cmd) => cmd.execute(&self),
        }
    }

    /// Whether human-readable progress should be printed
    pub fn shows_text(&self) -> bool {
        !self.quiet && self.format == OutputFormat::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_many() {
        let cli = Cli::parse_from([
            "strata",
            "run-many",
            "--target",
            "build",
            "--projects",
            "a1,a2",
            "--with-deps",
            "--skip-nx-cache",
        ]);
        match cli.command {
            Commands::RunMany(cmd) => {
                assert_eq!(cmd.target, "build");
                assert_eq!(cmd.projects, vec!["a1", "a2"]);
                assert!(cmd.with_deps);
                assert!(cmd.run.skip_cache);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_run_with_globals() {
        let cli = Cli::parse_from([
            "strata",
            "run",
            "app:build",
            "--parallel",
            "2",
            "--format",
            "json",
            "-q",
        ]);
        assert!(cli.quiet);
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Run(cmd) => {
                assert_eq!(cmd.task, "app:build");
                assert_eq!(cmd.run.parallel, Some(2));
                assert!(!cmd.with_deps);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
