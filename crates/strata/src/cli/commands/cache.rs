//! Cache management command

use std::time::Duration;

use clap::{Args, Subcommand};
use console::style;

use strata_core::config::load_config_or_default;
use strata_tasks::TaskCache;
use tracing::info;

use crate::cli::{output, Cli, OutputFormat};

/// Open the cache of the workspace containing the current directory
fn open_cache() -> anyhow::Result<TaskCache> {
    let cwd = std::env::current_dir()?;
    let loaded = load_config_or_default(&cwd);
    Ok(TaskCache::from_config(&loaded.workspace_root, &loaded.config.tasks))
}

/// Task cache management
#[derive(Debug, Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Remove old cache entries
    Prune(CachePruneCommand),
    /// Show cache statistics
    Status(CacheStatusCommand),
    /// Clear all cached entries
    Clean(CacheCleanCommand),
}

/// Prune old cache entries
#[derive(Debug, Args)]
pub struct CachePruneCommand {
    /// Maximum age in days (default: 7)
    #[arg(long, default_value = "7")]
    pub max_age_days: u64,

}

/// Show cache statistics
#[derive(Debug, Args)]
pub struct CacheStatusCommand;

/// Clear all cached entries
#[derive(Debug, Args)]
pub struct CacheCleanCommand {
    /// Skip confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,
}

impl CacheCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        match &self.action {
            CacheAction::Prune(cmd) => cmd.execute(cli),
            CacheAction::Status(cmd) => cmd.execute(cli),
            CacheAction::Clean(cmd) => cmd.execute(cli),
        }
    }
}

impl CachePruneCommand {
    fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let cache = open_cache()?;
        let max_age = Duration::from_secs(self.max_age_days * 24 * 60 * 60);

        if cli.shows_text() {
            output::info(&format!(
                "Pruning cache entries older than {} days...",
                self.max_age_days
            ));
        }

        let stats = cache.prune(max_age)?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "total": stats.total,
                "removed": stats.removed,
                "kept": stats.kept,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            println!(
                "  {} Removed {} of {} entries ({} kept)",
                style("✓").green(),
                stats.removed,
                stats.total,
                stats.kept
            );
        }

        Ok(())
    }
}

impl CacheStatusCommand {
    fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let cache = open_cache()?;

        let stats = cache.status()?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "entries": stats.entries,
                "total_size": stats.total_size,
                "total_size_formatted": stats.formatted_size(),
                "cache_dir": cache.cache_dir().display().to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            println!("{}", style("Task Cache Status").bold());
            println!();
            println!("  Location: {}", output::path_style().apply_to(cache.cache_dir().display()));
            println!("  Entries:  {}", stats.entries);
            println!("  Size:     {}", style(stats.formatted_size()).yellow());
        }

        Ok(())
    }
}

impl CacheCleanCommand {
    fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let cache = open_cache()?;
        let cache_dir = cache.cache_dir().to_path_buf();

        if !cache_dir.exists() {
            if cli.shows_text() {
                output::success("Cache directory does not exist.");
            }
            return Ok(());
        }

        if !self.yes {
            let confirmed = dialoguer::Confirm::new()
                .with_prompt(format!(
                    "Remove all cached entries at {}?",
                    cache_dir.display()
                ))
                .default(false)
                .interact()?;

            if !confirmed {
                println!("{}", style("Aborted.").yellow());
                return Ok(());
            }
        }

        let removed = cache.clean()?;
        info!(removed, dir = %cache_dir.display(), "cache cleared");

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::json!({ "removed": removed }));
        } else if !cli.quiet {
            output::success(&format!(
                "Removed {} entr{} from {}",
                removed,
                if removed == 1 { "y" } else { "ies" },
                output::path_style().apply_to(cache_dir.display())
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_cache_prune() {
        let cli = Cli::parse_from(["strata", "cache", "prune", "--max-age-days", "3"]);
        match cli.command {
            crate::cli::Commands::Cache(CacheCommand {
                action: CacheAction::Prune(cmd),
            }) => assert_eq!(cmd.max_age_days, 3),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_cache_clean_yes() {
        let cli = Cli::parse_from(["strata", "cache", "clean", "-y"]);
        match cli.command {
            crate::cli::Commands::Cache(CacheCommand {
                action: CacheAction::Clean(cmd),
            }) => assert!(cmd.yes),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
