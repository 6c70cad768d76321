//! Shell completion scripts for the strata binary

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, CommandFactory};
use clap_complete::Shell;
use tracing::debug;

use crate::cli::{output, Cli};

const BIN_NAME: &str = "strata";

/// Generate shell completions
#[derive(Debug, Args)]
pub struct CompletionsCommand {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,

    /// Write the script to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl CompletionsCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let script = render(self.shell);
        debug!(shell = %self.shell, bytes = script.len(), "completions generated");

        match &self.output {
            Some(path) => {
                write_script(path, &script)?;
                if cli.shows_text() {
                    output::success(&format!(
                        "{} completions written to {}",
                        self.shell,
                        output::path_style().apply_to(path.display())
                    ));
                }
            }
            None => std::io::stdout().write_all(&script)?,
        }
        Ok(())
    }
}

/// Completion script for `shell`, covering every subcommand and flag
fn render(shell: Shell) -> Vec<u8> {
    let mut cmd = Cli::command();
    let mut script = Vec::new();
    clap_complete::generate(shell, &mut cmd, BIN_NAME, &mut script);
    script
}

fn write_script(path: &Path, script: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, script).with_context(|| format!("failed to write {}", path.display()))
}
