//! Graph command: print the project graph

use clap::Args;

use super::workspace::Workspace;
use crate::cli::{output, Cli, OutputFormat};

/// Print the project graph
#[derive(Debug, Args)]
pub struct GraphCommand {
    /// Only show this project and its transitive dependencies
    #[arg(long)]
    pub focus: Option<String>,
}

impl GraphCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let workspace = Workspace::load()?;
        let graph = &workspace.projects;

        let names: Vec<String> = match &self.focus {
            Some(focus) => {
                graph.project(focus)?;
                let mut names: Vec<String> = graph.transitive_dependencies(focus).into_iter().collect();
                names.push(focus.clone());
                graph.sorted().into_iter().filter(|n| names.contains(n)).collect()
            }
            None => graph.sorted(),
        };
        let cycles = graph.cycles();

        if cli.format == OutputFormat::Json {
            let projects: Vec<serde_json::Value> = names
                .iter()
                .filter_map(|name| graph.get(name))
                .map(|p| {
                    serde_json::json!({
                        "name": p.name,
                        "root": p.root_str(),
                        "dependencies": p.dependencies,
                        "targets": p.targets.keys().collect::<Vec<_>>(),
                    })
                })
                .collect();
            let result = serde_json::json!({
                "projects": projects,
                "cycles": cycles,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }

        if cli.quiet {
            return Ok(());
        }

        println!("{}", output::header("Project graph"));
        println!();
        for project in names.iter().filter_map(|name| graph.get(name)) {
            println!(
                "  {} {}",
                output::task_style().apply_to(&project.name),
                output::path_style().apply_to(project.root_str())
            );
            if !project.targets.is_empty() {
                let targets: Vec<&str> = project.targets.keys().map(String::as_str).collect();
                println!("    targets: {}", targets.join(", "));
            }
            for dep in &project.dependencies {
                println!("    -> {}", dep);
            }
        }

        for cycle in &cycles {
            println!();
            output::warning(&format!("Cyclic dependency: {}", cycle.join(" -> ")));
        }

        Ok(())
    }
}
