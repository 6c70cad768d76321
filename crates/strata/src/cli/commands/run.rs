//! Run commands: execute targets across the workspace

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use console::style;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use strata_core::affected_projects;
use strata_tasks::{
    render_header, single_task_banner, Hasher, RunContext, RunSummary, SchedulerOptions,
    ShellExecutor, TaskCache, TaskGraph, TaskId, TaskReporter, TaskReporterRegistry,
    TaskScheduler,
};

use super::console::ConsoleReporter;
use super::workspace::Workspace;
use crate::cli::{output, Cli, OutputFormat};
use crate::exit_codes::{self, CommandExit};

/// Flags shared by every command that runs tasks
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Ignore cached results (results are still stored)
    #[arg(long, alias = "skip-nx-cache")]
    pub skip_cache: bool,

    /// Maximum concurrent tasks
    #[arg(long)]
    pub parallel: Option<usize>,

    /// Show execution plan without running
    #[arg(long)]
    pub dry_run: bool,

    /// Cancel the run after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Run a target for a single project
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Task to run, as <project>:<target>
    pub task: String,

    /// Also run the target on every project it depends on
    #[arg(long)]
    pub with_deps: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

impl RunCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let id = TaskId::parse(&self.task).ok_or_else(|| {
            CommandExit::new(
                exit_codes::VALIDATION_ERROR,
                format!("invalid task '{}', expected <project>:<target>", self.task),
            )
        })?;
        let workspace = Workspace::load()?;
        run_tasks(cli, &self.run, workspace, vec![id], self.with_deps, true)
    }
}

/// Run a target for several projects
#[derive(Debug, Args)]
pub struct RunManyCommand {
    /// Target to run
    #[arg(short, long)]
    pub target: String,

    /// Projects to run the target for
    #[arg(short, long, value_delimiter = ',', required_unless_present = "all")]
    pub projects: Vec<String>,

    /// Run the target for every project that defines it
    #[arg(long, conflicts_with = "projects")]
    pub all: bool,

    /// Also run the target on every project they depend on
    #[arg(long)]
    pub with_deps: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

impl RunManyCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let workspace = Workspace::load()?;
        let projects = if self.all {
            workspace
                .projects
                .projects()
                .filter(|p| p.has_target(&self.target))
                .map(|p| p.name.clone())
                .collect()
        } else {
            self.projects.clone()
        };

        let requested = projects
            .iter()
            .map(|p| TaskId::new(p.as_str(), self.target.as_str()))
            .collect();
        run_tasks(cli, &self.run, workspace, requested, self.with_deps, false)
    }
}

/// Run a target for projects affected by changed files
#[derive(Debug, Args)]
pub struct AffectedCommand {
    /// Target to run
    #[arg(short, long)]
    pub target: String,

    /// Changed files, relative to the workspace root
    #[arg(long, value_delimiter = ',', required = true)]
    pub files: Vec<String>,

    /// Also run the target on every project they depend on
    #[arg(long)]
    pub with_deps: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

impl AffectedCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let workspace = Workspace::load()?;
        let affected = affected_projects(
            &workspace.projects,
            &self.files,
            &workspace.config.tasks.shared_inputs,
        );
        info!(files = self.files.len(), affected = affected.len(), "affected projects computed");

        // affected projects without the target have nothing to run
        let requested = affected
            .iter()
            .filter_map(|name| workspace.projects.get(name))
            .filter(|p| p.has_target(&self.target))
            .map(|p| TaskId::new(p.name.as_str(), self.target.as_str()))
            .collect();
        run_tasks(cli, &self.run, workspace, requested, self.with_deps, false)
    }
}

/// Build the task graph for a request and execute it
fn run_tasks(
    cli: &Cli,
    args: &RunArgs,
    workspace: Workspace,
    requested: Vec<TaskId>,
    with_deps: bool,
    direct: bool,
) -> anyhow::Result<()> {
    if requested.is_empty() {
        if cli.shows_text() {
            output::success("No tasks to run.");
        }
        return Ok(());
    }

    let graph = TaskGraph::build(&workspace.projects, &requested, with_deps)?;
    let single = single_task_mode(direct, with_deps, graph.len());

    if cli.shows_text() {
        if single {
            println!("{}", style(single_task_banner(&requested[0])).bold());
        } else {
            print!("{}", render_header(&graph.targets().join(","), &graph.projects()));
        }
        println!();
    }

    if args.dry_run {
        return print_plan(cli, &graph);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(execute_graph(cli, args, workspace, graph, single))
}

/// A directly named task without dependency expansion prints bare output
fn single_task_mode(direct: bool, with_deps: bool, tasks: usize) -> bool {
    direct && !with_deps && tasks == 1
}

fn print_plan(cli: &Cli, graph: &TaskGraph) -> anyhow::Result<()> {
    if cli.format == OutputFormat::Json {
        let plan: Vec<serde_json::Value> = graph
            .waves()
            .iter()
            .enumerate()
            .map(|(i, wave)| {
                serde_json::json!({
                    "wave": i,
                    "tasks": wave.iter().map(|idx| graph.task(*idx).id.to_string()).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else if !cli.quiet {
        output::info(&format!(
            "{} task{} in {} wave{}",
            graph.len(),
            if graph.len() == 1 { "" } else { "s" },
            graph.waves().len(),
            if graph.waves().len() == 1 { "" } else { "s" },
        ));
        println!();
        print!("{}", graph.execution_plan());
        println!("{}", style("[DRY RUN - no tasks will be executed]").yellow().bold());
    }
    Ok(())
}

async fn execute_graph(
    cli: &Cli,
    args: &RunArgs,
    workspace: Workspace,
    graph: TaskGraph,
    single: bool,
) -> anyhow::Result<()> {
    let Workspace {
        root,
        config,
        projects,
    } = workspace;

    let hasher = Hasher::from_config(&root, &config, projects).context("failed to prepare hasher")?;
    let cache = TaskCache::from_config(&root, &config.tasks);

    let mut reporters = TaskReporterRegistry::new();
    if cli.shows_text() {
        reporters.register(ConsoleReporter::new(cli.verbose, single));
    }
    let reporter: Arc<dyn TaskReporter> = Arc::new(reporters);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let options = SchedulerOptions {
        concurrency: args.parallel.unwrap_or_else(|| config.tasks.concurrency()),
        skip_cache: args.skip_cache,
        timeout: args.timeout.map(Duration::from_secs),
    };
    info!(
        tasks = graph.len(),
        concurrency = options.concurrency,
        skip_cache = options.skip_cache,
        "running tasks"
    );

    let scheduler = TaskScheduler::new(RunContext {
        executor: Arc::new(ShellExecutor::new(root.clone())),
        cache: Arc::new(cache),
        hasher: Arc::new(hasher),
        reporter,
        options,
        cancel,
    });
    let results = scheduler.execute(&graph).await;
    let summary = RunSummary::new(&graph, &results);

    if cli.format == OutputFormat::Json {
        let report = serde_json::json!({
            "summary": summary,
            "tasks": results.results(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !cli.quiet && !single {
        println!();
        print!("{}", summary.render());
    }

    if results.is_cancelled() {
        return Err(CommandExit::new(exit_codes::CANCELLED, "run cancelled").into());
    }
    if !summary.is_success() {
        let failed = results.failed().len();
        return Err(CommandExit::new(
            exit_codes::ERROR,
            format!("{} task{} failed", failed, if failed == 1 { "" } else { "s" }),
        )
        .into());
    }
    Ok(())
}
