//! Live console reporter

use console::style;

use strata_tasks::{TaskEvent, TaskReporter, CACHED_OUTPUT_MARKER};

/// One line of console output
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConsoleLine {
    text: String,
    stderr: bool,
}

impl ConsoleLine {
    fn out(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            stderr: false,
        }
    }

    fn err(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            stderr: true,
        }
    }
}

/// Prints task progress and output as it streams
#[derive(Debug)]
pub struct ConsoleReporter {
    verbose: bool,
    /// A single task run directly: output is printed bare
    single: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool, single: bool) -> Self {
        Self { verbose, single }
    }

    /// Lines printed for an event
    fn lines(&self, event: &TaskEvent) -> Vec<ConsoleLine> {
        match event {
            TaskEvent::Started { id, command } => {
                if self.single {
                    if self.verbose {
                        return vec![ConsoleLine::out(style(format!("$ {}", command)).dim().to_string())];
                    }
                    return Vec::new();
                }
                let command = if self.verbose {
                    style(format!("({})", command)).dim().to_string()
                } else {
                    String::new()
                };
                vec![ConsoleLine::out(format!(
                    "  {} {} {}",
                    style("▸").dim(),
                    style(id).bold(),
                    command
                ))]
            }
            TaskEvent::Output {
                id,
                line,
                is_stderr,
                ..
            } => {
                let text = if self.verbose && !self.single {
                    format!("{} {}", style(format!("[{}]", id)).dim(), line)
                } else {
                    line.clone()
                };
                vec![ConsoleLine {
                    text,
                    stderr: *is_stderr,
                }]
            }
            TaskEvent::CacheHit { id, hash } => {
                if self.single {
                    vec![ConsoleLine::out(style(CACHED_OUTPUT_MARKER).dim().to_string())]
                } else if self.verbose {
                    let short = hash.as_str().get(..12).unwrap_or(hash.as_str());
                    vec![ConsoleLine::out(format!(
                        "  {} {} {}",
                        style("◆").cyan(),
                        style(id).bold(),
                        style(format!("from cache {}", short)).dim()
                    ))]
                } else {
                    Vec::new()
                }
            }
            TaskEvent::Completed {
                id,
                duration,
                cached,
            } => {
                if self.single {
                    return Vec::new();
                }
                let elapsed = style(format!("{:.1}s", duration.as_secs_f64())).dim();
                let text = if *cached {
                    format!(
                        "  {} {} {} {}",
                        style("✓").green(),
                        style(id).green(),
                        style("(cached)").cyan(),
                        elapsed
                    )
                } else {
                    format!("  {} {} {}", style("✓").green(), style(id).green(), elapsed)
                };
                vec![ConsoleLine::out(text)]
            }
            TaskEvent::Failed {
                id,
                duration,
                error,
            } => vec![ConsoleLine::err(format!(
                "  {} {} {} {}",
                style("✗").red(),
                style(id).red(),
                style(format!("{:.1}s", duration.as_secs_f64())).dim(),
                style(error).red().dim()
            ))],
            TaskEvent::Skipped { id, reason } => {
                if self.single {
                    return Vec::new();
                }
                vec![ConsoleLine::out(format!(
                    "  {} {} {}",
                    style("○").yellow(),
                    style(id).yellow(),
                    style(format!("({})", reason)).dim()
                ))]
            }
            TaskEvent::AllCompleted {
                total,
                succeeded,
                failed,
                cached,
                skipped,
                duration,
            } => {
                if !self.verbose {
                    return Vec::new();
                }
                let mark = if *failed == 0 {
                    style("✓").green().bold()
                } else {
                    style("✗").red().bold()
                };
                vec![
                    ConsoleLine::out(""),
                    ConsoleLine::out(format!(
                        "  {} {}/{} succeeded, {} failed, {} cached, {} skipped ({:.1}s)",
                        mark,
                        succeeded,
                        total,
                        failed,
                        cached,
                        skipped,
                        duration.as_secs_f64()
                    )),
                ]
            }
        }
    }
}

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: &TaskEvent) {
        for line in self.lines(event) {
            if line.stderr {
                eprintln!("{}", line.text);
            } else {
                println!("{}", line.text);
            }
        }
    }
}
