//! CLI commands

mod cache;
mod completions;
mod console;
mod graph;
mod hash;
mod run;
mod workspace;

pub use cache::CacheCommand;
pub use completions::CompletionsCommand;
pub use graph::GraphCommand;
pub use hash::HashCommand;
pub use run::{AffectedCommand, RunArgs, RunCommand, RunManyCommand};
