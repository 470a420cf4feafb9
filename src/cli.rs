//! Command-line surface for the `herd` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "herd",
    about = "Drive coding agents through isolated git worktrees",
    version
)]
pub struct Cli {
    /// Run as if started in DIR instead of the current directory.
    #[arg(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Show every external command (sets the log filter to debug).
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the orchestration loop until interrupted.
    Run {
        /// Concurrency ceiling for active tasks.
        #[arg(short = 'j', long = "jobs", value_name = "N")]
        jobs: Option<usize>,

        /// Priority selectors: full slugs, or bare integers matched against
        /// four-digit-padded slug prefixes (5 matches 0005-anything).
        #[arg(value_name = "TASK")]
        tasks: Vec<String>,
    },
    /// Print the tasks in each queue and exit.
    Status,
}
