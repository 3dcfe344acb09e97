//! CLI struct definitions for the `evidence-store` admin tool.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "evidence-store",
    version = env!("CARGO_PKG_VERSION"),
    about = "Operator tool for task-scoped evidence storage: inspect, merge, recover and sweep task stores."
)]
pub(crate) struct Cli {
    /// Config file, or a directory holding evidence-store.toml.
    #[clap(long, global = true, default_value = ".")]
    pub config: PathBuf,
    /// Key-value database path; overrides `[connection] path`.
    #[clap(long, global = true)]
    pub database: Option<PathBuf>,
    /// Output format.
    #[clap(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// List finalized tasks waiting to be merged
    Scan {
        #[clap(long)]
        session: String,
    },
    /// Show the lifecycle state of one task, or of every task in the session
    Status {
        #[clap(long)]
        session: String,
        #[clap(long)]
        task: Option<String>,
    },
    /// Claim finalized tasks and merge them into a session storage file
    Merge {
        #[clap(long)]
        session: String,
        /// Session storage file to merge into (created if missing).
        #[clap(long)]
        output: PathBuf,
        /// Consecutive empty scans before giving up.
        #[clap(long, default_value_t = 1)]
        max_idle_polls: usize,
    },
    /// List tasks stuck in merging, or return one to the finalized set
    Recover {
        #[clap(long)]
        session: String,
        /// Task to return to the finalized set.
        #[clap(long)]
        task: Option<String>,
    },
    /// Remove unfinalized task namespaces older than the stale task age
    Sweep {
        #[clap(long)]
        session: String,
        /// Overrides `[coordinator] stale_task_age_secs`.
        #[clap(long)]
        max_age_secs: Option<u64>,
    },
}
