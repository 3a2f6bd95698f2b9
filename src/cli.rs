use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "batchmon",
    about = "Monitor OpendTect batch jobs and locate host installations",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the last lines of a log
    Tail {
        /// Log file to read
        file: PathBuf,

        /// Number of lines
        #[arg(short = 'n', long)]
        lines: Option<usize>,

        /// Drop blank lines before taking the tail
        #[arg(long)]
        strip_blank: bool,
    },

    /// Check once whether a batch job has finished (exit status 1 if not)
    Check {
        /// Batch job log file
        file: PathBuf,

        /// Completion marker (default from config)
        #[arg(long)]
        marker: Option<String>,
    },

    /// Poll a batch job log until it finishes or times out
    Wait {
        /// Batch job log file
        file: PathBuf,

        /// Completion marker (default from config)
        #[arg(long)]
        marker: Option<String>,

        /// Poll interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Empty a log, optionally keeping its first lines
    Reset {
        /// Log file to rewrite
        file: PathBuf,

        /// Number of leading lines to keep
        #[arg(long, default_value = "0")]
        keep: usize,
    },

    /// Run a host command script and optionally wait for it
    Run {
        /// Command script passed to the host script driver
        script: PathBuf,

        /// Log file receiving the job output (created if missing)
        #[arg(long)]
        log: Option<PathBuf>,

        /// Wait for the completion marker
        #[arg(long)]
        wait: bool,

        /// Host executables directory
        #[arg(long)]
        exec_dir: Option<PathBuf>,
    },

    /// Show resolved host installation and settings paths
    Paths {
        /// Host executables directory
        #[arg(long)]
        exec_dir: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show project configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
