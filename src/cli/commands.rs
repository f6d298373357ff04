//! CLI commands and argument parsing

use crate::types::SyncMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Solidafy incremental sync CLI
#[derive(Parser, Debug)]
#[command(name = "solidafy-sync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Source definition file (YAML)
    #[arg(short = 'S', long, global = true)]
    pub source: Option<PathBuf>,

    /// Sync settings file (YAML)
    #[arg(short = 'C', long, global = true)]
    pub settings: Option<PathBuf>,

    /// State file (JSON)
    #[arg(short, long, global = true)]
    pub state: Option<PathBuf>,

    /// Override the sync mode from the settings file
    #[arg(short, long, global = true)]
    pub mode: Option<ModeArg>,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Also write engine log messages to stdout
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sync every partition of the selected streams
    Run {
        /// Streams to sync (comma-separated, empty = all)
        #[arg(long)]
        streams: Option<String>,
    },

    /// Validate the source definition and settings
    Validate,

    /// Inspect or reset persisted state
    State {
        #[command(subcommand)]
        action: StateCommand,
    },
}

/// State subcommands
#[derive(Subcommand, Debug)]
pub enum StateCommand {
    /// Print the state file
    Show,

    /// Drop watermarks so the next run starts over
    Reset {
        /// Only this stream
        #[arg(long)]
        stream: Option<String>,

        /// Only this partition (requires --stream)
        #[arg(long)]
        partition: Option<String>,
    },
}

/// Sync mode as given on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ModeArg {
    /// Ignore stored cutoffs
    FullRefresh,
    /// Resume from stored watermarks
    Incremental,
}

impl From<ModeArg> for SyncMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::FullRefresh => SyncMode::FullRefresh,
            ModeArg::Incremental => SyncMode::Incremental,
        }
    }
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output (one message per line)
    Json,
    /// Human-readable output
    Pretty,
}
