use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::types::DataDownloadState;
use crate::utils::UserId;

struct DefaultArgs;

impl DefaultArgs {
    pub const DATA_DIR: &'static str = ".";
    pub const USER: UserId = 0;
}

/// Drive the health data restore state machine from the command line.
#[derive(Clone, Parser)]
#[command(name = "hcrestore")]
#[command(about = "Inspect and drive the health data restore state machine.")]
pub struct Cli {
    /// Root holding per-user directories and the preference database. Default: current directory.
    #[arg(long, short = 'd', global = true)]
    pub data_dir: Option<PathBuf>,

    /// Numeric id of the foreground user.
    #[arg(long, short = 'u', global = true, default_value_t = DefaultArgs::USER)]
    pub user: UserId,

    /// Verbose output.
    #[arg(long, short = 'v', global = true, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// Show download state, restore state, error, and the public status.
    Status,
    /// Record the download agent's progress.
    Download {
        /// unknown, started, retry, failed, or complete.
        #[arg(value_parser = parse_download_state)]
        state: DataDownloadState,
    },
    /// Stage local files as if they were remote backup files, then merge.
    Stage {
        #[arg(required = true, num_args = 1..)]
        files: Vec<PathBuf>,
    },
    /// Merge staged data into the live store.
    Merge,
    /// Delete staged data and reset every persisted state.
    Reset,
    /// Write the backup files of the live store into OUT_DIR.
    Backup {
        #[arg(value_name = "OUT_DIR")]
        out_dir: PathBuf,
        /// Device-to-device backup (includes the database).
        #[arg(long)]
        d2d: bool,
    },
    /// Run timers that are already due, once.
    Jobs,
    /// Keep running timers as they come due until Ctrl+C.
    Run,
}

fn parse_download_state(s: &str) -> Result<DataDownloadState, String> {
    DataDownloadState::from_name(s).ok_or_else(|| format!("unknown download state {s:?}"))
}

impl Cli {
    /// Data directory from the flag, defaulting to the current directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DefaultArgs::DATA_DIR))
    }
}
