//! hcrestore: persistent restore state machine for a per-user health data store.
//!
//! Remote backup data moves through three phases: the download agent fetches it, the caller
//! stages it into a per-user staging directory, and a merge imports it into the live database
//! and the first-grant-time file. Every phase is persisted, guarded by a durable timeout, and
//! recovered after a restart by [`BackupRestore::setup_for_user`].

pub mod engine;
pub mod jobs;
pub mod migration;
pub mod prefs;
pub mod restore;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use restore::{
    BackupReport, BackupRestore, DataStagingFinishedCallback, LoggingStagingCallback,
    MergeOutcome, RestoreDeps, all_backup_file_names,
};

/// Result alias used by the public hcrestore API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;
