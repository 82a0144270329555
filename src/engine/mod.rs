//! Engine: storage, file, and threading primitives the restore core is built on.

pub mod arg_parser;
pub mod cli;
pub mod db_ops;
pub mod executor;
pub mod grant_times;
pub mod hashing;
pub mod staging;

// Re-export commonly used items
pub use arg_parser::{Cli, Commands};
pub use cli::{build_config, handle_run};
pub use db_ops::{DatabaseMerger, MergeStats, SqliteDatabaseMerger, backup_to_file, open_db};
pub use executor::TaskExecutor;
pub use grant_times::{UserGrantTimeState, merge_grant_times};
pub use hashing::{hash_file, to_hex};
pub use staging::{RemoteSource, StagedFile, StagingReport, stage_files};
