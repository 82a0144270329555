//! Database operations: open, schema version, snapshot, delete, and staged-into-live merge.

mod connection;
mod merger;

pub use connection::{backup_to_file, db_version, open_db, remove_db_files, set_db_version};
pub use merger::{DatabaseMerger, MergeStats, SqliteDatabaseMerger};

/// WAL tuning pragmas (synchronous, autocheckpoint, size limit). Use after PRAGMA journal_mode = WAL.
pub(crate) const WAL_PRAGMAS: &str = r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 10000;
        PRAGMA journal_size_limit = 67108864;
        "#;

/// Quote an SQLite identifier (table or column name).
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
