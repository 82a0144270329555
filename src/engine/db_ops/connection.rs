//! Open, version, snapshot, and delete database files.

use anyhow::{Context, Result};
use rusqlite::backup::Backup;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;

use crate::utils::config::DB_BACKUP_PAGES_PER_STEP;
use crate::utils::remove_db_sidecars;

use super::WAL_PRAGMAS;

/// Enable WAL on an open connection (idempotent).
fn apply_wal(conn: &Connection) -> Result<()> {
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
        .context("enable WAL")?;
    conn.execute_batch(WAL_PRAGMAS).context("set WAL pragmas")?;
    Ok(())
}

/// Open or create a database and switch it to WAL.
pub fn open_db(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("open database {}", path.display()))?;
    apply_wal(&conn)?;
    Ok(conn)
}

/// Open a database that must already exist. Read-write so WAL files can be opened or created.
fn open_existing(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("open database {}", path.display()))
}

/// Schema version (`PRAGMA user_version`) of the database at `path`. A missing file is version 0.
pub fn db_version(path: &Path) -> Result<i32> {
    if !path.exists() {
        return Ok(0);
    }
    let conn = open_existing(path)?;
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .with_context(|| format!("read schema version of {}", path.display()))
}

pub fn set_db_version(conn: &Connection, version: i32) -> Result<()> {
    conn.pragma_update(None, "user_version", version)
        .context("set schema version")
}

/// Consistent copy of the database at `source` into `dest` (overwritten). The copy uses a
/// rollback journal so it is a single self-contained file.
pub fn backup_to_file(source: &Path, dest: &Path) -> Result<()> {
    let src = open_existing(source)?;
    let mut dst = Connection::open(dest).context("open destination database for backup")?;
    {
        let backup = Backup::new(&src, &mut dst).context("create backup")?;
        backup
            .run_to_completion(DB_BACKUP_PAGES_PER_STEP, Duration::from_millis(0), None)
            .context("run backup to completion")?;
    }
    dst.query_row("PRAGMA journal_mode = DELETE", [], |_| Ok(()))
        .context("set rollback journal on destination")?;
    Ok(())
}

/// Delete a database file and its sidecars. Returns whether the main file existed.
pub fn remove_db_files(path: &Path) -> Result<bool> {
    let existed = match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            return Err(e).with_context(|| format!("delete database {}", path.display()));
        }
    };
    remove_db_sidecars(path);
    Ok(existed)
}
