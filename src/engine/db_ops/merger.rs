//! Row-level merge of a staged database into the live store.

use anyhow::{Context, Result};
use log::{debug, warn};
use rusqlite::Connection;
use std::collections::HashSet;
use std::path::Path;

use super::{db_version, open_db, quote_ident};

/// Counts reported by a merge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub tables: usize,
    pub rows_inserted: usize,
}

/// Imports a staged database's rows into the live database.
pub trait DatabaseMerger: Send + Sync {
    /// Schema version the live store is at (what this build can handle).
    fn current_version(&self, live_db: &Path) -> Result<i32> {
        db_version(live_db)
    }

    fn merge(&self, live_db: &Path, staged_db: &Path) -> Result<MergeStats>;
}

/// Attaches the staged DB and copies rows of every table present in both databases (columns
/// common to both), skipping rows that collide with existing keys. One transaction.
#[derive(Clone, Copy, Debug, Default)]
pub struct SqliteDatabaseMerger;

impl DatabaseMerger for SqliteDatabaseMerger {
    fn merge(&self, live_db: &Path, staged_db: &Path) -> Result<MergeStats> {
        let mut conn = open_db(live_db)?;
        conn.execute(
            "ATTACH DATABASE ?1 AS staged",
            [staged_db.to_string_lossy().as_ref()],
        )
        .context("attach staged database")?;
        let result = merge_attached(&mut conn);
        if let Err(e) = conn.execute_batch("DETACH DATABASE staged") {
            warn!("detach staged database: {}", e);
        }
        result
    }
}

fn table_names(conn: &Connection, schema: &str) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT name FROM {schema}.sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY rowid"
    );
    let mut stmt = conn.prepare(&sql).context("prepare table list")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("list tables")
}

fn column_names(conn: &Connection, schema: &str, table: &str) -> Result<Vec<String>> {
    let sql = format!("PRAGMA {schema}.table_info({})", quote_ident(table));
    let mut stmt = conn.prepare(&sql).context("prepare table_info")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("list columns of {table}"))
}

fn merge_attached(conn: &mut Connection) -> Result<MergeStats> {
    let live_tables: HashSet<String> = table_names(conn, "main")?.into_iter().collect();
    let staged_tables = table_names(conn, "staged")?;

    let tx = conn.transaction().context("begin merge transaction")?;
    let mut stats = MergeStats::default();
    for table in staged_tables.iter().filter(|t| live_tables.contains(*t)) {
        let live_cols: HashSet<String> = column_names(&tx, "main", table)?.into_iter().collect();
        let cols: Vec<String> = column_names(&tx, "staged", table)?
            .into_iter()
            .filter(|c| live_cols.contains(c))
            .map(|c| quote_ident(&c))
            .collect();
        if cols.is_empty() {
            continue;
        }
        let col_list = cols.join(", ");
        let t = quote_ident(table);
        let sql = format!(
            "INSERT OR IGNORE INTO main.{t} ({col_list}) SELECT {col_list} FROM staged.{t}"
        );
        let n = tx
            .execute(&sql, [])
            .with_context(|| format!("merge table {table}"))?;
        debug!("Merged {} rows into {}", n, table);
        stats.tables += 1;
        stats.rows_inserted += n;
    }
    tx.commit().context("commit merge transaction")?;
    Ok(stats)
}
