//! DB tests: schema versions, backup snapshots, row merge, and the SQLite preference store.

use hcrestore::engine::db_ops::{
    DatabaseMerger, SqliteDatabaseMerger, backup_to_file, db_version, open_db, remove_db_files,
    set_db_version,
};
use hcrestore::prefs::{
    PreferenceStore, SqlitePreferenceStore, SqliteUserPreferences, UserPreferences, keys,
};
use hcrestore::utils::UserDirs;
use rusqlite::Connection;
use std::path::Path;

fn create_events_db(path: &Path, rows: &[(i64, &str, i64)]) {
    let conn = open_db(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (id INTEGER PRIMARY KEY, name TEXT NOT NULL, start_ms INTEGER)",
    )
    .unwrap();
    for (id, name, start) in rows {
        conn.execute(
            "INSERT INTO events (id, name, start_ms) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, name, start],
        )
        .unwrap();
    }
}

fn event_names(path: &Path) -> Vec<String> {
    let conn = Connection::open(path).unwrap();
    let mut stmt = conn.prepare("SELECT name FROM events ORDER BY id").unwrap();
    stmt.query_map([], |row| row.get(0))
        .unwrap()
        .collect::<rusqlite::Result<Vec<String>>>()
        .unwrap()
}

#[test]
fn test_db_version_missing_file_is_zero() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(db_version(&dir.path().join("absent.db")).unwrap(), 0);
}

#[test]
fn test_db_version_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("v.db");
    {
        let conn = open_db(&path).unwrap();
        set_db_version(&conn, 17).unwrap();
    }
    assert_eq!(db_version(&path).unwrap(), 17);
}

#[test]
fn test_db_version_rejects_non_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.db");
    std::fs::write(&path, vec![b'x'; 4096]).unwrap();
    assert!(db_version(&path).is_err());
}

#[test]
fn test_backup_to_file_is_self_contained() {
    let dir = tempfile::tempdir().unwrap();
    let live = dir.path().join("live.db");
    create_events_db(&live, &[(1, "walk", 10), (2, "run", 20)]);
    // Keep the source open in WAL mode with uncheckpointed writes.
    let holder = open_db(&live).unwrap();
    holder
        .execute("INSERT INTO events (id, name) VALUES (3, 'swim')", [])
        .unwrap();

    let copy = dir.path().join("copy.db");
    backup_to_file(&live, &copy).unwrap();
    drop(holder);

    assert!(!dir.path().join("copy.db-wal").exists());
    assert_eq!(event_names(&copy), vec!["walk", "run", "swim"]);
}

#[test]
fn test_remove_db_files_removes_sidecars() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("staged.db");
    std::fs::write(&path, b"x").unwrap();
    std::fs::write(dir.path().join("staged.db-wal"), b"x").unwrap();
    std::fs::write(dir.path().join("staged.db-shm"), b"x").unwrap();
    assert!(remove_db_files(&path).unwrap());
    assert!(!path.exists());
    assert!(!dir.path().join("staged.db-wal").exists());
    assert!(!dir.path().join("staged.db-shm").exists());
    assert!(!remove_db_files(&path).unwrap());
}

#[test]
fn test_merge_keeps_live_rows_on_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let live = dir.path().join("live.db");
    let staged = dir.path().join("staged.db");
    create_events_db(&live, &[(1, "live-walk", 10)]);
    create_events_db(&staged, &[(1, "staged-walk", 10), (2, "staged-run", 20)]);

    let stats = SqliteDatabaseMerger.merge(&live, &staged).unwrap();
    assert_eq!(stats.tables, 1);
    assert_eq!(stats.rows_inserted, 1);
    assert_eq!(event_names(&live), vec!["live-walk", "staged-run"]);
}

#[test]
fn test_merge_uses_common_tables_and_columns() {
    let dir = tempfile::tempdir().unwrap();
    let live = dir.path().join("live.db");
    let staged = dir.path().join("staged.db");
    create_events_db(&live, &[]);
    {
        let conn = open_db(&staged).unwrap();
        conn.execute_batch(
            "CREATE TABLE events (id INTEGER PRIMARY KEY, name TEXT NOT NULL, legacy_flag INTEGER);
             INSERT INTO events (id, name, legacy_flag) VALUES (5, 'old-format', 1);
             CREATE TABLE only_in_backup (id INTEGER PRIMARY KEY);
             INSERT INTO only_in_backup (id) VALUES (1);",
        )
        .unwrap();
    }

    let stats = SqliteDatabaseMerger.merge(&live, &staged).unwrap();
    assert_eq!(stats.tables, 1);
    assert_eq!(stats.rows_inserted, 1);
    assert_eq!(event_names(&live), vec!["old-format"]);

    let conn = Connection::open(&live).unwrap();
    let tables: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name = 'only_in_backup'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(tables, 0);
}

#[test]
fn test_merger_reports_live_version() {
    let dir = tempfile::tempdir().unwrap();
    let live = dir.path().join("live.db");
    assert_eq!(SqliteDatabaseMerger.current_version(&live).unwrap(), 0);
    create_events_db(&live, &[]);
    set_db_version(&open_db(&live).unwrap(), 9).unwrap();
    assert_eq!(SqliteDatabaseMerger.current_version(&live).unwrap(), 9);
}

#[test]
fn test_sqlite_prefs_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("prefs.db");
    {
        let prefs = SqlitePreferenceStore::open(&path).unwrap();
        assert_eq!(prefs.get(keys::DATA_RESTORE_STATE).unwrap(), None);
        prefs.insert_or_replace(keys::DATA_RESTORE_STATE, "3").unwrap();
        prefs
            .insert_or_replace_all(&[
                (keys::DATA_STAGING_TIMEOUT, "1000"),
                (keys::DATA_STAGING_TIMEOUT_CANCELLED, ""),
            ])
            .unwrap();
    }
    let prefs = SqlitePreferenceStore::open(&path).unwrap();
    assert_eq!(prefs.get_i64(keys::DATA_RESTORE_STATE).unwrap(), Some(3));
    assert_eq!(prefs.get_i64(keys::DATA_STAGING_TIMEOUT).unwrap(), Some(1000));
    assert_eq!(
        prefs.get(keys::DATA_STAGING_TIMEOUT_CANCELLED).unwrap(),
        Some(String::new())
    );
    assert_eq!(
        prefs
            .get_non_empty(keys::DATA_STAGING_TIMEOUT_CANCELLED)
            .unwrap(),
        None
    );
}

#[test]
fn test_sqlite_prefs_cache_sees_writes() {
    let prefs = SqlitePreferenceStore::open_in_memory().unwrap();
    prefs.insert_or_replace(keys::DATA_DOWNLOAD_STATE, "1").unwrap();
    assert_eq!(prefs.get_i64(keys::DATA_DOWNLOAD_STATE).unwrap(), Some(1));
    prefs.insert_or_replace(keys::DATA_DOWNLOAD_STATE, "4").unwrap();
    assert_eq!(prefs.get_i64(keys::DATA_DOWNLOAD_STATE).unwrap(), Some(4));
    prefs.insert_or_replace(keys::DATA_RESTORE_ERROR, "oops").unwrap();
    assert_eq!(prefs.get_i64(keys::DATA_RESTORE_ERROR).unwrap(), None);
}

#[test]
fn test_sqlite_prefs_are_separate_per_user() {
    let dir = tempfile::tempdir().unwrap();
    let dirs = UserDirs::new(dir.path());
    let users = SqliteUserPreferences::new(dirs.clone());
    assert!(!dirs.prefs_path(0).exists());

    users
        .for_user(0)
        .unwrap()
        .insert_or_replace(keys::DATA_RESTORE_STATE, "3")
        .unwrap();
    assert!(dirs.prefs_path(0).exists());
    assert_eq!(
        users.for_user(0).unwrap().get_i64(keys::DATA_RESTORE_STATE).unwrap(),
        Some(3)
    );
    assert_eq!(
        users.for_user(10).unwrap().get(keys::DATA_RESTORE_STATE).unwrap(),
        None
    );
    assert!(dirs.prefs_path(10).exists());
}
