//! Shared fixtures: a restore core over a temp data dir with in-memory per-user prefs, a manual
//! clock, and (by default) an inline executor so background merges finish before the call returns.

#![allow(dead_code)]

use anyhow::{Result, bail};
use hcrestore::engine::db_ops::{DatabaseMerger, MergeStats, set_db_version};
use hcrestore::engine::{SqliteDatabaseMerger, TaskExecutor};
use hcrestore::jobs::LocalJobScheduler;
use hcrestore::migration::MigrationFlag;
use hcrestore::prefs::{MemoryPreferenceStore, MemoryUserPreferences};
use hcrestore::types::StageRemoteDataError;
use hcrestore::utils::{ManualClock, RestoreConfig};
use hcrestore::{BackupRestore, DataStagingFinishedCallback, RestoreDeps};
use rusqlite::Connection;
use std::io::{self, Cursor, Read};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const T0: i64 = 1_700_000_000_000;
pub const USER: u32 = 0;

pub struct Harness {
    pub dir: TempDir,
    pub restore: Arc<BackupRestore>,
    pub users: Arc<MemoryUserPreferences>,
    /// Store of [`USER`].
    pub prefs: Arc<MemoryPreferenceStore>,
    pub scheduler: Arc<LocalJobScheduler>,
    pub clock: Arc<ManualClock>,
    pub migration: Arc<MigrationFlag>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_merger(Arc::new(SqliteDatabaseMerger))
    }

    pub fn with_merger(merger: Arc<dyn DatabaseMerger>) -> Self {
        Self::with_executor(merger, TaskExecutor::inline())
    }

    /// Harness whose background merges run on `executor`.
    pub fn with_executor(merger: Arc<dyn DatabaseMerger>, executor: TaskExecutor) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let users = Arc::new(MemoryUserPreferences::new());
        let prefs = users.store(USER).unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let migration = Arc::new(MigrationFlag::new());
        let (restore, scheduler) = build(&dir, &users, &clock, &migration, merger, executor);
        restore.setup_for_user(USER).unwrap();
        Self {
            dir,
            restore,
            users,
            prefs,
            scheduler,
            clock,
            migration,
        }
    }

    /// Simulate a process restart: fresh core and scheduler over the same prefs and files.
    /// Does not call `setup_for_user`.
    pub fn restart(&mut self, merger: Arc<dyn DatabaseMerger>) {
        let (restore, scheduler) = build(
            &self.dir,
            &self.users,
            &self.clock,
            &self.migration,
            merger,
            TaskExecutor::inline(),
        );
        self.restore = restore;
        self.scheduler = scheduler;
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

fn build(
    dir: &TempDir,
    users: &Arc<MemoryUserPreferences>,
    clock: &Arc<ManualClock>,
    migration: &Arc<MigrationFlag>,
    merger: Arc<dyn DatabaseMerger>,
    executor: TaskExecutor,
) -> (Arc<BackupRestore>, Arc<LocalJobScheduler>) {
    let scheduler = Arc::new(LocalJobScheduler::new(clock.clone()));
    let restore = BackupRestore::new(RestoreDeps {
        prefs: users.clone(),
        scheduler: scheduler.clone(),
        migration: migration.clone(),
        merger,
        clock: clock.clone(),
        executor,
        config: RestoreConfig::with_data_dir(dir.path()),
    });
    (restore, scheduler)
}

/// Create a database at `path` with a `records` table, the given rows, and schema version.
pub fn make_db(path: &Path, version: i32, rows: &[(i64, &str)]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let conn = Connection::open(path).unwrap();
    conn.execute_batch("CREATE TABLE IF NOT EXISTS records (id INTEGER PRIMARY KEY, value TEXT)")
        .unwrap();
    for (id, value) in rows {
        conn.execute(
            "INSERT OR REPLACE INTO records (id, value) VALUES (?1, ?2)",
            rusqlite::params![id, value],
        )
        .unwrap();
    }
    set_db_version(&conn, version).unwrap();
}

/// Bytes of a freshly built database file, as a remote source would deliver them.
pub fn db_bytes(scratch: &Path, version: i32, rows: &[(i64, &str)]) -> Vec<u8> {
    let path = scratch.join("remote.db");
    make_db(&path, version, rows);
    std::fs::read(&path).unwrap()
}

pub fn record_values(path: &Path) -> Vec<(i64, String)> {
    let conn = Connection::open(path).unwrap();
    let mut stmt = conn
        .prepare("SELECT id, value FROM records ORDER BY id")
        .unwrap();
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<rusqlite::Result<Vec<_>>>()
        .unwrap()
}

pub fn source(bytes: Vec<u8>) -> Box<dyn Read + Send> {
    Box::new(Cursor::new(bytes))
}

/// Source whose first read fails.
pub struct FailingReader;

impl Read for FailingReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::other("connection reset"))
    }
}

/// Remembers what staging reported.
#[derive(Default)]
pub struct RecordingCallback {
    pub results: Mutex<Vec<std::result::Result<(), StageRemoteDataError>>>,
}

impl RecordingCallback {
    pub fn single(&self) -> std::result::Result<(), StageRemoteDataError> {
        let results = self.results.lock().unwrap();
        assert_eq!(results.len(), 1, "callback must be told exactly once");
        results[0].clone()
    }
}

impl DataStagingFinishedCallback for RecordingCallback {
    fn on_result(&self) -> Result<()> {
        self.results.lock().unwrap().push(Ok(()));
        Ok(())
    }

    fn on_error(&self, error: StageRemoteDataError) -> Result<()> {
        self.results.lock().unwrap().push(Err(error));
        Ok(())
    }
}

/// Merger whose merge always fails, leaving the restore mid-merge.
pub struct FailingMerger;

impl DatabaseMerger for FailingMerger {
    fn merge(&self, _live_db: &Path, _staged_db: &Path) -> Result<MergeStats> {
        bail!("live store unavailable")
    }
}

/// Merger that parks inside `merge` until released, so other threads can act mid-merge.
pub struct BlockingMerger {
    entered: crossbeam_channel::Sender<()>,
    release: crossbeam_channel::Receiver<()>,
}

impl BlockingMerger {
    /// The merger, a receiver told when a merge starts, and a sender that lets it finish.
    pub fn new() -> (
        Self,
        crossbeam_channel::Receiver<()>,
        crossbeam_channel::Sender<()>,
    ) {
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        (
            Self {
                entered: entered_tx,
                release: release_rx,
            },
            entered_rx,
            release_tx,
        )
    }
}

impl DatabaseMerger for BlockingMerger {
    fn merge(&self, live_db: &Path, staged_db: &Path) -> Result<MergeStats> {
        let _ = self.entered.send(());
        let _ = self.release.recv();
        SqliteDatabaseMerger.merge(live_db, staged_db)
    }
}

/// SQLite merger that counts how often it ran.
#[derive(Default)]
pub struct CountingMerger {
    merges: AtomicUsize,
}

impl CountingMerger {
    pub fn merges(&self) -> usize {
        self.merges.load(Ordering::SeqCst)
    }
}

impl DatabaseMerger for CountingMerger {
    fn merge(&self, live_db: &Path, staged_db: &Path) -> Result<MergeStats> {
        self.merges.fetch_add(1, Ordering::SeqCst);
        SqliteDatabaseMerger.merge(live_db, staged_db)
    }
}
