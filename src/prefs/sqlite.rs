//! SQLite-backed preference store.

use anyhow::{Context, Result, anyhow};
use log::debug;
use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{PreferenceStore, UserPreferences};
use crate::engine::db_ops::open_db;
use crate::utils::{UserDirs, UserId};

const PREFS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS preference_table (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const UPSERT_PREF_SQL: &str =
    "INSERT OR REPLACE INTO preference_table (key, value) VALUES (?1, ?2)";

struct Inner {
    conn: Connection,
    /// Populated on first read; writes go through to both.
    cache: Option<HashMap<String, String>>,
}

/// Preference table in its own SQLite database (WAL, synchronous writes).
pub struct SqlitePreferenceStore {
    inner: Mutex<Inner>,
}

impl SqlitePreferenceStore {
    /// Open or create the preference database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create preference dir {}", parent.display()))?;
        }
        let conn = open_db(path)?;
        conn.execute_batch(PREFS_SCHEMA)
            .context("create preference schema")?;
        Ok(Self {
            inner: Mutex::new(Inner { conn, cache: None }),
        })
    }

    /// In-memory database with the same schema.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory preference database")?;
        conn.execute_batch(PREFS_SCHEMA)
            .context("create preference schema")?;
        Ok(Self {
            inner: Mutex::new(Inner { conn, cache: None }),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("preference store lock poisoned"))
    }
}

fn load_all(conn: &Connection) -> Result<HashMap<String, String>> {
    let mut stmt = conn.prepare("SELECT key, value FROM preference_table")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get(1)?)))?;
    let mut map = HashMap::new();
    for row in rows {
        let (k, v) = row?;
        map.insert(k, v);
    }
    Ok(map)
}

impl PreferenceStore for SqlitePreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.lock()?;
        if inner.cache.is_none() {
            let all = load_all(&inner.conn).context("load preferences")?;
            inner.cache = Some(all);
        }
        Ok(inner.cache.as_ref().and_then(|c| c.get(key).cloned()))
    }

    fn insert_or_replace(&self, key: &str, value: &str) -> Result<()> {
        self.insert_or_replace_all(&[(key, value)])
    }

    fn insert_or_replace_all(&self, pairs: &[(&str, &str)]) -> Result<()> {
        let mut inner = self.lock()?;
        {
            let tx = inner.conn.transaction().context("begin transaction")?;
            {
                let mut stmt = tx.prepare(UPSERT_PREF_SQL).context("prepare upsert")?;
                for (k, v) in pairs {
                    stmt.execute((k, v)).context("upsert preference")?;
                }
            }
            tx.commit().context("commit preferences")?;
        }
        if let Some(cache) = inner.cache.as_mut() {
            for (k, v) in pairs {
                cache.insert(k.to_string(), v.to_string());
            }
        }
        Ok(())
    }
}

/// A preference database in each user's data directory, opened on first use.
pub struct SqliteUserPreferences {
    dirs: UserDirs,
    open: Mutex<BTreeMap<UserId, Arc<SqlitePreferenceStore>>>,
}

impl SqliteUserPreferences {
    pub fn new(dirs: UserDirs) -> Self {
        Self {
            dirs,
            open: Mutex::new(BTreeMap::new()),
        }
    }
}

impl UserPreferences for SqliteUserPreferences {
    fn for_user(&self, user: UserId) -> Result<Arc<dyn PreferenceStore>> {
        let mut open = self
            .open
            .lock()
            .map_err(|_| anyhow!("preference stores poisoned"))?;
        if let Some(store) = open.get(&user) {
            let store: Arc<dyn PreferenceStore> = store.clone();
            return Ok(store);
        }
        let path = self.dirs.prefs_path(user);
        debug!("Opening preferences of user {} at {}", user, path.display());
        let store = Arc::new(SqlitePreferenceStore::open(&path)?);
        open.insert(user, store.clone());
        let store: Arc<dyn PreferenceStore> = store;
        Ok(store)
    }
}
