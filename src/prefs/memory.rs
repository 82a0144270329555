use anyhow::{Result, anyhow};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use super::{PreferenceStore, UserPreferences};
use crate::utils::UserId;

/// In-process preference store (tests, embedding without a data dir).
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all stored pairs.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.map.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let map = self
            .map
            .lock()
            .map_err(|_| anyhow!("preference map poisoned"))?;
        Ok(map.get(key).cloned())
    }

    fn insert_or_replace(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self
            .map
            .lock()
            .map_err(|_| anyhow!("preference map poisoned"))?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn insert_or_replace_all(&self, pairs: &[(&str, &str)]) -> Result<()> {
        let mut map = self
            .map
            .lock()
            .map_err(|_| anyhow!("preference map poisoned"))?;
        for (k, v) in pairs {
            map.insert(k.to_string(), v.to_string());
        }
        Ok(())
    }
}

/// One [`MemoryPreferenceStore`] per user.
#[derive(Debug, Default)]
pub struct MemoryUserPreferences {
    stores: Mutex<BTreeMap<UserId, Arc<MemoryPreferenceStore>>>,
}

impl MemoryUserPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// The concrete store of `user`, created if needed.
    pub fn store(&self, user: UserId) -> Result<Arc<MemoryPreferenceStore>> {
        let mut stores = self
            .stores
            .lock()
            .map_err(|_| anyhow!("preference stores poisoned"))?;
        Ok(stores.entry(user).or_default().clone())
    }
}

impl UserPreferences for MemoryUserPreferences {
    fn for_user(&self, user: UserId) -> Result<Arc<dyn PreferenceStore>> {
        let store: Arc<dyn PreferenceStore> = self.store(user)?;
        Ok(store)
    }
}
