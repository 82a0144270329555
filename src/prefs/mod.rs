//! Durable key-value persistence for all restore state.
//!
//! The store is the only persistence the state machine uses: every enum and timer timestamp is
//! written as a string value under one of the keys in [`keys`]. An empty value means "absent".
//! Each device user has a store of their own, handed out by a [`UserPreferences`].

mod memory;
mod sqlite;

pub use memory::{MemoryPreferenceStore, MemoryUserPreferences};
pub use sqlite::{SqlitePreferenceStore, SqliteUserPreferences};

use anyhow::Result;
use std::sync::Arc;

use crate::utils::UserId;

/// Preference keys. These names are the on-disk schema of the restore state.
pub mod keys {
    pub const DATA_DOWNLOAD_STATE: &str = "data_download_state_key";
    pub const DATA_RESTORE_STATE: &str = "data_restore_state_key";
    pub const DATA_RESTORE_ERROR: &str = "data_restore_error_key";

    pub const DATA_DOWNLOAD_TIMEOUT: &str = "data_download_timeout_key";
    pub const DATA_DOWNLOAD_TIMEOUT_CANCELLED: &str = "data_download_timeout_cancelled_key";
    pub const DATA_STAGING_TIMEOUT: &str = "data_staging_timeout_key";
    pub const DATA_STAGING_TIMEOUT_CANCELLED: &str = "data_staging_timeout_cancelled_key";
    pub const DATA_MERGING_TIMEOUT: &str = "data_merging_timeout_key";
    pub const DATA_MERGING_TIMEOUT_CANCELLED: &str = "data_merging_timeout_cancelled_key";
    pub const DATA_MERGING_RETRY: &str = "data_merging_retry_key";
    pub const DATA_MERGING_RETRY_CANCELLED: &str = "data_merging_retry_cancelled_key";
}

/// Crash-safe key-value store. Implementations synchronize internally.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn insert_or_replace(&self, key: &str, value: &str) -> Result<()>;

    /// Write several keys at once; implementations should make this atomic.
    fn insert_or_replace_all(&self, pairs: &[(&str, &str)]) -> Result<()> {
        for (k, v) in pairs {
            self.insert_or_replace(k, v)?;
        }
        Ok(())
    }

    /// Like [`get`](Self::get), but treats an empty or whitespace value as absent.
    fn get_non_empty(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .get(key)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }

    /// Parse a stored integer. Absent → `None`; unparsable values are logged and treated as absent.
    fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.get_non_empty(key)?.and_then(|v| {
            v.parse::<i64>()
                .map_err(|e| log::warn!("preference {key} holds non-integer {v:?}: {e}"))
                .ok()
        }))
    }
}

/// Per-user preference stores. A user's store is created the first time it is asked for and
/// the same store is returned afterwards.
pub trait UserPreferences: Send + Sync {
    fn for_user(&self, user: UserId) -> Result<Arc<dyn PreferenceStore>>;
}
