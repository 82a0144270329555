//! Per-user directory layout under the data root.

use std::path::{Path, PathBuf};

use crate::utils::config::{FileNames, PackagePaths};

/// Numeric device-user id.
pub type UserId = u32;

/// Resolves per-user paths: `<root>/user_<id>/` for live data and
/// `<root>/user_<id>/remote_staged/` for staged restore data.
#[derive(Clone, Debug)]
pub struct UserDirs {
    root: PathBuf,
}

impl UserDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self, user: UserId) -> PathBuf {
        self.root.join(format!("{}{}", FileNames::USER_DIR_PREFIX, user))
    }

    /// Preference database holding the user's restore state.
    pub fn prefs_path(&self, user: UserId) -> PathBuf {
        self.data_dir(user).join(PackagePaths::get().prefs_filename())
    }

    pub fn staged_dir(&self, user: UserId) -> PathBuf {
        self.data_dir(user).join(FileNames::STAGED_DIR)
    }

    pub fn live_db_path(&self, user: UserId) -> PathBuf {
        self.data_dir(user).join(FileNames::LIVE_DATABASE)
    }

    pub fn staged_db_path(&self, user: UserId) -> PathBuf {
        self.staged_dir(user).join(FileNames::STAGED_DATABASE)
    }

    pub fn live_grant_time_path(&self, user: UserId) -> PathBuf {
        self.data_dir(user).join(FileNames::GRANT_TIME_FILE)
    }

    pub fn staged_grant_time_path(&self, user: UserId) -> PathBuf {
        self.staged_dir(user).join(FileNames::GRANT_TIME_FILE)
    }
}
