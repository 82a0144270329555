//! Restore state machine: remote data downloaded → staged locally → merged into the live store.
//!
//! Persisted state lives in the foreground user's [`PreferenceStore`], handed out by the injected
//! [`UserPreferences`]. One read/write lock guards every state read and transition; a separate
//! merging lock keeps reset from deleting staged files while a merge is reading them.
//!
//! [`PreferenceStore`]: crate::prefs::PreferenceStore Progress survives process death: [`BackupRestore::setup_for_user`]
//! recovers interrupted phases and reschedules the timeouts with their remaining time.

mod backup;
mod merge;
mod staging;
mod state;
mod timeouts;

pub use backup::{BackedUpFile, BackupReport, all_backup_file_names};
pub use merge::MergeOutcome;
pub use staging::{DataStagingFinishedCallback, LoggingStagingCallback};

use anyhow::{Result, anyhow};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use crate::engine::db_ops::{DatabaseMerger, remove_db_files};
use crate::engine::executor::TaskExecutor;
use crate::jobs::JobScheduler;
use crate::migration::MigrationStateManager;
use crate::prefs::UserPreferences;
use crate::types::{
    DataDownloadState, DataRestoreError, DataRestoreState, InternalRestoreState, RestoreStatus,
};
use crate::utils::{Clock, RestoreConfig, UserDirs, UserId, remove_dir_if_exists};

use state::{StateCell, reset_store};

/// Collaborators of the state machine, injected at construction.
pub struct RestoreDeps {
    pub prefs: Arc<dyn UserPreferences>,
    pub scheduler: Arc<dyn JobScheduler>,
    pub migration: Arc<dyn MigrationStateManager>,
    pub merger: Arc<dyn DatabaseMerger>,
    pub clock: Arc<dyn Clock>,
    pub executor: TaskExecutor,
    pub config: RestoreConfig,
}

pub struct BackupRestore {
    states: RwLock<StateCell>,
    merging_lock: Mutex<()>,
    /// True only while this process is copying remote files into staging.
    actively_staging: AtomicBool,
    /// True only while this process is running the merge steps.
    actively_merging: AtomicBool,
    current_user: AtomicU32,
    user_prefs: Arc<dyn UserPreferences>,
    migration: Arc<dyn MigrationStateManager>,
    merger: Arc<dyn DatabaseMerger>,
    executor: TaskExecutor,
    dirs: UserDirs,
    this: Weak<BackupRestore>,
}

impl BackupRestore {
    pub fn new(deps: RestoreDeps) -> Arc<Self> {
        let RestoreDeps {
            prefs,
            scheduler,
            migration,
            merger,
            clock,
            executor,
            config,
        } = deps;
        let dirs = UserDirs::new(&config.data_dir);
        Arc::new_cyclic(|this| Self {
            states: RwLock::new(StateCell::new(scheduler, clock, config)),
            merging_lock: Mutex::new(()),
            actively_staging: AtomicBool::new(false),
            actively_merging: AtomicBool::new(false),
            current_user: AtomicU32::new(0),
            user_prefs: prefs,
            migration,
            merger,
            executor,
            dirs,
            this: this.clone(),
        })
    }

    fn read_states(&self) -> Result<RwLockReadGuard<'_, StateCell>> {
        self.states
            .read()
            .map_err(|_| anyhow!("restore state lock poisoned"))
    }

    fn write_states(&self) -> Result<RwLockWriteGuard<'_, StateCell>> {
        self.states
            .write()
            .map_err(|_| anyhow!("restore state lock poisoned"))
    }

    fn lock_merging(&self) -> Result<MutexGuard<'_, ()>> {
        self.merging_lock
            .lock()
            .map_err(|_| anyhow!("merging lock poisoned"))
    }

    pub fn dirs(&self) -> &UserDirs {
        &self.dirs
    }

    pub fn current_user(&self) -> UserId {
        self.current_user.load(Ordering::SeqCst)
    }

    /// Block until background work (merges started by staging or setup) has finished.
    pub fn wait_for_background_work(&self) {
        self.executor.wait_idle();
    }

    // ---- Lifecycle ----

    /// Make `user` the foreground user and recover from whatever a previous process left behind:
    /// a staging that died mid-copy goes back to waiting, the legacy merged state is re-merged,
    /// timers resume with their remaining time, and a pending or interrupted merge is restarted
    /// in the background.
    pub fn setup_for_user(&self, user: UserId) -> Result<()> {
        info!(
            "Setting up restore for user {} under {}",
            user,
            self.dirs.root().display()
        );
        let prefs = self.user_prefs.for_user(user)?;
        self.actively_staging.store(false, Ordering::SeqCst);
        {
            let mut st = self.write_states()?;
            if let Some(previous) = st.user().filter(|&u| u != user) {
                info!("Pausing restore timers of user {}", previous);
                st.cancel_all_timers()?;
            }
            st.switch_to(user, prefs);
            self.current_user.store(user, Ordering::SeqCst);
            match st.internal_state()? {
                InternalRestoreState::StagingInProgress => {
                    warn!("Staging was interrupted; waiting for the data to be staged again");
                    st.set_internal_state(InternalRestoreState::WaitingForStaging, true)?;
                }
                InternalRestoreState::MergingDoneOld => {
                    warn!("Legacy merged state found; merging staged data again");
                    st.set_internal_state(InternalRestoreState::StagingDone, true)?;
                }
                _ => {}
            }
            st.schedule_all_timers()?;
        }
        if self.should_attempt_merging() {
            self.merge_in_background();
        }
        Ok(())
    }

    /// Stop all pending jobs before the foreground user changes. Timers remember how much of
    /// their interval was used so the next [`setup_for_user`](Self::setup_for_user) resumes them.
    pub fn on_user_switching(&self) -> Result<()> {
        self.cancel_all_jobs()
    }

    pub fn cancel_all_jobs(&self) -> Result<()> {
        self.write_states()?.cancel_all_timers()
    }

    // ---- Download agent ----

    /// Record the download agent's progress. A completed download opens staging; a failed one
    /// ends the restore with [`DataRestoreError::FetchingData`].
    pub fn update_data_download_state(&self, state: DataDownloadState) -> Result<()> {
        let mut st = self.write_states()?;
        if !st.set_download_state(state, false)? {
            return Ok(());
        }
        match state {
            DataDownloadState::Complete => {
                st.set_internal_state(InternalRestoreState::WaitingForStaging, false)?;
            }
            DataDownloadState::Failed => {
                st.set_internal_state(InternalRestoreState::MergingDone, false)?;
                st.set_restore_error(DataRestoreError::FetchingData)?;
            }
            _ => {}
        }
        Ok(())
    }

    // ---- Queries ----

    /// Coarse status for callers. Never fails: storage errors are logged and reported as idle.
    pub fn data_restore_state(&self) -> DataRestoreState {
        self.read_states()
            .and_then(|st| st.public_state())
            .unwrap_or_else(|e| {
                warn!("Reading restore state: {:#}", e);
                DataRestoreState::Idle
            })
    }

    pub fn data_restore_error(&self) -> DataRestoreError {
        self.read_states()
            .and_then(|st| st.restore_error())
            .unwrap_or_else(|e| {
                warn!("Reading restore error: {:#}", e);
                DataRestoreError::None
            })
    }

    pub fn internal_restore_state(&self) -> Result<InternalRestoreState> {
        self.read_states()?.internal_state()
    }

    pub fn data_download_state(&self) -> Result<DataDownloadState> {
        self.read_states()?.download_state()
    }

    pub fn status(&self) -> Result<RestoreStatus> {
        self.read_states()?.status()
    }

    pub fn is_restore_merging_in_progress(&self) -> bool {
        matches!(
            self.internal_restore_state(),
            Ok(InternalRestoreState::MergingInProgress)
        )
    }

    // ---- Reset ----

    /// Delete `user`'s staged data and force every persisted state of `user` back to its initial
    /// value. Waits for an in-flight merge to finish; the merging lock is held until the state is
    /// reset so a merge cannot complete on top of it. Pending jobs are only dropped when `user` is
    /// the foreground user.
    pub fn delete_and_reset_everything(&self, user: UserId) -> Result<()> {
        info!("Deleting staged data and resetting restore state for user {}", user);
        let _merging = self.lock_merging()?;
        remove_db_files(&self.dirs.staged_db_path(user))?;
        remove_dir_if_exists(&self.dirs.staged_dir(user))?;

        let mut st = self.write_states()?;
        if st.user() == Some(user) {
            st.reset()?;
            self.actively_staging.store(false, Ordering::SeqCst);
        } else {
            reset_store(self.user_prefs.for_user(user)?.as_ref())?;
        }
        Ok(())
    }
}
