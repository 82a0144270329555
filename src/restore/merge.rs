//! Merging staged data into the live store.

use anyhow::{Context, Result};
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};

use super::BackupRestore;
use crate::engine::db_ops::{MergeStats, db_version, remove_db_files};
use crate::engine::hashing::{hash_file, to_hex};
use crate::engine::grant_times::{merge_grant_times, parse_grant_times, write_grant_times};
use crate::types::{DataRestoreError, InternalRestoreState, RestoreJob};
use crate::utils::UserId;

/// What a call to [`BackupRestore::merge`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Staged data was merged; state is `MergingDone`.
    Merged(MergeStats),
    /// A merge already ran or is running.
    AlreadyMerging,
    /// Staging has not finished; there is nothing to merge yet.
    NothingStaged,
    /// Another migration owns the live store; a retry job was scheduled.
    DeferredForMigration,
    /// The staged database is newer than this build handles. State left for a later retry.
    VersionTooNew { staged: i32, current: i32 },
}

/// Clears the actively-merging flag when the merge steps end, however they end.
struct ActiveMerge<'a>(&'a AtomicBool);

impl<'a> ActiveMerge<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ActiveMerge<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl BackupRestore {
    /// States in which a merge should be (re)started.
    pub fn should_attempt_merging(&self) -> bool {
        match self.internal_restore_state() {
            Ok(
                s @ (InternalRestoreState::StagingDone
                | InternalRestoreState::MergingInProgress
                | InternalRestoreState::MergingDoneOld),
            ) => {
                info!("Should attempt merging with state {:?}", s);
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!("Reading restore state: {:#}", e);
                false
            }
        }
    }

    /// Merge staged grant times and the staged database into the live store.
    ///
    /// Runs at most once per restore cycle: the state check and the move to `MergingInProgress`
    /// happen under one write lock. Deferred while a migration runs; refused (with
    /// [`DataRestoreError::VersionDiff`]) when the staged database is newer than the live one.
    ///
    /// If the database versions cannot be read, a retry job is left pending and the error is
    /// returned.
    pub fn merge(&self) -> Result<MergeOutcome> {
        let user = {
            let mut st = self.write_states()?;
            let user = self.current_user();
            let current = st.internal_state()?;
            if current >= InternalRestoreState::MergingInProgress {
                info!("Merge skipped in state {:?}", current);
                return Ok(MergeOutcome::AlreadyMerging);
            }
            if current < InternalRestoreState::StagingDone {
                info!("Merge requested before staging finished, state {:?}", current);
                return Ok(MergeOutcome::NothingStaged);
            }
            if self.migration.is_migration_in_progress() {
                info!("Migration is in progress, deferring merge");
                st.schedule_timer(RestoreJob::MergingRetry)?;
                return Ok(MergeOutcome::DeferredForMigration);
            }
            let (staged, current_version) = match self.database_versions(user) {
                Ok(versions) => versions,
                Err(e) => {
                    // Still `StagingDone`: the retry job is the only thing left to move it.
                    st.schedule_timer(RestoreJob::MergingRetry)?;
                    return Err(e);
                }
            };
            if staged > current_version {
                info!(
                    "Staged database version {} is newer than {}; needs an upgrade before merging",
                    staged, current_version
                );
                st.set_restore_error(DataRestoreError::VersionDiff)?;
                return Ok(MergeOutcome::VersionTooNew {
                    staged,
                    current: current_version,
                });
            }
            st.set_internal_state(InternalRestoreState::MergingInProgress, false)?;
            user
        };

        match self.run_merge_steps(user)? {
            Some(stats) => Ok(MergeOutcome::Merged(stats)),
            None => Ok(MergeOutcome::AlreadyMerging),
        }
    }

    /// Schema versions of the staged and the live database.
    fn database_versions(&self, user: UserId) -> Result<(i32, i32)> {
        let staged = db_version(&self.dirs.staged_db_path(user)).context("staged database version")?;
        let live = self
            .merger
            .current_version(&self.dirs.live_db_path(user))
            .context("live database version")?;
        Ok((staged, live))
    }

    /// Finish a merge that a previous process started but never completed.
    pub(crate) fn resume_interrupted_merge(&self) -> Result<Option<MergeStats>> {
        if self.internal_restore_state()? != InternalRestoreState::MergingInProgress {
            return Ok(None);
        }
        warn!("Resuming interrupted merge");
        self.run_merge_steps(self.current_user())
    }

    /// Grant times, then database, then `MergingDone`, all under the merging lock. Returns None
    /// if another thread is already running these steps or a reset got in first. On failure the
    /// state stays `MergingInProgress` and the merging timeout ends the restore.
    fn run_merge_steps(&self, user: UserId) -> Result<Option<MergeStats>> {
        let Some(_active) = ActiveMerge::claim(&self.actively_merging) else {
            return Ok(None);
        };
        let _merging = self.lock_merging()?;
        {
            let st = self.read_states()?;
            let state = st.internal_state()?;
            if st.user() != Some(user) || state != InternalRestoreState::MergingInProgress {
                info!("Merge abandoned, restore is now {:?} for user {:?}", state, st.user());
                return Ok(None);
            }
        }
        self.merge_grant_times(user)
            .context("merge grant times")?;
        let stats = self.merge_database(user).context("merge database")?;

        let mut st = self.write_states()?;
        st.set_internal_state(InternalRestoreState::MergingDone, false)?;
        // Only a version mismatch is cleared; other errors describe the restore and stay.
        if st.restore_error()? == DataRestoreError::VersionDiff {
            st.set_restore_error(DataRestoreError::None)?;
        }
        info!(
            "Merge done: {} table(s), {} row(s)",
            stats.tables, stats.rows_inserted
        );
        Ok(Some(stats))
    }

    fn merge_grant_times(&self, user: UserId) -> Result<()> {
        let restored_path = self.dirs.staged_grant_time_path(user);
        if !restored_path.exists() {
            info!("No staged grant times found");
            return Ok(());
        }
        let restored = parse_grant_times(&restored_path)?;
        let live_path = self.dirs.live_grant_time_path(user);
        let mut live = parse_grant_times(&live_path)?;
        let changed = merge_grant_times(&mut live, &restored);
        if changed > 0 {
            if let Some(parent) = live_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            write_grant_times(&live_path, &live)?;
        }
        info!("Merged grant times: {} entr(ies) updated", changed);
        std::fs::remove_file(&restored_path)
            .with_context(|| format!("delete {}", restored_path.display()))?;
        Ok(())
    }

    /// Caller holds the merging lock.
    fn merge_database(&self, user: UserId) -> Result<MergeStats> {
        let staged = self.dirs.staged_db_path(user);
        if !staged.exists() {
            info!("No staged database found");
            return Ok(MergeStats::default());
        }
        let digest = hash_file(&staged)?;
        info!("Merging staged database (blake3 {})", to_hex(&digest));
        let live = self.dirs.live_db_path(user);
        if let Some(parent) = live.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let stats = self.merger.merge(&live, &staged)?;
        info!("Deleting staged database after merging");
        remove_db_files(&staged)?;
        Ok(stats)
    }

    /// Hand the merge (or the resume of an interrupted one) to the background executor.
    pub(crate) fn merge_in_background(&self) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        self.executor.submit(move || {
            let result = match this.internal_restore_state() {
                Ok(InternalRestoreState::MergingInProgress) => {
                    this.resume_interrupted_merge().map(|_| ())
                }
                Ok(_) => this.merge().map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                error!("Background merge failed: {:#}", e);
            }
        });
    }
}
