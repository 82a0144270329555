//! Staging: copying the remote backup files into the per-user staging directory.

use anyhow::Result;
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use super::BackupRestore;
use crate::engine::staging::{RemoteSource, StagingReport, stage_files};
use crate::types::{InternalRestoreState, StageRemoteDataError, StagingError};
use crate::utils::UserId;

/// Told once whether staging succeeded. Failures inside the callback are logged, not propagated.
pub trait DataStagingFinishedCallback: Send + Sync {
    fn on_result(&self) -> Result<()>;

    fn on_error(&self, error: StageRemoteDataError) -> Result<()>;
}

/// Callback that only logs the outcome (CLI).
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingStagingCallback;

impl DataStagingFinishedCallback for LoggingStagingCallback {
    fn on_result(&self) -> Result<()> {
        info!("All remote files staged");
        Ok(())
    }

    fn on_error(&self, error: StageRemoteDataError) -> Result<()> {
        for (name, e) in &error.errors_by_file_name {
            warn!("{}: {}", name, e);
        }
        Ok(())
    }
}

impl BackupRestore {
    /// The single gate into staging: moves to `StagingInProgress` and returns true the first
    /// time; false while staging is running or once it is done.
    pub fn prep_for_staging_if_not_already_done(&self) -> Result<bool> {
        let mut st = self.write_states()?;
        let current = st.internal_state()?;
        if current >= InternalRestoreState::StagingInProgress {
            if current >= InternalRestoreState::StagingDone {
                warn!("Staging is already done, state {:?}", current);
            } else {
                // The caller may have died and is trying to stage again.
                warn!("Already in the process of staging");
            }
            return Ok(false);
        }
        self.actively_staging.store(true, Ordering::SeqCst);
        st.set_internal_state(InternalRestoreState::StagingInProgress, false)?;
        Ok(true)
    }

    /// Copy every remote file into `user`'s staging directory, then report through `callback`
    /// and start merging in the background.
    ///
    /// `exceptions` carries failures the caller already hit while opening files; they are
    /// reported together with copy failures. Whatever happens to individual files, the state
    /// ends at `StagingDone`: a retry by the caller would not see different data.
    pub fn stage_all_remote_data(
        &self,
        sources: BTreeMap<String, RemoteSource>,
        exceptions: BTreeMap<String, StagingError>,
        user: UserId,
        callback: &dyn DataStagingFinishedCallback,
    ) -> StagingReport {
        let dir = self.dirs.staged_dir(user);
        let mut errors = exceptions;
        info!("Staging {} remote file(s) into {}", sources.len(), dir.display());
        let report = stage_files(&dir, sources, &mut errors);

        if let Err(e) = self.finish_staging() {
            warn!("Recording end of staging: {:#}", e);
        }

        let delivered = if errors.is_empty() {
            callback.on_result()
        } else {
            callback.on_error(StageRemoteDataError {
                errors_by_file_name: errors,
            })
        };
        if let Err(e) = delivered {
            warn!("Staging callback failed: {:#}", e);
        }

        self.merge_in_background();
        report
    }

    /// Per-file failures only go to the callback; the persisted error is left alone.
    fn finish_staging(&self) -> Result<()> {
        let mut st = self.write_states()?;
        st.set_internal_state(InternalRestoreState::StagingDone, false)?;
        self.actively_staging.store(false, Ordering::SeqCst);
        Ok(())
    }
}
