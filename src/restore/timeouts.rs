//! What each restore timer does when it fires.

use anyhow::Result;
use log::{error, info, warn};

use super::BackupRestore;
use crate::jobs::JobTarget;
use crate::types::{DataDownloadState, DataRestoreError, InternalRestoreState, RestoreJob};

impl BackupRestore {
    /// Run the action of a fired timer. Jobs that fire in a state they no longer apply to
    /// are ignored.
    pub fn execute(&self, job: RestoreJob) -> Result<()> {
        match job {
            RestoreJob::DownloadTimeout => self.execute_download_timeout(),
            RestoreJob::StagingTimeout | RestoreJob::MergingTimeout => {
                self.execute_phase_timeout(job)
            }
            RestoreJob::MergingRetry => self.execute_merging_retry(),
        }
    }

    fn execute_download_timeout(&self) -> Result<()> {
        let mut st = self.write_states()?;
        if !st.timer_applies(RestoreJob::DownloadTimeout)? {
            info!("Download timeout fired after download finished; ignoring");
            return st.clear_timer(RestoreJob::DownloadTimeout);
        }
        warn!("Download timed out");
        st.set_download_state(DataDownloadState::Failed, false)?;
        st.set_internal_state(InternalRestoreState::MergingDone, false)?;
        st.set_restore_error(DataRestoreError::FetchingData)
    }

    /// Staging and merging timeouts end the restore with an unknown error.
    fn execute_phase_timeout(&self, job: RestoreJob) -> Result<()> {
        let mut st = self.write_states()?;
        if !st.timer_applies(job)? {
            info!("{} fired in state {:?}; ignoring", job, st.internal_state()?);
            return st.clear_timer(job);
        }
        warn!("{} expired in state {:?}", job, st.internal_state()?);
        st.set_internal_state(InternalRestoreState::MergingDone, false)?;
        st.set_restore_error(DataRestoreError::Unknown)
    }

    /// Clears its own timer first, so a merge blocked again waits a full retry delay.
    fn execute_merging_retry(&self) -> Result<()> {
        {
            let mut st = self.write_states()?;
            st.clear_timer(RestoreJob::MergingRetry)?;
            if !st.timer_applies(RestoreJob::MergingRetry)? {
                info!("Merge retry fired in state {:?}; ignoring", st.internal_state()?);
                return Ok(());
            }
        }
        info!("Retrying merge");
        let outcome = self.merge()?;
        info!("Merge retry: {:?}", outcome);
        Ok(())
    }
}

impl JobTarget for BackupRestore {
    fn execute_job(&self, job: RestoreJob) {
        if let Err(e) = self.execute(job) {
            error!("{} failed: {:#}", job, e);
        }
    }
}
