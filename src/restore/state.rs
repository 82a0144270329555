//! Persisted restore state and its timers, accessed only through the state lock.
//!
//! Readers get `&StateCell` (read lock) and can only query; every transition needs
//! `&mut StateCell` and therefore the write lock. The cell works on the store of the foreground
//! user and has none until a user is set up.

use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use std::sync::Arc;

use crate::jobs::{DurableTimer, JobRequest, JobScheduler};
use crate::prefs::{PreferenceStore, keys};
use crate::types::{
    DataDownloadState, DataRestoreError, DataRestoreState, InternalRestoreState, RestoreJob,
    RestoreStatus, StateError,
};
use crate::utils::{Clock, RestoreConfig, UserId};

pub(crate) struct StateCell {
    user: Option<UserId>,
    prefs: Option<Arc<dyn PreferenceStore>>,
    scheduler: Arc<dyn JobScheduler>,
    clock: Arc<dyn Clock>,
    config: RestoreConfig,
}

/// Read a persisted enum; absent or unrecognized values fall back to `default`.
fn read_enum<T>(prefs: &dyn PreferenceStore, key: &str, default: T) -> Result<T>
where
    T: TryFrom<i32, Error = StateError>,
{
    let Some(raw) = prefs.get_i64(key)? else {
        return Ok(default);
    };
    let parsed = i32::try_from(raw)
        .ok()
        .and_then(|v| T::try_from(v).map_err(|e| warn!("{}: {}", key, e)).ok());
    Ok(parsed.unwrap_or(default))
}

impl StateCell {
    pub(crate) fn new(
        scheduler: Arc<dyn JobScheduler>,
        clock: Arc<dyn Clock>,
        config: RestoreConfig,
    ) -> Self {
        Self {
            user: None,
            prefs: None,
            scheduler,
            clock,
            config,
        }
    }

    /// Point the cell at `user`'s store.
    pub(crate) fn switch_to(&mut self, user: UserId, prefs: Arc<dyn PreferenceStore>) {
        self.user = Some(user);
        self.prefs = Some(prefs);
    }

    pub(crate) fn user(&self) -> Option<UserId> {
        self.user
    }

    fn prefs(&self) -> Result<&dyn PreferenceStore> {
        self.prefs
            .as_deref()
            .ok_or_else(|| anyhow!("no user set up for restore"))
    }

    // ---- Reads ----

    pub(crate) fn download_state(&self) -> Result<DataDownloadState> {
        read_enum(
            self.prefs()?,
            keys::DATA_DOWNLOAD_STATE,
            DataDownloadState::Unknown,
        )
    }

    pub(crate) fn internal_state(&self) -> Result<InternalRestoreState> {
        read_enum(
            self.prefs()?,
            keys::DATA_RESTORE_STATE,
            InternalRestoreState::Unknown,
        )
    }

    pub(crate) fn restore_error(&self) -> Result<DataRestoreError> {
        read_enum(
            self.prefs()?,
            keys::DATA_RESTORE_ERROR,
            DataRestoreError::None,
        )
    }

    /// Coarse public status: in progress while merging, idle once merging is done, pending from
    /// download start until merging begins, idle otherwise.
    pub(crate) fn public_state(&self) -> Result<DataRestoreState> {
        Ok(match self.internal_state()? {
            InternalRestoreState::MergingInProgress => DataRestoreState::InProgress,
            InternalRestoreState::MergingDone | InternalRestoreState::MergingDoneOld => {
                DataRestoreState::Idle
            }
            InternalRestoreState::Unknown => match self.download_state()? {
                DataDownloadState::Started | DataDownloadState::Retry => DataRestoreState::Pending,
                _ => DataRestoreState::Idle,
            },
            InternalRestoreState::WaitingForStaging
            | InternalRestoreState::StagingInProgress
            | InternalRestoreState::StagingDone => DataRestoreState::Pending,
        })
    }

    pub(crate) fn status(&self) -> Result<RestoreStatus> {
        Ok(RestoreStatus {
            download: self.download_state()?,
            internal: self.internal_state()?,
            error: self.restore_error()?,
            public: self.public_state()?,
        })
    }

    // ---- Transitions ----

    /// Returns whether the write happened. A terminal download state is only left when forced.
    pub(crate) fn set_download_state(
        &mut self,
        state: DataDownloadState,
        force: bool,
    ) -> Result<bool> {
        let current = self.download_state()?;
        if !force && current.is_terminal() {
            warn!(
                "Download already in terminal state {:?}, ignoring {:?}",
                current, state
            );
            return Ok(false);
        }
        self.prefs()?
            .insert_or_replace(keys::DATA_DOWNLOAD_STATE, &state.as_i32().to_string())?;
        info!("Download state {:?} -> {:?}", current, state);

        match state {
            DataDownloadState::Started | DataDownloadState::Retry => {
                self.timer(RestoreJob::DownloadTimeout)
                    .arm(self.prefs()?, self.now())?;
                self.schedule_timer(RestoreJob::DownloadTimeout)?;
            }
            DataDownloadState::Failed | DataDownloadState::Complete => {
                self.clear_timer(RestoreJob::DownloadTimeout)?;
            }
            DataDownloadState::Unknown => {}
        }
        Ok(true)
    }

    /// Move the internal state forward. Backward or same-state moves are refused unless forced.
    /// Returns whether the write happened.
    pub(crate) fn set_internal_state(
        &mut self,
        state: InternalRestoreState,
        force: bool,
    ) -> Result<bool> {
        let current = self.internal_state()?;
        if !force && !current.can_advance_to(state) {
            warn!(
                "Refusing restore state change in wrong order from {:?} to {:?}",
                current, state
            );
            return Ok(false);
        }
        self.prefs()?
            .insert_or_replace(keys::DATA_RESTORE_STATE, &state.as_i32().to_string())?;
        info!(
            "Restore state {:?} -> {:?}{}",
            current,
            state,
            if force { " (forced)" } else { "" }
        );

        let now = self.now();
        match state {
            InternalRestoreState::WaitingForStaging | InternalRestoreState::StagingInProgress => {
                let timer = self.timer(RestoreJob::StagingTimeout);
                if force {
                    // Recovery keeps the time already spent waiting.
                    timer.resume(
                        self.prefs()?,
                        self.config.interval_for(RestoreJob::StagingTimeout),
                        now,
                    )?;
                } else {
                    timer.arm(self.prefs()?, now)?;
                }
                self.schedule_timer(RestoreJob::StagingTimeout)?;
            }
            InternalRestoreState::StagingDone => {
                self.clear_timer(RestoreJob::StagingTimeout)?;
            }
            InternalRestoreState::MergingInProgress => {
                self.clear_timer(RestoreJob::StagingTimeout)?;
                // A resumed merge keeps its original deadline.
                self.schedule_timer(RestoreJob::MergingTimeout)?;
            }
            InternalRestoreState::MergingDone => {
                self.clear_timer(RestoreJob::StagingTimeout)?;
                self.clear_timer(RestoreJob::MergingTimeout)?;
                self.clear_timer(RestoreJob::MergingRetry)?;
            }
            InternalRestoreState::Unknown | InternalRestoreState::MergingDoneOld => {}
        }
        Ok(true)
    }

    pub(crate) fn set_restore_error(&mut self, error: DataRestoreError) -> Result<()> {
        debug!("Restore error -> {:?}", error);
        self.prefs()?
            .insert_or_replace(keys::DATA_RESTORE_ERROR, &error.as_i32().to_string())
    }

    // ---- Timers ----

    fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    fn timer(&self, job: RestoreJob) -> DurableTimer {
        DurableTimer::for_job(job)
    }

    /// Whether the current state calls for `job` to be pending.
    pub(crate) fn timer_applies(&self, job: RestoreJob) -> Result<bool> {
        Ok(match job {
            RestoreJob::DownloadTimeout => matches!(
                self.download_state()?,
                DataDownloadState::Started | DataDownloadState::Retry
            ),
            RestoreJob::StagingTimeout => matches!(
                self.internal_state()?,
                InternalRestoreState::WaitingForStaging | InternalRestoreState::StagingInProgress
            ),
            RestoreJob::MergingTimeout => {
                self.internal_state()? == InternalRestoreState::MergingInProgress
            }
            RestoreJob::MergingRetry => self.internal_state()? == InternalRestoreState::StagingDone,
        })
    }

    /// Schedule `job` for the unspent part of its interval, if the current state calls for it.
    /// Returns whether a job was scheduled.
    pub(crate) fn schedule_timer(&self, job: RestoreJob) -> Result<bool> {
        if !self.timer_applies(job)? {
            debug!("Not scheduling {} in the current state", job);
            return Ok(false);
        }
        let delay = self.timer(job).resume(
            self.prefs()?,
            self.config.interval_for(job),
            self.now(),
        )?;
        self.scheduler
            .schedule(JobRequest::new(job, delay, self.config.deadline_window))?;
        info!("Scheduled {} with delay {:?}", job, delay);
        Ok(true)
    }

    /// Reschedule every timer the current state calls for (after restart or user switch).
    pub(crate) fn schedule_all_timers(&self) -> Result<()> {
        for job in RestoreJob::ALL {
            self.schedule_timer(job)?;
        }
        Ok(())
    }

    /// Cancel pending jobs and record when each running timer stopped counting.
    pub(crate) fn cancel_all_timers(&mut self) -> Result<()> {
        self.scheduler.cancel_all()?;
        let now = self.now();
        for job in RestoreJob::ALL {
            if self.timer(job).mark_cancelled(self.prefs()?, now)? {
                debug!("Recorded cancellation of {}", job);
            }
        }
        Ok(())
    }

    /// Forget the timer and drop its pending job.
    pub(crate) fn clear_timer(&mut self, job: RestoreJob) -> Result<()> {
        self.scheduler.cancel(job)?;
        self.timer(job).clear(self.prefs()?)
    }

    /// Drop every pending job and put the store back to its initial values.
    pub(crate) fn reset(&mut self) -> Result<()> {
        self.scheduler.cancel_all()?;
        reset_store(self.prefs()?)?;
        info!("Restore state of user {:?} reset", self.user);
        Ok(())
    }
}

/// Initial values for every restore key: both states unknown, no error, no timer running.
pub(crate) fn reset_store(prefs: &dyn PreferenceStore) -> Result<()> {
    let download = DataDownloadState::Unknown.as_i32().to_string();
    let internal = InternalRestoreState::Unknown.as_i32().to_string();
    let error = DataRestoreError::None.as_i32().to_string();
    let mut pairs = vec![
        (keys::DATA_DOWNLOAD_STATE, download.as_str()),
        (keys::DATA_RESTORE_STATE, internal.as_str()),
        (keys::DATA_RESTORE_ERROR, error.as_str()),
    ];
    for job in RestoreJob::ALL {
        let timer = DurableTimer::for_job(job);
        pairs.push((timer.start_key, ""));
        pairs.push((timer.cancelled_key, ""));
    }
    prefs.insert_or_replace_all(&pairs)
}
