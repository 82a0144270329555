//! Durable timer with a resumable deadline.
//!
//! A timer persists its start time and, when its job gets cancelled (user switch, shutdown), the
//! cancellation time. On reschedule only the unspent part of the interval is used, so a restart
//! never extends a deadline.

use anyhow::Result;
use std::time::Duration;

use crate::prefs::{PreferenceStore, keys};
use crate::types::RestoreJob;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DurableTimer {
    pub job: RestoreJob,
    pub start_key: &'static str,
    pub cancelled_key: &'static str,
}

impl DurableTimer {
    pub const fn for_job(job: RestoreJob) -> Self {
        let (start_key, cancelled_key) = match job {
            RestoreJob::DownloadTimeout => (
                keys::DATA_DOWNLOAD_TIMEOUT,
                keys::DATA_DOWNLOAD_TIMEOUT_CANCELLED,
            ),
            RestoreJob::StagingTimeout => (
                keys::DATA_STAGING_TIMEOUT,
                keys::DATA_STAGING_TIMEOUT_CANCELLED,
            ),
            RestoreJob::MergingTimeout => (
                keys::DATA_MERGING_TIMEOUT,
                keys::DATA_MERGING_TIMEOUT_CANCELLED,
            ),
            RestoreJob::MergingRetry => (
                keys::DATA_MERGING_RETRY,
                keys::DATA_MERGING_RETRY_CANCELLED,
            ),
        };
        Self {
            job,
            start_key,
            cancelled_key,
        }
    }

    pub fn is_started(&self, prefs: &dyn PreferenceStore) -> Result<bool> {
        Ok(prefs.get_i64(self.start_key)?.is_some())
    }

    /// Millis of the interval already used up.
    fn spent_millis(&self, prefs: &dyn PreferenceStore, now: i64) -> Result<Option<i64>> {
        let Some(start) = prefs.get_i64(self.start_key)? else {
            return Ok(None);
        };
        let end = prefs.get_i64(self.cancelled_key)?.unwrap_or(now);
        Ok(Some((end - start).max(0)))
    }

    /// Unspent part of `interval`. A timer that never started has the full interval.
    pub fn remaining(
        &self,
        prefs: &dyn PreferenceStore,
        interval: Duration,
        now: i64,
    ) -> Result<Duration> {
        Ok(match self.spent_millis(prefs, now)? {
            None => interval,
            Some(spent) => interval.saturating_sub(Duration::from_millis(spent as u64)),
        })
    }

    /// Start (or restart) the timer at `now`.
    pub fn arm(&self, prefs: &dyn PreferenceStore, now: i64) -> Result<()> {
        let now = now.to_string();
        prefs.insert_or_replace_all(&[(self.start_key, now.as_str()), (self.cancelled_key, "")])
    }

    /// Continue a possibly cancelled timer: returns the remaining delay and rewrites the start so
    /// that the time spent before cancellation stays accounted for. Unstarted timers are armed.
    pub fn resume(
        &self,
        prefs: &dyn PreferenceStore,
        interval: Duration,
        now: i64,
    ) -> Result<Duration> {
        let Some(spent) = self.spent_millis(prefs, now)? else {
            self.arm(prefs, now)?;
            return Ok(interval);
        };
        let start = (now - spent).to_string();
        prefs.insert_or_replace_all(&[
            (self.start_key, start.as_str()),
            (self.cancelled_key, ""),
        ])?;
        Ok(interval.saturating_sub(Duration::from_millis(spent as u64)))
    }

    /// Record the cancellation time if the timer is running. Returns whether it was.
    pub fn mark_cancelled(&self, prefs: &dyn PreferenceStore, now: i64) -> Result<bool> {
        if !self.is_started(prefs)? {
            return Ok(false);
        }
        // Already cancelled: keep the first cancellation time.
        if prefs.get_i64(self.cancelled_key)?.is_some() {
            return Ok(true);
        }
        prefs.insert_or_replace(self.cancelled_key, &now.to_string())?;
        Ok(true)
    }

    /// Forget start and cancellation times.
    pub fn clear(&self, prefs: &dyn PreferenceStore) -> Result<()> {
        prefs.insert_or_replace_all(&[(self.start_key, ""), (self.cancelled_key, "")])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::MemoryPreferenceStore;

    const HOUR: i64 = 60 * 60 * 1000;

    #[test]
    fn unstarted_timer_has_full_interval() {
        let prefs = MemoryPreferenceStore::new();
        let t = DurableTimer::for_job(RestoreJob::StagingTimeout);
        let interval = Duration::from_millis(10 * HOUR as u64);
        assert_eq!(t.remaining(&prefs, interval, 0).unwrap(), interval);
    }

    #[test]
    fn cancelled_time_is_not_counted() {
        let prefs = MemoryPreferenceStore::new();
        let t = DurableTimer::for_job(RestoreJob::DownloadTimeout);
        let interval = Duration::from_millis(10 * HOUR as u64);
        t.arm(&prefs, 0).unwrap();
        assert!(t.mark_cancelled(&prefs, 3 * HOUR).unwrap());

        // Down for five hours: only the three hours before cancellation count.
        let left = t.resume(&prefs, interval, 8 * HOUR).unwrap();
        assert_eq!(left, Duration::from_millis(7 * HOUR as u64));

        // After resume the clock runs again from the rewritten start.
        let left = t.remaining(&prefs, interval, 9 * HOUR).unwrap();
        assert_eq!(left, Duration::from_millis(6 * HOUR as u64));
    }

    #[test]
    fn remaining_clamps_at_zero() {
        let prefs = MemoryPreferenceStore::new();
        let t = DurableTimer::for_job(RestoreJob::MergingTimeout);
        t.arm(&prefs, 0).unwrap();
        let left = t
            .remaining(&prefs, Duration::from_millis(HOUR as u64), 5 * HOUR)
            .unwrap();
        assert_eq!(left, Duration::ZERO);
    }

    #[test]
    fn clear_forgets_everything() {
        let prefs = MemoryPreferenceStore::new();
        let t = DurableTimer::for_job(RestoreJob::MergingRetry);
        t.arm(&prefs, 5).unwrap();
        t.clear(&prefs).unwrap();
        assert!(!t.is_started(&prefs).unwrap());
        assert!(!t.mark_cancelled(&prefs, 10).unwrap());
    }
}
