//! Deferred-callback scheduling for the restore timers.

use anyhow::{Result, anyhow};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::types::RestoreJob;
use crate::utils::Clock;

/// One job to run no earlier than `min_latency` and ideally before `override_deadline`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobRequest {
    pub job: RestoreJob,
    pub min_latency: Duration,
    pub override_deadline: Duration,
}

impl JobRequest {
    pub fn new(job: RestoreJob, delay: Duration, deadline_window: Duration) -> Self {
        Self {
            job,
            min_latency: delay,
            override_deadline: delay + deadline_window,
        }
    }
}

/// Durable deferred-callback service. Scheduling a job that is already pending replaces it.
pub trait JobScheduler: Send + Sync {
    fn schedule(&self, request: JobRequest) -> Result<()>;

    /// Drop `job` if pending. Not an error when it is not.
    fn cancel(&self, job: RestoreJob) -> Result<()>;

    fn cancel_all(&self) -> Result<()>;
}

#[derive(Clone, Copy, Debug)]
struct PendingJob {
    request: JobRequest,
    scheduled_at: i64,
}

impl PendingJob {
    fn due_at(&self) -> i64 {
        self.scheduled_at + self.request.min_latency.as_millis() as i64
    }

    fn deadline_at(&self) -> i64 {
        self.scheduled_at + self.request.override_deadline.as_millis() as i64
    }
}

/// In-process scheduler. Jobs are polled with [`take_due`](Self::take_due), usually by a
/// [`JobRunner`](super::JobRunner). Persistence across restarts comes from the timers' stored
/// start times, which the state machine reschedules on user setup.
pub struct LocalJobScheduler {
    clock: Arc<dyn Clock>,
    pending: Mutex<BTreeMap<RestoreJob, PendingJob>>,
}

impl LocalJobScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<RestoreJob, PendingJob>>> {
        self.pending
            .lock()
            .map_err(|_| anyhow!("job table lock poisoned"))
    }

    /// Pending requests in job order.
    pub fn pending(&self) -> Vec<JobRequest> {
        self.lock()
            .map(|p| p.values().map(|j| j.request).collect())
            .unwrap_or_default()
    }

    pub fn is_scheduled(&self, job: RestoreJob) -> bool {
        self.lock().map(|p| p.contains_key(&job)).unwrap_or(false)
    }

    /// Remove and return every job whose minimum latency has elapsed.
    pub fn take_due(&self) -> Vec<RestoreJob> {
        let now = self.clock.now_millis();
        let Ok(mut pending) = self.lock() else {
            return Vec::new();
        };
        let due: Vec<RestoreJob> = pending
            .iter()
            .filter(|(_, j)| j.due_at() <= now)
            .map(|(job, _)| *job)
            .collect();
        for job in &due {
            if let Some(j) = pending.remove(job)
                && now > j.deadline_at()
            {
                warn!(
                    "{} ran {} ms past its deadline",
                    job,
                    now - j.deadline_at()
                );
            }
        }
        due
    }

    /// Time until the earliest pending job is due.
    pub fn next_due_in(&self) -> Option<Duration> {
        let now = self.clock.now_millis();
        let pending = self.lock().ok()?;
        pending
            .values()
            .map(|j| Duration::from_millis((j.due_at() - now).max(0) as u64))
            .min()
    }
}

impl JobScheduler for LocalJobScheduler {
    fn schedule(&self, request: JobRequest) -> Result<()> {
        let scheduled_at = self.clock.now_millis();
        debug!(
            "Scheduling {} in {:?} (deadline {:?})",
            request.job, request.min_latency, request.override_deadline
        );
        self.lock()?.insert(
            request.job,
            PendingJob {
                request,
                scheduled_at,
            },
        );
        Ok(())
    }

    fn cancel(&self, job: RestoreJob) -> Result<()> {
        if self.lock()?.remove(&job).is_some() {
            debug!("Cancelled {}", job);
        }
        Ok(())
    }

    fn cancel_all(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }
}
