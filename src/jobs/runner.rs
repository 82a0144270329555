//! Background job runner: polls a [`LocalJobScheduler`] and executes due jobs.

use anyhow::{Context, Result};
use crossbeam_channel::{Sender, bounded, select, tick};
use log::{debug, info};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::LocalJobScheduler;
use crate::types::RestoreJob;

/// Receiver of fired jobs. Passed explicitly to the runner; there is no global job service.
pub trait JobTarget: Send + Sync {
    fn execute_job(&self, job: RestoreJob);
}

/// Execute every due job once. Returns how many ran.
pub fn run_due(scheduler: &LocalJobScheduler, target: &dyn JobTarget) -> usize {
    let due = scheduler.take_due();
    for job in &due {
        info!("Running job {}", job);
        target.execute_job(*job);
    }
    due.len()
}

pub struct JobRunner {
    shutdown_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl JobRunner {
    /// Start a thread that checks for due jobs every `interval`.
    pub fn spawn(
        scheduler: Arc<LocalJobScheduler>,
        target: Arc<dyn JobTarget>,
        interval: Duration,
    ) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name(format!("{}-jobs", env!("CARGO_PKG_NAME")))
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let n = run_due(&scheduler, target.as_ref());
                            if n > 0 {
                                debug!("Ran {} job(s)", n);
                            }
                        }
                    }
                }
            })
            .context("spawn job runner thread")?;
        Ok(Self {
            shutdown_tx,
            handle: Some(handle),
        })
    }

    /// Stop the runner and wait for the current tick to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.shutdown_tx.try_send(());
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for JobRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}
