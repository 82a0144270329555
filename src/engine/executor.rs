//! Background task execution for work that must not block the calling thread
//! (the merge that follows staging, resumed merges on user setup).

use crossbeam_channel::{Sender, unbounded};
use log::error;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Count of submitted-but-unfinished tasks, with a condvar for `wait_idle`.
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn inc(&self) {
        if let Ok(mut n) = self.count.lock() {
            *n += 1;
        }
    }

    fn dec(&self) {
        if let Ok(mut n) = self.count.lock() {
            *n = n.saturating_sub(1);
            if *n == 0 {
                self.idle.notify_all();
            }
        }
    }

    fn wait_zero(&self) {
        let Ok(mut n) = self.count.lock() else {
            return;
        };
        while *n > 0 {
            n = match self.idle.wait(n) {
                Ok(g) => g,
                Err(_) => return,
            };
        }
    }
}

struct Pool {
    task_tx: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    in_flight: Arc<InFlight>,
}

/// Runs tasks either on a small worker pool or inline on the caller's thread.
pub struct TaskExecutor {
    pool: Option<Pool>,
}

/// Single worker: run tasks until the channel closes. A panicking task is logged, not fatal.
fn worker_loop(task_rx: crossbeam_channel::Receiver<Task>, in_flight: Arc<InFlight>) {
    while let Ok(task) = task_rx.recv() {
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!("Background task panicked");
        }
        in_flight.dec();
    }
}

impl TaskExecutor {
    /// Pool of `num_threads` workers (at least one).
    pub fn pool(num_threads: usize) -> Self {
        let (task_tx, task_rx) = unbounded::<Task>();
        let in_flight = Arc::new(InFlight::default());
        let workers = (0..num_threads.max(1))
            .map(|i| {
                let task_rx = task_rx.clone();
                let in_flight = Arc::clone(&in_flight);
                thread::Builder::new()
                    .name(format!("{}-bg-{i}", env!("CARGO_PKG_NAME")))
                    .spawn(move || worker_loop(task_rx, in_flight))
            })
            .filter_map(|r| r.map_err(|e| error!("spawn worker: {}", e)).ok())
            .collect::<Vec<_>>();
        if workers.is_empty() {
            return Self::inline();
        }
        Self {
            pool: Some(Pool {
                task_tx: Some(task_tx),
                workers,
                in_flight,
            }),
        }
    }

    /// Run every task synchronously inside `submit`.
    pub fn inline() -> Self {
        Self { pool: None }
    }

    pub fn is_inline(&self) -> bool {
        self.pool.is_none()
    }

    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(pool) = self.pool.as_ref() else {
            task();
            return;
        };
        let Some(tx) = pool.task_tx.as_ref() else {
            task();
            return;
        };
        pool.in_flight.inc();
        if let Err(e) = tx.send(Box::new(task)) {
            pool.in_flight.dec();
            // Workers are gone; run it here rather than drop it.
            (e.into_inner())();
        }
    }

    /// Block until every submitted task has finished.
    pub fn wait_idle(&self) {
        if let Some(pool) = self.pool.as_ref() {
            pool.in_flight.wait_zero();
        }
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.as_mut() {
            // Dropping the last sender closes the channel so workers exit.
            drop(pool.task_tx.take());
            let me = thread::current().id();
            for h in pool.workers.drain(..) {
                // The last owner may be one of our own workers.
                if h.thread().id() != me {
                    let _ = h.join();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn pool_runs_all_tasks_before_idle() {
        let exec = TaskExecutor::pool(3);
        assert!(!exec.is_inline());
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let done = Arc::clone(&done);
            exec.submit(move || {
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        exec.wait_idle();
        assert_eq!(done.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn panicking_task_does_not_kill_pool() {
        let exec = TaskExecutor::pool(1);
        exec.submit(|| panic!("boom"));
        let done = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&done);
        exec.submit(move || {
            d.fetch_add(1, Ordering::SeqCst);
        });
        exec.wait_idle();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn inline_runs_immediately() {
        let exec = TaskExecutor::inline();
        assert!(exec.is_inline());
        let done = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&done);
        exec.submit(move || {
            d.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
