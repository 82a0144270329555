//! Durable restore timers and the machinery that fires them.

mod runner;
mod scheduler;
mod timer;

pub use runner::{JobRunner, JobTarget, run_due};
pub use scheduler::{JobRequest, JobScheduler, LocalJobScheduler};
pub use timer::DurableTimer;
