//! Application configuration constants and the runtime restore configuration.
//! Tuning and thresholds in one place.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    config_filename: String,
    prefs_filename: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                config_filename: format!(".{pkg}.toml"),
                prefs_filename: format!("{pkg}_prefs.db"),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Config file looked up in the data dir (CLI only).
    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    /// Per-user preference database holding the persisted restore state.
    pub fn prefs_filename(&self) -> &str {
        &self.prefs_filename
    }
}

// ---- On-disk file names ----

/// File names shared with the backup agent. Changing these breaks existing backups.
pub struct FileNames;

impl FileNames {
    /// Live health database, per user.
    pub const LIVE_DATABASE: &'static str = "healthconnect.db";
    /// Staged copy of a remote health database. Also the backup name of the live database.
    pub const STAGED_DATABASE: &'static str = "healthconnect_staged.db";
    /// First-grant-time XML, both live and restored.
    pub const GRANT_TIME_FILE: &'static str = "health-permissions-first-grant-times.xml";
    /// Staging directory under each user directory.
    pub const STAGED_DIR: &'static str = "remote_staged";
    /// Prefix for per-user directories (`user_0`, `user_10`, ...).
    pub const USER_DIR_PREFIX: &'static str = "user_";
}

// ---- Timers ----

const HOUR_MILLIS: u64 = 60 * 60 * 1000;
const DAY_MILLIS: u64 = 24 * HOUR_MILLIS;

/// Default intervals for the durable restore timers.
pub struct TimeoutConsts;

impl TimeoutConsts {
    /// Download must complete within this window after it started (or retried).
    pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_millis(14 * DAY_MILLIS);
    /// Staging must complete within this window after the download completed.
    pub const STAGING_TIMEOUT: Duration = Duration::from_millis(DAY_MILLIS);
    /// Merging must complete within this window after it started.
    pub const MERGING_TIMEOUT: Duration = Duration::from_millis(5 * DAY_MILLIS);
    /// Delay before retrying a merge that was blocked by a migration.
    pub const MERGING_RETRY_DELAY: Duration = Duration::from_millis(12 * HOUR_MILLIS);
    /// Slack between a job's minimum latency and its override deadline.
    pub const DEADLINE_WINDOW: Duration = Duration::from_secs(2 * 60);
}

// ---- Jobs / executor ----

/// How often the job runner checks for due jobs.
pub const JOB_TICK: Duration = Duration::from_secs(30);

/// Background executor worker count for staging-triggered merges.
pub const EXECUTOR_THREADS: usize = 2;

// ---- Database ----

/// Pages copied per backup step when snapshotting the live database.
pub const DB_BACKUP_PAGES_PER_STEP: i32 = 100;

// ---- Runtime configuration ----

/// Effective restore configuration: defaults, then `.hcrestore.toml`, then CLI flags.
#[derive(Clone, Debug)]
pub struct RestoreConfig {
    /// Root holding per-user directories and the preference database.
    pub data_dir: PathBuf,
    pub download_timeout: Duration,
    pub staging_timeout: Duration,
    pub merging_timeout: Duration,
    pub merging_retry_delay: Duration,
    pub deadline_window: Duration,
    pub executor_threads: usize,
    pub job_tick: Duration,
    pub verbose: bool,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            download_timeout: TimeoutConsts::DOWNLOAD_TIMEOUT,
            staging_timeout: TimeoutConsts::STAGING_TIMEOUT,
            merging_timeout: TimeoutConsts::MERGING_TIMEOUT,
            merging_retry_delay: TimeoutConsts::MERGING_RETRY_DELAY,
            deadline_window: TimeoutConsts::DEADLINE_WINDOW,
            executor_threads: EXECUTOR_THREADS,
            job_tick: JOB_TICK,
            verbose: false,
        }
    }
}

impl RestoreConfig {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Timer interval for `job`.
    pub fn interval_for(&self, job: crate::types::RestoreJob) -> Duration {
        use crate::types::RestoreJob;
        match job {
            RestoreJob::DownloadTimeout => self.download_timeout,
            RestoreJob::StagingTimeout => self.staging_timeout,
            RestoreJob::MergingTimeout => self.merging_timeout,
            RestoreJob::MergingRetry => self.merging_retry_delay,
        }
    }
}
