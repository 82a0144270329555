//! CLI command handlers: build the restore core from config, run one command, print the result.

use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::arg_parser::{Cli, Commands};
use crate::engine::db_ops::SqliteDatabaseMerger;
use crate::engine::executor::TaskExecutor;
use crate::engine::staging::RemoteSource;
use crate::jobs::{JobRunner, LocalJobScheduler, run_due};
use crate::migration::NoMigration;
use crate::prefs::SqliteUserPreferences;
use crate::restore::{BackupRestore, LoggingStagingCallback, RestoreDeps, all_backup_file_names};
use crate::types::StagingError;
use crate::utils::restore_toml::{apply_file_to_config, load_restore_toml};
use crate::utils::{PackagePaths, RestoreConfig, SystemClock, UserDirs, UserId, setup_logging};

/// Defaults, then `.hcrestore.toml` in the data directory, then flags.
pub fn build_config(cli: &Cli) -> RestoreConfig {
    let dir = cli.data_dir();
    let mut cfg = RestoreConfig::with_data_dir(&dir);
    if let Some(file) = load_restore_toml(&dir) {
        apply_file_to_config(&file, &mut cfg);
    }
    if let Some(ref d) = cli.data_dir {
        cfg.data_dir = d.clone();
    }
    if let Some(v) = cli.verbose {
        cfg.verbose = v;
    }
    cfg
}

/// Restore core keeping each user's state in a preference database in that user's directory.
fn open_restore(cfg: &RestoreConfig) -> Result<(Arc<BackupRestore>, Arc<LocalJobScheduler>)> {
    fs::create_dir_all(&cfg.data_dir)
        .with_context(|| format!("create data directory {}", cfg.data_dir.display()))?;
    let clock = Arc::new(SystemClock);
    let scheduler = Arc::new(LocalJobScheduler::new(clock.clone()));
    let prefs = Arc::new(SqliteUserPreferences::new(UserDirs::new(&cfg.data_dir)));
    let restore = BackupRestore::new(RestoreDeps {
        prefs,
        scheduler: scheduler.clone(),
        migration: Arc::new(NoMigration),
        merger: Arc::new(SqliteDatabaseMerger),
        clock,
        executor: TaskExecutor::pool(cfg.executor_threads),
        config: cfg.clone(),
    });
    Ok((restore, scheduler))
}

fn print_result<T: Serialize + std::fmt::Debug>(json: bool, value: &T) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value).context("serialize output")?);
    } else {
        println!("{:#?}", value);
    }
    Ok(())
}

/// Run one command against the restore state of `--user`.
pub fn handle_run(cli: &Cli) -> Result<()> {
    let cfg = build_config(cli);
    setup_logging(cfg.verbose);
    debug!(
        "{} CONFIG:{:#?}",
        PackagePaths::get().pkg_name().to_uppercase(),
        cfg
    );
    let user = cli.user;
    let (restore, scheduler) = open_restore(&cfg)?;
    restore.setup_for_user(user)?;

    match &cli.command {
        Commands::Status => {}
        Commands::Download { state } => restore.update_data_download_state(*state)?,
        Commands::Stage { files } => handle_stage(&restore, files, user)?,
        Commands::Merge => {
            let outcome = restore.merge()?;
            info!("Merge: {:?}", outcome);
        }
        Commands::Reset => restore.delete_and_reset_everything(user)?,
        Commands::Backup { out_dir, d2d } => {
            fs::create_dir_all(out_dir)
                .with_context(|| format!("create {}", out_dir.display()))?;
            let mut destinations: BTreeMap<String, Box<dyn Write + Send>> = BTreeMap::new();
            for name in all_backup_file_names(*d2d) {
                let path = out_dir.join(name);
                let file = File::create(&path)
                    .with_context(|| format!("create {}", path.display()))?;
                destinations.insert(name.to_string(), Box::new(file));
            }
            let report = restore.all_data_for_backup(destinations, user);
            restore.wait_for_background_work();
            return print_result(cli.json, &report);
        }
        Commands::Jobs => {
            let ran = run_due(&scheduler, restore.as_ref());
            info!("Ran {} due job(s)", ran);
            if let Some(next) = scheduler.next_due_in() {
                info!("Next job due in {:?}", next);
            }
        }
        Commands::Run => run_until_interrupted(&restore, &scheduler, &cfg)?,
    }

    restore.wait_for_background_work();
    print_result(cli.json, &restore.status()?)
}

fn handle_stage(restore: &BackupRestore, files: &[PathBuf], user: UserId) -> Result<()> {
    if !restore.prep_for_staging_if_not_already_done()? {
        info!("Staging already done or in progress; nothing staged");
        return Ok(());
    }
    let mut sources: BTreeMap<String, RemoteSource> = BTreeMap::new();
    let mut exceptions = BTreeMap::new();
    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        match File::open(path) {
            Ok(f) => {
                sources.insert(name, Box::new(f));
            }
            Err(e) => {
                exceptions.insert(
                    name,
                    StagingError::io(format!("open {}: {}", path.display(), e)),
                );
            }
        }
    }
    let report = restore.stage_all_remote_data(sources, exceptions, user, &LoggingStagingCallback);
    info!("Staged {} file(s)", report.staged.len());
    Ok(())
}

/// Run the job runner until Ctrl+C, then record how far each timer got.
fn run_until_interrupted(
    restore: &Arc<BackupRestore>,
    scheduler: &Arc<LocalJobScheduler>,
    cfg: &RestoreConfig,
) -> Result<()> {
    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("set Ctrl+C handler")?;

    let runner = JobRunner::spawn(scheduler.clone(), restore.clone(), cfg.job_tick)?;
    info!("Running jobs every {:?}; Ctrl+C to stop", cfg.job_tick);
    let _ = stop_rx.recv();
    runner.stop();
    restore.on_user_switching()
}
