//! Backup side: which files a backup contains and producing them from the live store.

use anyhow::{Context, Result};
use log::{error, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, Write};

use super::BackupRestore;
use crate::engine::db_ops::{backup_to_file, remove_db_files};
use crate::engine::grant_times::{parse_grant_times, serialize_grant_times};
use crate::engine::hashing::{copy_and_hash, to_hex};
use crate::utils::tempfiles::temp_path_for;
use crate::utils::{FileNames, UserId};

/// File names a backup consists of. The database only travels device-to-device; cloud backups
/// carry the grant times alone.
pub fn all_backup_file_names(for_device_to_device: bool) -> BTreeSet<&'static str> {
    let mut names = BTreeSet::new();
    if for_device_to_device {
        names.insert(FileNames::STAGED_DATABASE);
    }
    names.insert(FileNames::GRANT_TIME_FILE);
    names
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BackedUpFile {
    pub name: String,
    pub size: u64,
    pub digest: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct BackupReport {
    pub written: Vec<BackedUpFile>,
    /// Requested names that were skipped or failed.
    pub skipped: Vec<String>,
}

impl BackupRestore {
    /// Write each requested backup file into its destination. Failures are logged per file and
    /// the remaining files are still written.
    pub fn all_data_for_backup(
        &self,
        destinations: BTreeMap<String, Box<dyn Write + Send>>,
        user: UserId,
    ) -> BackupReport {
        let mut report = BackupReport::default();
        for (name, mut dest) in destinations {
            let result = match name.as_str() {
                FileNames::STAGED_DATABASE => self.backup_database(user, dest.as_mut()),
                FileNames::GRANT_TIME_FILE => self.backup_grant_times(user, dest.as_mut()),
                _ => {
                    warn!("Not a backup file: {}", name);
                    report.skipped.push(name.clone());
                    continue;
                }
            };
            match result {
                Ok((size, digest)) => {
                    info!("Backed up {} ({} bytes, blake3 {})", name, size, to_hex(&digest));
                    report.written.push(BackedUpFile {
                        name,
                        size,
                        digest: to_hex(&digest),
                    });
                }
                Err(e) => {
                    error!("Backing up {}: {:#}", name, e);
                    report.skipped.push(name);
                }
            }
        }
        report
    }

    /// Snapshot the live database with the online backup API, then stream the snapshot.
    fn backup_database(&self, user: UserId, dest: &mut dyn Write) -> Result<(u64, [u8; 32])> {
        let live = self.dirs.live_db_path(user);
        if !live.exists() {
            anyhow::bail!("no live database at {}", live.display());
        }
        let snapshot = temp_path_for(&self.dirs.data_dir(user).join(FileNames::STAGED_DATABASE));
        let result = backup_to_file(&live, &snapshot).and_then(|()| {
            let file = File::open(&snapshot)
                .with_context(|| format!("open snapshot {}", snapshot.display()))?;
            copy_and_hash(&mut BufReader::new(file), dest).context("write database backup")
        });
        remove_db_files(&snapshot)?;
        result
    }

    fn backup_grant_times(&self, user: UserId, dest: &mut dyn Write) -> Result<(u64, [u8; 32])> {
        let state = parse_grant_times(&self.dirs.live_grant_time_path(user))?;
        let bytes = serialize_grant_times(&state)?;
        copy_and_hash(&mut bytes.as_slice(), dest).context("write grant times backup")
    }
}
