//! Copy caller-supplied remote files into a staging directory.
//!
//! Failures are per file: one unreadable source never aborts the batch. Each failure is
//! recorded under the file name and the partial destination is removed.

use log::{debug, error};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read};
use std::path::{Component, Path};

use crate::engine::hashing::{COPY_CHUNK_SIZE, copy_and_hash, to_hex};
use crate::types::StagingError;
use crate::utils::tempfiles::{rename_temp_to_final, temp_path_for};

/// One readable remote file, already opened by the caller.
pub type RemoteSource = Box<dyn Read + Send>;

/// A file that was staged successfully.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedFile {
    pub name: String,
    pub size: u64,
    pub digest: [u8; 32],
}

#[derive(Clone, Debug, Default)]
pub struct StagingReport {
    pub staged: Vec<StagedFile>,
}

/// A staged file name must be a single plain path component.
pub fn validate_file_name(name: &str) -> Result<(), StagingError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains(['/', '\\']) => Ok(()),
        _ => Err(StagingError::security(format!(
            "refusing to stage file with unsafe name {name:?}"
        ))),
    }
}

fn classify(e: &io::Error) -> StagingError {
    if e.kind() == io::ErrorKind::PermissionDenied {
        StagingError::security(e.to_string())
    } else {
        StagingError::io(e.to_string())
    }
}

fn stage_one(dir: &Path, name: &str, source: &mut dyn Read) -> Result<StagedFile, StagingError> {
    validate_file_name(name)?;
    let dest = dir.join(name);
    let temp = temp_path_for(&dest);
    let copied = File::create(&temp).and_then(|f| {
        let mut writer = BufWriter::with_capacity(COPY_CHUNK_SIZE, f);
        let out = copy_and_hash(source, &mut writer)?;
        writer
            .into_inner()
            .map_err(|e| e.into_error())?
            .sync_all()?;
        Ok(out)
    });
    let (size, digest) = match copied {
        Ok(v) => v,
        Err(e) => {
            let _ = fs::remove_file(&temp);
            return Err(classify(&e));
        }
    };
    if let Err(e) = rename_temp_to_final(&temp, &dest) {
        let _ = fs::remove_file(&temp);
        let _ = fs::remove_file(&dest);
        return Err(StagingError::io(format!("{e:#}")));
    }
    Ok(StagedFile {
        name: name.to_string(),
        size,
        digest,
    })
}

/// Stage every source into `dir` (created if missing), replacing existing files.
/// Failures are added to `errors`; successes are returned in the report.
pub fn stage_files(
    dir: &Path,
    sources: BTreeMap<String, RemoteSource>,
    errors: &mut BTreeMap<String, StagingError>,
) -> StagingReport {
    let mut report = StagingReport::default();
    if let Err(e) = fs::create_dir_all(dir) {
        error!("Failed to create staging dir {}: {}", dir.display(), e);
        for name in sources.into_keys() {
            errors.insert(name, classify(&e));
        }
        return report;
    }
    for (name, mut source) in sources {
        match stage_one(dir, &name, source.as_mut()) {
            Ok(staged) => {
                debug!(
                    "Staged {} ({} bytes, blake3 {})",
                    staged.name,
                    staged.size,
                    to_hex(&staged.digest)
                );
                report.staged.push(staged);
            }
            Err(e) => {
                error!("Failed to stage {}: {}", name, e);
                errors.insert(name, e);
            }
        }
    }
    report
}
