use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Temp sibling for `path` (same directory, so the final rename stays atomic).
pub fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tmp".to_string());
    path.parent()
        .unwrap_or(Path::new("."))
        .join(format!("{name}.tmp"))
}

/// Remove SQLite sidecar files (`-wal`, `-shm`, `-journal`) next to a database path.
pub fn remove_db_sidecars(db_path: &Path) {
    let file_name = db_path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    let parent = db_path.parent().unwrap_or(Path::new("."));
    for suffix in ["-wal", "-shm", "-journal"] {
        let _ = fs::remove_file(parent.join(format!("{file_name}{suffix}")));
    }
}

/// Write `bytes` to a temp file, fsync, then rename over `path`.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = temp_path_for(path);
    {
        let mut f = fs::File::create(&temp_path)
            .with_context(|| format!("create temp file {}", temp_path.display()))?;
        f.write_all(bytes)
            .with_context(|| format!("write temp file {}", temp_path.display()))?;
        f.sync_all().context("sync temp file")?;
    }
    rename_temp_to_final(&temp_path, path)
}

pub fn rename_temp_to_final(temp_path: &Path, final_path: &Path) -> Result<()> {
    fs::rename(temp_path, final_path).with_context(|| {
        format!(
            "atomic rename temp file to final path ({} -> {})",
            temp_path.display(),
            final_path.display()
        )
    })
}

/// Remove a directory tree; a missing directory is not an error.
pub fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove directory {}", dir.display())),
    }
}
