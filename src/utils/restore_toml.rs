//! Load `.hcrestore.toml` from the data directory (CLI only). Lib callers build a [`RestoreConfig`] directly.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::config::{PackagePaths, RestoreConfig};

#[derive(Debug, Deserialize)]
pub(crate) struct RestoreToml {
    #[serde(default)]
    restore: RestoreSection,
}

#[derive(Debug, Default, Deserialize)]
struct RestoreSection {
    data_dir: Option<String>,
    download_timeout_hours: Option<u64>,
    staging_timeout_hours: Option<u64>,
    merging_timeout_hours: Option<u64>,
    merging_retry_hours: Option<u64>,
    deadline_window_secs: Option<u64>,
    executor_threads: Option<usize>,
    job_tick_secs: Option<u64>,
    verbose: Option<bool>,
}

/// Load the config file from `dir` if present. Returns None if missing or unreadable.
pub(crate) fn load_restore_toml(dir: &Path) -> Option<RestoreToml> {
    let path = dir.join(PackagePaths::get().config_filename());
    let s = std::fs::read_to_string(&path).ok()?;
    parse_restore_toml(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

pub(crate) fn parse_restore_toml(s: &str) -> Result<RestoreToml, toml::de::Error> {
    toml::from_str(s)
}

/// Overwrite config field from file when present, converting with `$conv`.
macro_rules! apply_file_opt {
    ($sec:expr, $cfg:expr, $sec_field:ident => $cfg_field:ident) => {
        if let Some(v) = $sec.$sec_field {
            $cfg.$cfg_field = v;
        }
    };
    ($sec:expr, $cfg:expr, $sec_field:ident => $cfg_field:ident, $conv:expr) => {
        if let Some(v) = $sec.$sec_field {
            $cfg.$cfg_field = $conv(v);
        }
    };
}

fn hours(h: u64) -> Duration {
    Duration::from_secs(h * 60 * 60)
}

/// Apply file config (only fields present in the file). Call before applying CLI flags.
pub(crate) fn apply_file_to_config(file: &RestoreToml, cfg: &mut RestoreConfig) {
    let sec = &file.restore;
    if let Some(ref p) = sec.data_dir {
        cfg.data_dir = PathBuf::from(p);
    }
    apply_file_opt!(sec, cfg, download_timeout_hours => download_timeout, hours);
    apply_file_opt!(sec, cfg, staging_timeout_hours => staging_timeout, hours);
    apply_file_opt!(sec, cfg, merging_timeout_hours => merging_timeout, hours);
    apply_file_opt!(sec, cfg, merging_retry_hours => merging_retry_delay, hours);
    apply_file_opt!(sec, cfg, deadline_window_secs => deadline_window, Duration::from_secs);
    apply_file_opt!(sec, cfg, job_tick_secs => job_tick, Duration::from_secs);
    apply_file_opt!(sec, cfg, executor_threads => executor_threads, |n: usize| n.max(1));
    apply_file_opt!(sec, cfg, verbose => verbose);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let file = parse_restore_toml(
            r#"
            [restore]
            staging_timeout_hours = 2
            executor_threads = 0
            verbose = true
            "#,
        )
        .unwrap();
        let mut cfg = RestoreConfig::default();
        apply_file_to_config(&file, &mut cfg);
        assert_eq!(cfg.staging_timeout, Duration::from_secs(7200));
        assert_eq!(cfg.executor_threads, 1);
        assert!(cfg.verbose);
        assert_eq!(cfg.merging_timeout, RestoreConfig::default().merging_timeout);
    }

    #[test]
    fn missing_section_keeps_defaults() {
        let file = parse_restore_toml("").unwrap();
        let mut cfg = RestoreConfig::default();
        apply_file_to_config(&file, &mut cfg);
        assert_eq!(cfg.download_timeout, RestoreConfig::default().download_timeout);
    }
}
