//! Colored `env_logger` output: `[hcrestore] msg`, with level and module for warnings and errors.

use colored::Colorize;
use env_logger::Builder;
use log::{Level, LevelFilter, Record};
use std::io::{self, Write};

const PKG: &str = env!("CARGO_PKG_NAME");

/// Module path without the crate prefix (`restore::merge` instead of `hcrestore::restore::merge`).
fn short_target(target: &str) -> &str {
    target
        .strip_prefix(PKG)
        .map(|t| t.trim_start_matches("::"))
        .filter(|t| !t.is_empty())
        .unwrap_or(target)
}

fn write_record(buf: &mut impl Write, record: &Record<'_>) -> io::Result<()> {
    let level = match record.level() {
        Level::Error => "ERROR".red(),
        Level::Warn => "WARN".yellow(),
        _ => return writeln!(buf, "[{}] {}", PKG.cyan(), record.args()),
    };
    writeln!(
        buf,
        "[{} {} {}] {}",
        PKG.cyan(),
        level,
        short_target(record.target()).white(),
        record.args()
    )
}

/// Dependencies log at `Warn`; this crate at `Info`, or `Debug` when verbose. `RUST_LOG` still
/// applies on top. Safe to call more than once.
pub fn setup_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn)
        .filter_module(PKG, level)
        .format(|buf, record| write_record(buf, record))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_crate_prefix() {
        assert_eq!(short_target("hcrestore::restore::merge"), "restore::merge");
        assert_eq!(short_target("hcrestore"), "hcrestore");
        assert_eq!(short_target("rusqlite::conn"), "rusqlite::conn");
    }
}
