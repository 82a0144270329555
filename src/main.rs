//! hcrestore CLI: inspect and drive the restore state machine of one user.

use anyhow::Result;
use clap::Parser;
use hcrestore::engine::arg_parser::Cli;
use hcrestore::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
