pub mod clock;
pub mod config;
pub mod dirs;
pub mod logger;
pub(crate) mod restore_toml;
pub mod tempfiles;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::*;
pub use dirs::{UserDirs, UserId};
pub use logger::setup_logging;
pub use tempfiles::{remove_db_sidecars, remove_dir_if_exists, write_atomically};
