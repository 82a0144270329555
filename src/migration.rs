//! Mutual exclusion with the data-migration subsystem.

use std::sync::atomic::{AtomicBool, Ordering};

/// Reports whether another migration currently owns the live store. A merge never runs while
/// this is true; it is retried later instead.
pub trait MigrationStateManager: Send + Sync {
    fn is_migration_in_progress(&self) -> bool;
}

/// No migration subsystem present.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoMigration;

impl MigrationStateManager for NoMigration {
    fn is_migration_in_progress(&self) -> bool {
        false
    }
}

/// Flag toggled by whoever runs migrations.
#[derive(Debug, Default)]
pub struct MigrationFlag {
    in_progress: AtomicBool,
}

impl MigrationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_in_progress(&self, in_progress: bool) {
        self.in_progress.store(in_progress, Ordering::SeqCst);
    }
}

impl MigrationStateManager for MigrationFlag {
    fn is_migration_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }
}
