use migrago_common::{MigrationRecord, Result};
use migrago_db::TrackingStore;

/// Applied migrations of a pair, newest first.
pub fn history(
    store: &dyn TrackingStore,
    project: &str,
    database: &str,
    limit: Option<usize>,
    skip_irreversible: bool,
) -> Result<Vec<MigrationRecord>> {
    store.list_applied(project, database, skip_irreversible, limit)
}

/// One line of `list` output.
pub fn describe(record: &MigrationRecord) -> String {
    if record.revertible {
        format!("migration: {}", record.version)
    } else {
        format!("migration: {} (no rollback)", record.version)
    }
}
