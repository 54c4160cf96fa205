use serde::{Deserialize, Serialize};

/// One applied migration, keyed by (project, database, version).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub project: String,
    pub database: String,
    pub version: String,
    /// Seconds since the Unix epoch, UTC.
    pub apply_time: i64,
    /// Whether a down script existed when the migration was applied.
    pub revertible: bool,
}

impl MigrationRecord {
    pub fn new(
        project: impl Into<String>,
        database: impl Into<String>,
        version: impl Into<String>,
        apply_time: i64,
        revertible: bool,
    ) -> Self {
        Self {
            project: project.into(),
            database: database.into(),
            version: version.into(),
            apply_time,
            revertible,
        }
    }
}
