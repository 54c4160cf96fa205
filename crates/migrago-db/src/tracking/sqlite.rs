use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use migrago_common::{Error, MigrationRecord, Result};
use rusqlite::{Connection, ErrorCode, params};
use tracing::info;

use super::{TrackingStore, closed};

const CREATE_TABLE: &str = r#"CREATE TABLE IF NOT EXISTS migration (
    "project" TEXT NOT NULL,
    "database" TEXT NOT NULL,
    "version" TEXT NOT NULL,
    "apply_time" INTEGER NOT NULL DEFAULT 0,
    "rollback" INTEGER NOT NULL DEFAULT 1,
    CONSTRAINT migration_pk PRIMARY KEY ("project", "database", "version")
);"#;

/// Relational tracking store in a SQLite file.
///
/// Must not share its file with a SQLite target database: the migration
/// transaction would hold the write lock the store needs.
pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening sqlite tracking store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::StorageUnavailable(format!("failed to open database: {e}")))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            Error::StorageUnavailable(format!("failed to open in-memory database: {e}"))
        })?;
        Self::with_connection(conn)
    }

    /// Create the parent directory and the `migration` table.
    pub fn provision(db_path: &Path) -> Result<()> {
        if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::StorageUnavailable(format!("failed to create {}: {e}", dir.display()))
            })?;
        }
        Self::open(db_path)?.close()
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(CREATE_TABLE)
            .map_err(|e| Error::StorageUnavailable(format!("failed to create table: {e}")))?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|_| Error::StorageUnavailable("tracking store lock poisoned".into()))
    }
}

impl TrackingStore for SqliteStore {
    fn create_namespace(&self, _project: &str, _database: &str) -> Result<()> {
        // Rows are scoped by columns; only check that the store is open.
        self.connection()?.as_ref().ok_or_else(closed)?;
        Ok(())
    }

    fn is_applied(&self, project: &str, database: &str, version: &str) -> Result<bool> {
        let guard = self.connection()?;
        let conn = guard.as_ref().ok_or_else(closed)?;
        let count: i64 = conn
            .query_row(
                r#"SELECT COUNT(*) FROM migration
                   WHERE "project" = ?1 AND "database" = ?2 AND "version" = ?3"#,
                params![project, database, version],
                |row| row.get(0),
            )
            .map_err(|e| Error::StorageUnavailable(format!("failed to check migration: {e}")))?;
        Ok(count > 0)
    }

    fn record_applied(&self, record: &MigrationRecord) -> Result<()> {
        let guard = self.connection()?;
        let conn = guard.as_ref().ok_or_else(closed)?;
        conn.execute(
            r#"INSERT INTO migration ("project", "database", "version", "apply_time", "rollback")
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                record.project,
                record.database,
                record.version,
                record.apply_time,
                record.revertible
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
                Error::DuplicateVersion {
                    project: record.project.clone(),
                    database: record.database.clone(),
                    version: record.version.clone(),
                }
            }
            other => Error::StorageUnavailable(format!("failed to record migration: {other}")),
        })?;
        Ok(())
    }

    fn list_applied(
        &self,
        project: &str,
        database: &str,
        skip_irreversible: bool,
        limit: Option<usize>,
    ) -> Result<Vec<MigrationRecord>> {
        let guard = self.connection()?;
        let conn = guard.as_ref().ok_or_else(closed)?;

        let mut query = String::from(
            r#"SELECT "project", "database", "version", "apply_time", "rollback"
               FROM migration WHERE "project" = ?1 AND "database" = ?2"#,
        );
        if skip_irreversible {
            query.push_str(r#" AND "rollback" = 1"#);
        }
        query.push_str(r#" ORDER BY "version" DESC LIMIT ?3"#);
        // A negative LIMIT means no limit in SQLite.
        let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));

        let mut stmt = conn
            .prepare(&query)
            .map_err(|e| Error::StorageUnavailable(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map(params![project, database, limit], |row| {
                Ok(MigrationRecord {
                    project: row.get(0)?,
                    database: row.get(1)?,
                    version: row.get(2)?,
                    apply_time: row.get(3)?,
                    revertible: row.get(4)?,
                })
            })
            .map_err(|e| Error::StorageUnavailable(format!("failed to list migrations: {e}")))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|e| {
                Error::StorageUnavailable(format!("failed to read migration row: {e}"))
            })?);
        }
        Ok(records)
    }

    fn delete_applied(&self, record: &MigrationRecord) -> Result<()> {
        let guard = self.connection()?;
        let conn = guard.as_ref().ok_or_else(closed)?;
        let deleted = conn
            .execute(
                r#"DELETE FROM migration
                   WHERE "project" = ?1 AND "database" = ?2 AND "version" = ?3"#,
                params![record.project, record.database, record.version],
            )
            .map_err(|e| Error::StorageUnavailable(format!("failed to delete migration: {e}")))?;

        if deleted == 0 {
            return Err(Error::RecordNotFound {
                project: record.project.clone(),
                database: record.database.clone(),
                version: record.version.clone(),
            });
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let Some(conn) = self.connection()?.take() else {
            return Ok(());
        };
        conn.close()
            .map_err(|(_, e)| Error::StorageUnavailable(format!("failed to close database: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(version: &str, revertible: bool) -> MigrationRecord {
        MigrationRecord::new("shop", "main", version, 1_700_000_000, revertible)
    }

    fn versions(records: Vec<MigrationRecord>) -> Vec<String> {
        records.into_iter().map(|r| r.version).collect()
    }

    #[test]
    fn record_and_check_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        store.create_namespace("shop", "main").unwrap();
        assert!(!store.is_applied("shop", "main", "v1").unwrap());

        store.record_applied(&record("v1", true)).unwrap();
        assert!(store.is_applied("shop", "main", "v1").unwrap());
        assert!(!store.is_applied("shop", "audit", "v1").unwrap());

        let listed = store.list_applied("shop", "main", false, None).unwrap();
        assert_eq!(listed, vec![record("v1", true)]);
    }

    #[test]
    fn duplicate_version_is_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        store.record_applied(&record("v1", true)).unwrap();

        let err = store.record_applied(&record("v1", true)).unwrap_err();
        assert!(matches!(err, Error::DuplicateVersion { .. }));
    }

    #[test]
    fn list_orders_filters_and_limits() {
        let store = SqliteStore::in_memory().unwrap();
        for (version, revertible) in [
            ("20230102_b", false),
            ("20230101_a", true),
            ("20230103_c", true),
        ] {
            store.record_applied(&record(version, revertible)).unwrap();
        }

        let limited = store.list_applied("shop", "main", false, Some(2)).unwrap();
        assert_eq!(versions(limited), vec!["20230103_c", "20230102_b"]);

        let reversible = store.list_applied("shop", "main", true, None).unwrap();
        assert_eq!(versions(reversible), vec!["20230103_c", "20230101_a"]);
    }

    #[test]
    fn delete_removes_exactly_one_record() {
        let store = SqliteStore::in_memory().unwrap();
        store.record_applied(&record("v1", true)).unwrap();
        store.record_applied(&record("v2", true)).unwrap();

        store.delete_applied(&record("v2", true)).unwrap();
        assert!(store.is_applied("shop", "main", "v1").unwrap());
        assert!(!store.is_applied("shop", "main", "v2").unwrap());

        let err = store.delete_applied(&record("v2", true)).unwrap_err();
        assert!(matches!(err, Error::RecordNotFound { .. }));
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let store = SqliteStore::in_memory().unwrap();
        store.close().unwrap();
        store.close().unwrap();

        let err = store.is_applied("shop", "main", "v1").unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[test]
    fn provision_creates_directory_and_table() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data").join("tracking.sqlite");
        SqliteStore::provision(&path).unwrap();
        SqliteStore::provision(&path).unwrap();

        let conn = Connection::open(&path).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'migration'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
