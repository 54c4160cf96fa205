use std::sync::{Mutex, MutexGuard};

use ::postgres::error::SqlState;
use ::postgres::{Client, NoTls};
use migrago_common::{Error, MigrationRecord, Result};
use tracing::info;

use super::{TrackingStore, closed};
use crate::postgres::{set_search_path, split_schema_param};

const CREATE_TABLE: &str = r#"CREATE TABLE IF NOT EXISTS migration (
    "project" varchar(255) NOT NULL,
    "database" varchar(255) NOT NULL,
    "version" varchar(255) NOT NULL,
    "apply_time" bigint NOT NULL DEFAULT 0,
    "rollback" bool NOT NULL DEFAULT true,
    CONSTRAINT migration_pk PRIMARY KEY ("project", "database", "version")
);"#;

/// Relational tracking store in a PostgreSQL `migration` table.
///
/// The table is only created by [`PostgresStore::provision`].
pub struct PostgresStore {
    client: Mutex<Option<Client>>,
}

impl PostgresStore {
    pub fn connect(dsn: &str, schema: Option<&str>) -> Result<Self> {
        let client = connect_client(dsn, schema)?;
        info!("connected to postgres tracking store");
        Ok(Self {
            client: Mutex::new(Some(client)),
        })
    }

    pub fn provision(dsn: &str, schema: Option<&str>) -> Result<()> {
        let mut client = connect_client(dsn, schema)?;
        client
            .batch_execute(CREATE_TABLE)
            .map_err(|e| Error::StorageUnavailable(format!("failed to create table: {e}")))?;
        client
            .close()
            .map_err(|e| Error::StorageUnavailable(format!("failed to close connection: {e}")))
    }

    fn client(&self) -> Result<MutexGuard<'_, Option<Client>>> {
        self.client
            .lock()
            .map_err(|_| Error::StorageUnavailable("tracking store lock poisoned".into()))
    }
}

fn connect_client(dsn: &str, schema: Option<&str>) -> Result<Client> {
    let (dsn, dsn_schema) = split_schema_param(dsn);
    let mut client = Client::connect(&dsn, NoTls)
        .map_err(|e| Error::StorageUnavailable(format!("failed to connect to postgres: {e}")))?;
    if let Some(schema) = dsn_schema.as_deref().or(schema) {
        set_search_path(&mut client, schema)
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
    }
    Ok(client)
}

fn unavailable(action: &str) -> impl FnOnce(::postgres::Error) -> Error + '_ {
    move |e| Error::StorageUnavailable(format!("failed to {action}: {e}"))
}

impl TrackingStore for PostgresStore {
    fn create_namespace(&self, _project: &str, _database: &str) -> Result<()> {
        self.client()?.as_ref().ok_or_else(closed)?;
        Ok(())
    }

    fn is_applied(&self, project: &str, database: &str, version: &str) -> Result<bool> {
        let mut guard = self.client()?;
        let client = guard.as_mut().ok_or_else(closed)?;
        let row = client
            .query_one(
                r#"SELECT COUNT(*) FROM migration
                   WHERE "project" = $1 AND "database" = $2 AND "version" = $3"#,
                &[&project, &database, &version],
            )
            .map_err(unavailable("check migration"))?;
        let count: i64 = row.get(0);
        Ok(count > 0)
    }

    fn record_applied(&self, record: &MigrationRecord) -> Result<()> {
        let mut guard = self.client()?;
        let client = guard.as_mut().ok_or_else(closed)?;
        client
            .execute(
                r#"INSERT INTO migration ("project", "database", "version", "apply_time", "rollback")
                   VALUES ($1, $2, $3, $4, $5)"#,
                &[
                    &record.project,
                    &record.database,
                    &record.version,
                    &record.apply_time,
                    &record.revertible,
                ],
            )
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    Error::DuplicateVersion {
                        project: record.project.clone(),
                        database: record.database.clone(),
                        version: record.version.clone(),
                    }
                } else {
                    Error::StorageUnavailable(format!("failed to record migration: {e}"))
                }
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
        let mut guard = self.client()?;
        let client = guard.as_mut().ok_or_else(closed)?;

        let mut query = String::from(
            r#"SELECT "project", "database", "version", "apply_time", "rollback"
               FROM migration WHERE "project" = $1 AND "database" = $2"#,
        );
        if skip_irreversible {
            query.push_str(r#" AND "rollback" = true"#);
        }
        query.push_str(r#" ORDER BY "version" DESC"#);
        if let Some(limit) = limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        let rows = client
            .query(query.as_str(), &[&project, &database])
            .map_err(unavailable("list migrations"))?;
        Ok(rows
            .iter()
            .map(|row| MigrationRecord {
                project: row.get(0),
                database: row.get(1),
                version: row.get(2),
                apply_time: row.get(3),
                revertible: row.get(4),
            })
            .collect())
    }

    fn delete_applied(&self, record: &MigrationRecord) -> Result<()> {
        let mut guard = self.client()?;
        let client = guard.as_mut().ok_or_else(closed)?;
        let deleted = client
            .execute(
                r#"DELETE FROM migration
                   WHERE "project" = $1 AND "database" = $2 AND "version" = $3"#,
                &[&record.project, &record.database, &record.version],
            )
            .map_err(unavailable("delete migration"))?;

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
        let Some(client) = self.client()?.take() else {
            return Ok(());
        };
        client.close().map_err(unavailable("close connection"))
    }
}
