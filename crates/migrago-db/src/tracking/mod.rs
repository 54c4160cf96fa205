//! Durable record of applied migrations.
//!
//! A store is picked once from `migration_storage` in the config and passed
//! explicitly to the engine. Stores and target sessions are independent
//! resources: there is no transaction spanning both.

pub mod bucket;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sqlite;

use migrago_common::{Error, MigrationRecord, Result};
use migrago_config::{StorageConfig, StorageType};
use tracing::info;

pub use bucket::BucketStore;
pub use sqlite::SqliteStore;

/// Capability set every tracking backend provides.
///
/// Duplicate inserts are rejected with [`Error::DuplicateVersion`] and
/// deleting an absent record fails with [`Error::RecordNotFound`] in every
/// backend.
pub trait TrackingStore {
    /// Ensure a partition for (project, database) exists. Idempotent.
    fn create_namespace(&self, project: &str, database: &str) -> Result<()>;

    fn is_applied(&self, project: &str, database: &str, version: &str) -> Result<bool>;

    fn record_applied(&self, record: &MigrationRecord) -> Result<()>;

    /// Applied records, newest version first, at most `limit` of them.
    /// Irreversible records are left out when `skip_irreversible` is set.
    fn list_applied(
        &self,
        project: &str,
        database: &str,
        skip_irreversible: bool,
        limit: Option<usize>,
    ) -> Result<Vec<MigrationRecord>>;

    fn delete_applied(&self, record: &MigrationRecord) -> Result<()>;

    /// Release the underlying handle. Calling it again is a no-op; any other
    /// operation afterwards fails with [`Error::StorageUnavailable`].
    fn close(&self) -> Result<()>;
}

/// Open the tracking store selected by `config`.
pub fn open_store(config: &StorageConfig) -> Result<Box<dyn TrackingStore>> {
    info!("opening {} tracking store", config.storage_type);
    match config.storage_type {
        StorageType::Embedded => Ok(Box::new(BucketStore::open(&config.path_or_default())?)),
        StorageType::Sqlite => Ok(Box::new(SqliteStore::open(&sqlite_path(config))?)),
        #[cfg(feature = "postgres")]
        StorageType::Postgres => Ok(Box::new(self::postgres::PostgresStore::connect(
            required_dsn(config)?,
            config.schema(),
        )?)),
        #[cfg(not(feature = "postgres"))]
        StorageType::Postgres => Err(postgres_disabled()),
    }
}

/// Prepare the backend for first use: create the data directory of the
/// file stores, or the `migration` table of the relational ones.
pub fn provision(config: &StorageConfig) -> Result<()> {
    info!("provisioning {} tracking store", config.storage_type);
    match config.storage_type {
        StorageType::Embedded => BucketStore::provision(&config.path_or_default()),
        StorageType::Sqlite => SqliteStore::provision(&sqlite_path(config)),
        #[cfg(feature = "postgres")]
        StorageType::Postgres => {
            self::postgres::PostgresStore::provision(required_dsn(config)?, config.schema())
        }
        #[cfg(not(feature = "postgres"))]
        StorageType::Postgres => Err(postgres_disabled()),
    }
}

/// The sqlite store takes its file from `path`, falling back to `dsn`.
fn sqlite_path(config: &StorageConfig) -> std::path::PathBuf {
    match (&config.path, &config.dsn) {
        (None, Some(dsn)) => dsn.strip_prefix("sqlite://").unwrap_or(dsn).into(),
        _ => config.path_or_default(),
    }
}

#[cfg(feature = "postgres")]
fn required_dsn(config: &StorageConfig) -> Result<&str> {
    config
        .dsn
        .as_deref()
        .filter(|dsn| !dsn.trim().is_empty())
        .ok_or_else(|| Error::Config("migration_storage.dsn is required for postgres".into()))
}

#[cfg(not(feature = "postgres"))]
fn postgres_disabled() -> Error {
    Error::Config(
        "postgres tracking store is not supported by this build (enable the `postgres` feature)"
            .into(),
    )
}

pub(crate) fn closed() -> Error {
    Error::StorageUnavailable("tracking store is closed".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_path_prefers_path_then_dsn() {
        let mut config = StorageConfig {
            storage_type: StorageType::Sqlite,
            path: None,
            dsn: Some("sqlite:///var/lib/migrago.sqlite".into()),
            schema: None,
        };
        assert_eq!(
            sqlite_path(&config),
            std::path::PathBuf::from("/var/lib/migrago.sqlite")
        );

        config.path = Some("tracking.sqlite".into());
        assert_eq!(sqlite_path(&config), std::path::PathBuf::from("tracking.sqlite"));
    }

    #[test]
    fn provision_then_open_each_file_store() {
        let tmp = tempfile::tempdir().unwrap();
        for (storage_type, file) in [
            (StorageType::Embedded, "nested/migrations.db"),
            (StorageType::Sqlite, "nested/migrations.sqlite"),
        ] {
            let config = StorageConfig {
                storage_type,
                path: Some(tmp.path().join(storage_type.to_string()).join(file)),
                dsn: None,
                schema: None,
            };
            provision(&config).unwrap();

            let store = open_store(&config).unwrap();
            store.create_namespace("shop", "main").unwrap();
            assert!(!store.is_applied("shop", "main", "v1").unwrap());
            store.close().unwrap();
        }
    }
}
