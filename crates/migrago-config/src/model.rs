use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default location of the embedded tracking store.
pub const DEFAULT_STORAGE_PATH: &str = "data/migrations.db";

/// Root of the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub migration_storage: StorageConfig,

    #[serde(default)]
    pub projects: BTreeMap<String, ProjectConfig>,

    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseConfig>,
}

/// Where applied migrations are tracked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub storage_type: StorageType,

    /// Data file for the embedded and sqlite stores.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub dsn: Option<String>,

    #[serde(default)]
    pub schema: Option<String>,
}

impl StorageConfig {
    pub fn path_or_default(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_PATH))
    }

    pub fn schema(&self) -> Option<&str> {
        non_empty(self.schema.as_deref())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Nested-bucket file store; `boltdb` is accepted for older configs.
    #[default]
    #[serde(alias = "boltdb")]
    Embedded,
    Sqlite,
    Postgres,
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageType::Embedded => "embedded",
            StorageType::Sqlite => "sqlite",
            StorageType::Postgres => "postgres",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Each entry maps a database name to a migration directory.
    #[serde(default)]
    pub migrations: Vec<BTreeMap<String, PathBuf>>,
}

/// Connection descriptor of a target database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub kind: DatabaseKind,

    pub dsn: String,

    #[serde(default)]
    pub schema: Option<String>,
}

impl DatabaseConfig {
    pub fn schema(&self) -> Option<&str> {
        non_empty(self.schema.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Sqlite,
    Postgres,
    Mysql,
    /// Accepted so existing configs load; no session driver is built for it.
    Clickhouse,
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DatabaseKind::Sqlite => "sqlite",
            DatabaseKind::Postgres => "postgres",
            DatabaseKind::Mysql => "mysql",
            DatabaseKind::Clickhouse => "clickhouse",
        };
        f.write_str(name)
    }
}

/// A project bound to one database and its migration directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMigration {
    pub project: String,
    pub database: String,
    /// Absolute path of the migration directory.
    pub path: PathBuf,
    pub connection: DatabaseConfig,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_defaults_to_embedded_file() {
        let cfg = StorageConfig::default();
        assert_eq!(cfg.storage_type, StorageType::Embedded);
        assert_eq!(cfg.path_or_default(), PathBuf::from("data/migrations.db"));
    }

    #[test]
    fn blank_schema_is_treated_as_unset() {
        let db = DatabaseConfig {
            kind: DatabaseKind::Postgres,
            dsn: "postgres://localhost/app".into(),
            schema: Some("  ".into()),
        };
        assert_eq!(db.schema(), None);
    }

    #[test]
    fn boltdb_alias_maps_to_embedded() {
        let cfg: StorageConfig = serde_yaml::from_str("storage_type: boltdb").unwrap();
        assert_eq!(cfg.storage_type, StorageType::Embedded);
    }
}
