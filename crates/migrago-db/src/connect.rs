use migrago_common::{Error, Result};
use migrago_config::{DatabaseConfig, DatabaseKind};

use crate::session::Session;
use crate::sqlite::SqliteSession;

/// Open a session to the target database described by `config`.
///
/// This is the only place that branches on the database engine.
pub fn open_session(config: &DatabaseConfig) -> Result<Box<dyn Session>> {
    match config.kind {
        DatabaseKind::Sqlite => {
            if config.schema().is_some() {
                tracing::warn!("schema is ignored for sqlite databases");
            }
            Ok(Box::new(SqliteSession::open_dsn(&config.dsn)?))
        }
        #[cfg(feature = "postgres")]
        DatabaseKind::Postgres => Ok(Box::new(crate::postgres::PostgresSession::connect(
            &config.dsn,
            config.schema(),
        )?)),
        #[cfg(feature = "mysql")]
        DatabaseKind::Mysql => Ok(Box::new(crate::mysql::MysqlSession::connect(
            &config.dsn,
            config.schema(),
        )?)),
        DatabaseKind::Clickhouse => Err(Error::Config(
            "database type clickhouse is not supported by migrago".into(),
        )),
        #[allow(unreachable_patterns)]
        other => Err(Error::Config(format!(
            "database type {other} is not supported by this build (enable the `{other}` feature)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_sqlite_session() {
        let config = DatabaseConfig {
            kind: DatabaseKind::Sqlite,
            dsn: ":memory:".into(),
            schema: None,
        };
        let mut session = open_session(&config).unwrap();
        session
            .begin()
            .unwrap()
            .exec("CREATE TABLE t (id INTEGER);")
            .unwrap()
            .commit()
            .unwrap();
        session.close().unwrap();
    }

    #[test]
    fn clickhouse_is_a_config_error() {
        let config = DatabaseConfig {
            kind: DatabaseKind::Clickhouse,
            dsn: "tcp://localhost:9000".into(),
            schema: None,
        };
        let err = open_session(&config).err().unwrap();
        assert!(matches!(err, Error::Config(msg) if msg.contains("clickhouse")));
    }

    #[cfg(not(feature = "mysql"))]
    #[test]
    fn disabled_engine_is_a_config_error() {
        let config = DatabaseConfig {
            kind: DatabaseKind::Mysql,
            dsn: "mysql://localhost/app".into(),
            schema: None,
        };
        let err = open_session(&config).err().unwrap();
        assert!(matches!(err, Error::Config(msg) if msg.contains("mysql")));
    }
}
