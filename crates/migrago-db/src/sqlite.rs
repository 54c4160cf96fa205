use std::path::Path;

use migrago_common::{Error, Result};
use rusqlite::Connection;
use tracing::info;

use crate::session::{Session, Transaction, TransactionDriver};

/// Target-database session backed by a SQLite file.
pub struct SqliteSession {
    conn: Connection,
}

impl SqliteSession {
    /// Open a session from a DSN: a file path, optionally prefixed with
    /// `sqlite://`, or `:memory:`.
    pub fn open_dsn(dsn: &str) -> Result<Self> {
        let path = dsn.strip_prefix("sqlite://").unwrap_or(dsn);
        if path == ":memory:" {
            return Self::in_memory();
        }
        Self::open(Path::new(path))
    }

    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening sqlite database at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;
        Ok(Self { conn })
    }

    /// Direct access to the underlying connection, outside any migration
    /// transaction.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Session for SqliteSession {
    fn begin(&mut self) -> Result<Transaction<'_>> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;
        Ok(Transaction::new(SqliteTransaction(tx)))
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| Error::Database(format!("failed to close database: {e}")))
    }
}

struct SqliteTransaction<'a>(rusqlite::Transaction<'a>);

impl TransactionDriver for SqliteTransaction<'_> {
    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.0
            .execute_batch(sql)
            .map_err(|e| Error::Database(e.to_string()))
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let SqliteTransaction(tx) = *self;
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit: {e}")))
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        let SqliteTransaction(tx) = *self;
        tx.rollback()
            .map_err(|e| Error::Database(format!("failed to roll back: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(session: &SqliteSession, name: &str) -> bool {
        session
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |row| row.get::<_, i64>(0),
            )
            .unwrap()
            > 0
    }

    #[test]
    fn committed_script_is_visible() {
        let mut session = SqliteSession::in_memory().unwrap();
        let tx = session.begin().unwrap();
        tx.exec("CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (1);")
            .unwrap()
            .commit()
            .unwrap();

        assert!(table_exists(&session, "t"));
    }

    #[test]
    fn rolled_back_script_leaves_no_trace() {
        let mut session = SqliteSession::in_memory().unwrap();
        let tx = session.begin().unwrap();
        tx.exec("CREATE TABLE t (id INTEGER);")
            .unwrap()
            .rollback()
            .unwrap();

        assert!(!table_exists(&session, "t"));
    }

    #[test]
    fn failing_statement_rolls_back_whole_batch() {
        let mut session = SqliteSession::in_memory().unwrap();
        let tx = session.begin().unwrap();
        assert!(
            tx.exec("CREATE TABLE t (id INTEGER); INSERT INTO missing VALUES (1);")
                .is_err()
        );
        assert!(!table_exists(&session, "t"));
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let mut session = SqliteSession::in_memory().unwrap();
        {
            let tx = session.begin().unwrap();
            let _tx = tx.exec("CREATE TABLE t (id INTEGER);").unwrap();
        }
        assert!(!table_exists(&session, "t"));
    }

    #[test]
    fn open_dsn_accepts_prefixed_file_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("app.sqlite");
        let dsn = format!("sqlite://{}", path.display());

        let session = SqliteSession::open_dsn(&dsn).unwrap();
        Box::new(session).close().unwrap();
        assert!(path.exists());
    }
}
