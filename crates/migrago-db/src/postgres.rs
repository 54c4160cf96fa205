use ::postgres::{Client, NoTls};
use migrago_common::{Error, Result};
use tracing::info;

use crate::session::{Session, Transaction, TransactionDriver};

/// Target-database session backed by PostgreSQL.
pub struct PostgresSession {
    client: Client,
}

impl PostgresSession {
    /// Connect and, when a schema is given (in the config or as a `schema`
    /// DSN query parameter), point `search_path` at it.
    pub fn connect(dsn: &str, schema: Option<&str>) -> Result<Self> {
        let (dsn, dsn_schema) = split_schema_param(dsn);
        let mut client = Client::connect(&dsn, NoTls)
            .map_err(|e| Error::Database(format!("failed to connect to postgres: {e}")))?;

        if let Some(schema) = dsn_schema.as_deref().or(schema) {
            set_search_path(&mut client, schema)?;
        }

        info!("connected to postgres");
        Ok(Self { client })
    }
}

pub(crate) fn set_search_path(client: &mut Client, schema: &str) -> Result<()> {
    client
        .batch_execute(&format!("SET search_path TO {schema}"))
        .map_err(|e| Error::Database(format!("failed to set search_path to {schema}: {e}")))
}

/// Remove a `schema=<name>` query parameter, which the driver itself does
/// not understand.
pub(crate) fn split_schema_param(dsn: &str) -> (String, Option<String>) {
    let Some((base, query)) = dsn.split_once('?') else {
        return (dsn.to_string(), None);
    };

    let mut schema = None;
    let mut kept = Vec::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some(("schema", value)) if !value.is_empty() => schema = Some(value.to_string()),
            Some(("schema", _)) => {}
            _ => kept.push(pair),
        }
    }

    if kept.is_empty() {
        (base.to_string(), schema)
    } else {
        (format!("{base}?{}", kept.join("&")), schema)
    }
}

impl Session for PostgresSession {
    fn begin(&mut self) -> Result<Transaction<'_>> {
        let tx = self
            .client
            .transaction()
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;
        Ok(Transaction::new(PostgresTransaction(tx)))
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.client
            .close()
            .map_err(|e| Error::Database(format!("failed to close connection: {e}")))
    }
}

struct PostgresTransaction<'a>(::postgres::Transaction<'a>);

impl TransactionDriver for PostgresTransaction<'_> {
    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.0
            .batch_execute(sql)
            .map_err(|e| Error::Database(e.to_string()))
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let PostgresTransaction(tx) = *self;
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit: {e}")))
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        let PostgresTransaction(tx) = *self;
        tx.rollback()
            .map_err(|e| Error::Database(format!("failed to roll back: {e}")))
    }
}
