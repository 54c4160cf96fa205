use std::io::ErrorKind;

use migrago_common::{Error, MigrationRecord, Result};
use migrago_config::ProjectMigration;
use migrago_db::{Session, TrackingStore};
use tracing::{error, info};

use crate::resolver::down_script;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertOutcome {
    /// The down script ran and the record was removed.
    RolledBack,
    /// The migration had no down script; only its record was removed.
    Deleted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevertReport {
    pub project: String,
    pub database: String,
    /// Reverted versions, newest first.
    pub reverted: Vec<(String, RevertOutcome)>,
    pub total: usize,
}

impl RevertReport {
    pub fn completed(&self) -> usize {
        self.reverted.len()
    }
}

/// Revert the `count` most recently applied migrations of `binding`.
///
/// Nothing is touched unless the store holds at least `count` candidates.
/// Each revert commits on its own, so a failure part-way keeps the reverts
/// done before it.
pub fn revert(
    store: &dyn TrackingStore,
    session: &mut dyn Session,
    binding: &ProjectMigration,
    count: usize,
    skip_irreversible: bool,
) -> Result<RevertReport> {
    if count == 0 {
        return Err(Error::Config(
            "number of migrations to revert must be at least 1".into(),
        ));
    }

    let records = store.list_applied(
        &binding.project,
        &binding.database,
        skip_irreversible,
        Some(count),
    )?;
    if records.len() < count {
        return Err(Error::InsufficientHistory {
            available: records.len(),
            requested: count,
        });
    }

    let mut report = RevertReport {
        project: binding.project.clone(),
        database: binding.database.clone(),
        reverted: Vec::with_capacity(count),
        total: records.len(),
    };

    for record in &records {
        match revert_one(store, session, binding, record) {
            Ok(outcome) => {
                match outcome {
                    RevertOutcome::RolledBack => info!(
                        project = %record.project,
                        database = %record.database,
                        version = %record.version,
                        "rollback completed"
                    ),
                    RevertOutcome::Deleted => info!(
                        project = %record.project,
                        database = %record.database,
                        version = %record.version,
                        "irreversible migration deleted"
                    ),
                }
                report.reverted.push((record.version.clone(), outcome));
            }
            Err(e) => {
                error!(
                    project = %record.project,
                    database = %record.database,
                    version = %record.version,
                    "migration failed: {e}"
                );
                return Err(Error::BatchAborted {
                    project: report.project,
                    database: report.database,
                    completed: report.reverted.len(),
                    total: report.total,
                    source: Box::new(e),
                });
            }
        }
    }

    Ok(report)
}

fn revert_one(
    store: &dyn TrackingStore,
    session: &mut dyn Session,
    binding: &ProjectMigration,
    record: &MigrationRecord,
) -> Result<RevertOutcome> {
    let down_sql = if record.revertible {
        Some(read_down_script(binding, &record.version)?)
    } else {
        None
    };

    let mut tx = session.begin()?;
    if let Some(sql) = &down_sql {
        tx = tx.exec(sql).map_err(|e| Error::ScriptExec {
            version: record.version.clone(),
            reason: e.to_string(),
        })?;
    }

    if let Err(e) = store.delete_applied(record) {
        tx.rollback()?;
        return Err(e);
    }
    tx.commit()?;

    Ok(match down_sql {
        Some(_) => RevertOutcome::RolledBack,
        None => RevertOutcome::Deleted,
    })
}

fn read_down_script(binding: &ProjectMigration, version: &str) -> Result<String> {
    let path = down_script(&binding.path, version);
    std::fs::read_to_string(&path).map_err(|source| {
        if source.kind() == ErrorKind::NotFound {
            Error::MissingDownScript {
                version: version.to_string(),
                path,
            }
        } else {
            Error::ScriptRead { path, source }
        }
    })
}
