use std::io::ErrorKind;

use chrono::Utc;
use migrago_common::{Error, MigrationRecord, Result};
use migrago_config::{DatabaseConfig, ProjectMigration};
use migrago_db::{Session, TrackingStore};
use tracing::{error, info, warn};

use crate::resolver::{down_script, resolve, up_script};

/// Outcome of one `up` batch for a (project, database) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub project: String,
    pub database: String,
    /// Versions applied in this run, in order.
    pub applied: Vec<String>,
    /// Versions that were pending when the batch started.
    pub total: usize,
}

impl ApplyReport {
    fn new(binding: &ProjectMigration) -> Self {
        Self {
            project: binding.project.clone(),
            database: binding.database.clone(),
            ..Self::default()
        }
    }

    pub fn completed(&self) -> usize {
        self.applied.len()
    }

    fn abort(&self, source: Error) -> Error {
        Error::BatchAborted {
            project: self.project.clone(),
            database: self.database.clone(),
            completed: self.completed(),
            total: self.total,
            source: Box::new(source),
        }
    }
}

/// Apply every pending migration of `binding`, oldest first.
///
/// Each migration runs in its own transaction, and its tracking record is
/// written before that transaction commits. The batch stops at the first
/// failure; migrations committed before it stay applied.
pub fn apply_binding(
    store: &dyn TrackingStore,
    session: &mut dyn Session,
    binding: &ProjectMigration,
) -> Result<ApplyReport> {
    let mut report = ApplyReport::new(binding);
    let outcome = apply_pending(store, session, binding, &mut report);
    info!(
        project = %binding.project,
        database = %binding.database,
        "completed migrations: {} of {}",
        report.completed(),
        report.total
    );

    match outcome {
        Ok(()) => Ok(report),
        Err(e) => Err(report.abort(e)),
    }
}

fn apply_pending(
    store: &dyn TrackingStore,
    session: &mut dyn Session,
    binding: &ProjectMigration,
    report: &mut ApplyReport,
) -> Result<()> {
    store.create_namespace(&binding.project, &binding.database)?;

    let mut pending = Vec::new();
    for version in resolve(&binding.path)? {
        if !store.is_applied(&binding.project, &binding.database, &version)? {
            pending.push(version);
        }
    }
    report.total = pending.len();

    for version in pending {
        if let Err(e) = apply_one(store, session, binding, &version) {
            error!(
                project = %binding.project,
                database = %binding.database,
                version = %version,
                "migration failed: {e}"
            );
            return Err(e);
        }
        info!(
            project = %binding.project,
            database = %binding.database,
            version = %version,
            "migration applied"
        );
        report.applied.push(version);
    }
    Ok(())
}

fn apply_one(
    store: &dyn TrackingStore,
    session: &mut dyn Session,
    binding: &ProjectMigration,
    version: &str,
) -> Result<()> {
    let up_path = up_script(&binding.path, version);
    let sql = std::fs::read_to_string(&up_path).map_err(|source| Error::ScriptRead {
        path: up_path.clone(),
        source,
    })?;

    let tx = session
        .begin()?
        .exec(&sql)
        .map_err(|e| Error::ScriptExec {
            version: version.to_string(),
            reason: e.to_string(),
        })?;

    // Only a confirmed absence marks the migration irreversible.
    let revertible = !matches!(
        std::fs::metadata(down_script(&binding.path, version)),
        Err(e) if e.kind() == ErrorKind::NotFound
    );

    let record = MigrationRecord::new(
        &binding.project,
        &binding.database,
        version,
        Utc::now().timestamp(),
        revertible,
    );
    if let Err(e) = store.record_applied(&record) {
        tx.rollback()?;
        return Err(e);
    }

    tx.commit()
}

/// Apply every binding in order, opening one session per binding.
///
/// Stops at the first binding that fails; later bindings are not attempted.
/// The session is closed whether or not its batch succeeded.
pub fn apply_all<F>(
    store: &dyn TrackingStore,
    bindings: &[ProjectMigration],
    mut open: F,
) -> Result<Vec<ApplyReport>>
where
    F: FnMut(&DatabaseConfig) -> Result<Box<dyn Session>>,
{
    let mut reports = Vec::with_capacity(bindings.len());
    for binding in bindings {
        info!(project = %binding.project, database = %binding.database, "applying migrations");
        let mut session = match open(&binding.connection) {
            Ok(session) => session,
            Err(e) => return Err(ApplyReport::new(binding).abort(e)),
        };
        let outcome = apply_binding(store, session.as_mut(), binding);
        let closed = session.close();

        match (outcome, closed) {
            (Ok(report), Ok(())) => reports.push(report),
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), Ok(())) => return Err(e),
            (Err(e), Err(close_err)) => {
                warn!("failed to close session after error: {close_err}");
                return Err(e);
            }
        }
    }
    Ok(reports)
}
