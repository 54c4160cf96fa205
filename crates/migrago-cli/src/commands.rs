use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use migrago_config::{AppConfig, ConfigLoader};
use migrago_db::{TrackingStore, open_session, open_store, provision};
use migrago_engine::{CreateMode, RevertOutcome};
use tracing::{info, warn};

fn load(config_path: &Path) -> Result<AppConfig> {
    ConfigLoader::from_file(config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))
}

/// Open the tracking store, run `f`, and close the store on every path.
fn with_store<T>(
    config: &AppConfig,
    f: impl FnOnce(&dyn TrackingStore) -> Result<T>,
) -> Result<T> {
    let store = open_store(&config.migration_storage).context("failed to open tracking store")?;
    let outcome = f(store.as_ref());
    let closed = store.close();

    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e).context("failed to close tracking store"),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            warn!("failed to close tracking store: {close_err}");
            Err(e)
        }
    }
}

pub fn up(config_path: &Path, project: Option<String>, database: Option<String>) -> Result<()> {
    let config = load(config_path)?;
    let projects: Vec<String> = project.into_iter().collect();
    let databases: Vec<String> = database.into_iter().collect();
    let bindings = config
        .select(&projects, &databases)
        .context("failed to select migrations")?;

    let reports = with_store(&config, |store| {
        migrago_engine::apply_all(store, &bindings, open_session).context("migration failed")
    })?;

    let applied: usize = reports.iter().map(|r| r.completed()).sum();
    info!("applied {applied} migrations across {} databases", reports.len());
    Ok(())
}

pub fn down(
    config_path: &Path,
    project: &str,
    database: &str,
    count: usize,
    skip_irreversible: bool,
) -> Result<()> {
    let config = load(config_path)?;
    let binding = config.binding(project, database)?;

    let report = with_store(&config, |store| {
        let mut session = open_session(&binding.connection)
            .with_context(|| format!("failed to connect to database {database}"))?;
        let outcome = migrago_engine::revert(
            store,
            session.as_mut(),
            &binding,
            count,
            skip_irreversible,
        );
        if let Err(e) = session.close() {
            warn!("failed to close database {database}: {e}");
        }
        outcome.context("rollback failed")
    })?;

    for (version, outcome) in &report.reverted {
        match outcome {
            RevertOutcome::RolledBack => println!("migration: {version} rollback completed"),
            RevertOutcome::Deleted => println!("migration: {version} (no rollback) deleted"),
        }
    }
    Ok(())
}

pub fn list(
    config_path: &Path,
    project: &str,
    database: &str,
    limit: Option<usize>,
    skip_irreversible: bool,
) -> Result<()> {
    let config = load(config_path)?;
    config.binding(project, database)?;

    let records = with_store(&config, |store| {
        migrago_engine::history(store, project, database, limit, skip_irreversible)
            .context("failed to list migrations")
    })?;

    println!("Migrations list:");
    for record in &records {
        println!("{}", migrago_engine::describe(record));
    }
    Ok(())
}

pub fn init(config_path: &Path) -> Result<()> {
    let config = load(config_path)?;
    provision(&config.migration_storage).context("failed to initialize tracking store")?;
    info!("tracking store initialized");
    Ok(())
}

pub fn create(
    config_path: &Path,
    project: &str,
    database: &str,
    name: &str,
    mode: CreateMode,
) -> Result<()> {
    let config = load(config_path)?;
    let dir = config.migration_dir(project, database)?;

    let created = migrago_engine::create_scripts(&dir, name, mode, Utc::now())
        .with_context(|| format!("failed to create migration in {}", dir.display()))?;
    for path in created {
        println!("created {}", path.display());
    }
    Ok(())
}
