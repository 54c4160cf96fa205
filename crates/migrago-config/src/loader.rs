use std::path::{Path, PathBuf};

use migrago_common::{Error, Result};
use tracing::debug;

use crate::model::{AppConfig, ProjectMigration};

/// Reads `AppConfig` from YAML or TOML files.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load a config file. `.toml` files are parsed as TOML, everything else
    /// as YAML.
    pub fn from_file(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = match ext {
            "toml" => Self::from_toml(&contents)?,
            _ => Self::from_yaml(&contents)?,
        };

        debug!(
            "loaded config from {}: {} project(s), {} database(s)",
            path.display(),
            config.projects.len(),
            config.databases.len()
        );
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<AppConfig> {
        serde_yaml::from_str(contents).map_err(|e| Error::Config(format!("YAML parse error: {e}")))
    }

    pub fn from_toml(contents: &str) -> Result<AppConfig> {
        toml::from_str(contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
    }
}

impl AppConfig {
    /// Resolve the project/database bindings to migrate.
    ///
    /// Empty filters select everything. Every name in a filter must exist,
    /// every binding must point at a configured database, and every selected
    /// migration directory must exist. Bindings come back ordered by project
    /// name, then in the order they are listed in the project.
    pub fn select(&self, projects: &[String], databases: &[String]) -> Result<Vec<ProjectMigration>> {
        if let Some(missing) = projects.iter().find(|p| !self.projects.contains_key(*p)) {
            return Err(Error::Config(format!("project {missing} not found in projects")));
        }
        if let Some(missing) = databases.iter().find(|d| !self.databases.contains_key(*d)) {
            return Err(Error::Config(format!("database {missing} not found in databases")));
        }

        let mut selected = Vec::new();
        for (project_name, project) in &self.projects {
            if !projects.is_empty() && !projects.contains(project_name) {
                continue;
            }

            for entry in &project.migrations {
                for (db_name, dir) in entry {
                    if !databases.is_empty() && !databases.contains(db_name) {
                        continue;
                    }

                    let connection = self.databases.get(db_name).ok_or_else(|| {
                        Error::Config(format!(
                            "database {db_name} of project {project_name} not found in databases"
                        ))
                    })?;

                    selected.push(ProjectMigration {
                        project: project_name.clone(),
                        database: db_name.clone(),
                        path: resolve_dir(dir)?,
                        connection: connection.clone(),
                    });
                }
            }
        }

        Ok(selected)
    }

    /// The single binding of `database` inside `project`.
    pub fn binding(&self, project: &str, database: &str) -> Result<ProjectMigration> {
        let mut selected = self.select(&[project.to_string()], &[database.to_string()])?;
        match selected.len() {
            1 => Ok(selected.remove(0)),
            0 => Err(Error::Config(format!(
                "database {database} not found in project {project} databases"
            ))),
            _ => Err(Error::Config(format!(
                "database {database} is bound more than once in project {project}"
            ))),
        }
    }

    /// Configured migration directory of a binding, without checking that it
    /// exists yet.
    pub fn migration_dir(&self, project: &str, database: &str) -> Result<PathBuf> {
        let config = self
            .projects
            .get(project)
            .ok_or_else(|| Error::Config(format!("project {project} not found in projects")))?;

        config
            .migrations
            .iter()
            .find_map(|entry| entry.get(database).cloned())
            .ok_or_else(|| {
                Error::Config(format!(
                    "database {database} not found in project {project} databases"
                ))
            })
    }
}

fn resolve_dir(dir: &Path) -> Result<PathBuf> {
    match std::fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => dir.canonicalize().map_err(|e| {
            Error::Config(format!("failed to resolve directory {}: {e}", dir.display()))
        }),
        _ => Err(Error::Config(format!(
            "directory {} does not exist",
            dir.display()
        ))),
    }
}
