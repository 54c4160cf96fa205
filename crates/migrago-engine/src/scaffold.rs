use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use migrago_common::{DOWN_SUFFIX, Error, Result, UP_SUFFIX};
use tracing::info;

/// Which script files `create` writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CreateMode {
    Up,
    Down,
    #[default]
    Both,
}

impl CreateMode {
    fn suffixes(self) -> &'static [&'static str] {
        match self {
            CreateMode::Up => &[UP_SUFFIX],
            CreateMode::Down => &[DOWN_SUFFIX],
            CreateMode::Both => &[UP_SUFFIX, DOWN_SUFFIX],
        }
    }
}

impl fmt::Display for CreateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CreateMode::Up => "up",
            CreateMode::Down => "down",
            CreateMode::Both => "both",
        })
    }
}

/// Write empty `<YYYYMMDD_HHMMSS>_<name>_up.sql` / `_down.sql` files into
/// `dir`, creating it if needed. Both files of a pair share one timestamp.
///
/// Existing files are never overwritten: if any target exists nothing is
/// created.
pub fn create_scripts(
    dir: &Path,
    name: &str,
    mode: CreateMode,
    now: DateTime<Utc>,
) -> Result<Vec<PathBuf>> {
    validate_name(name)?;

    let version = format!("{}_{name}", now.format("%Y%m%d_%H%M%S"));
    let paths: Vec<PathBuf> = mode
        .suffixes()
        .iter()
        .map(|suffix| dir.join(format!("{version}{suffix}")))
        .collect();

    if let Some(existing) = paths.iter().find(|p| p.exists()) {
        return Err(Error::Config(format!(
            "migration file {} already exists",
            existing.display()
        )));
    }

    std::fs::create_dir_all(dir)?;
    for path in &paths {
        OpenOptions::new().write(true).create_new(true).open(path)?;
        info!("migration {} created", path.display());
    }
    Ok(paths)
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Config("migration name must not be empty".into()));
    }
    if name.contains(['/', '\\']) {
        return Err(Error::Config(format!(
            "migration name {name} must not contain path separators"
        )));
    }
    Ok(())
}
