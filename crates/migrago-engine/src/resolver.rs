use std::path::{Path, PathBuf};

use migrago_common::{DOWN_SUFFIX, Error, Result, UP_SUFFIX};
use tracing::warn;

/// Versions found in `dir`, ascending.
///
/// A version is the name of a regular `<version>_up.sql` file with the suffix
/// removed. Everything else in the directory is ignored.
pub fn resolve(dir: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::ScriptRead {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut versions = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            warn!("skipping non-UTF-8 file name {:?}", file_name);
            continue;
        };

        if let Some(version) = name.strip_suffix(UP_SUFFIX).filter(|v| !v.is_empty()) {
            versions.push(version.to_string());
        }
    }

    versions.sort();
    Ok(versions)
}

pub fn up_script(dir: &Path, version: &str) -> PathBuf {
    dir.join(format!("{version}{UP_SUFFIX}"))
}

pub fn down_script(dir: &Path, version: &str) -> PathBuf {
    dir.join(format!("{version}{DOWN_SUFFIX}"))
}
