use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use migrago_common::{Error, MigrationRecord, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{TrackingStore, closed};

type Namespace = BTreeMap<String, MigrationRecord>;

/// On-disk layout: a bucket per project, a bucket per database inside it,
/// records keyed by version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Buckets {
    #[serde(default)]
    projects: BTreeMap<String, BTreeMap<String, Namespace>>,
}

impl Buckets {
    fn namespace(&self, project: &str, database: &str) -> Result<&Namespace> {
        self.projects
            .get(project)
            .and_then(|dbs| dbs.get(database))
            .ok_or_else(|| namespace_not_found(project, database))
    }

    fn namespace_mut(&mut self, project: &str, database: &str) -> Result<&mut Namespace> {
        self.projects
            .get_mut(project)
            .and_then(|dbs| dbs.get_mut(database))
            .ok_or_else(|| namespace_not_found(project, database))
    }
}

/// Embedded tracking store kept in a single JSON file.
///
/// The whole file is loaded on open. Every mutation writes a complete new
/// copy next to the file and renames it into place, so a crash leaves either
/// the old or the new state.
pub struct BucketStore {
    path: PathBuf,
    state: Mutex<Option<Buckets>>,
}

impl BucketStore {
    pub fn open(path: &Path) -> Result<Self> {
        info!("opening bucket store at {}", path.display());
        let parent_missing = path
            .parent()
            .is_some_and(|dir| !dir.as_os_str().is_empty() && !dir.is_dir());
        if parent_missing {
            return Err(Error::StorageUnavailable(format!(
                "directory of {} does not exist (run `migrago init`)",
                path.display()
            )));
        }

        let buckets = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                Error::StorageUnavailable(format!("failed to read {}: {e}", path.display()))
            })?;
            if contents.trim().is_empty() {
                Buckets::default()
            } else {
                serde_json::from_str(&contents).map_err(|e| {
                    Error::StorageUnavailable(format!(
                        "{} is not a valid bucket store: {e}",
                        path.display()
                    ))
                })?
            }
        } else {
            Buckets::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(Some(buckets)),
        })
    }

    /// Create the directory that will hold the store file.
    pub fn provision(path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::StorageUnavailable(format!("failed to create {}: {e}", dir.display()))
            })?;
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Buckets>>> {
        self.state
            .lock()
            .map_err(|_| Error::StorageUnavailable("bucket store lock poisoned".into()))
    }

    fn read<T>(&self, f: impl FnOnce(&Buckets) -> Result<T>) -> Result<T> {
        let guard = self.lock()?;
        let buckets = guard.as_ref().ok_or_else(closed)?;
        f(buckets)
    }

    /// Apply `f` to a copy of the state, persist the copy, then swap it in.
    /// A failed write leaves the in-memory state untouched.
    fn update(&self, f: impl FnOnce(&mut Buckets) -> Result<()>) -> Result<()> {
        let mut guard = self.lock()?;
        let current = guard.as_ref().ok_or_else(closed)?;

        let mut next = current.clone();
        f(&mut next)?;
        self.persist(&next)?;
        *guard = Some(next);
        Ok(())
    }

    /// Write the full state to a temp file, flush it to disk, then rename
    /// it over the store file.
    fn persist(&self, buckets: &Buckets) -> Result<()> {
        let content = serde_json::to_vec_pretty(buckets)?;
        let mut temp_name = self.path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let write_err = |e: std::io::Error| {
            Error::StorageUnavailable(format!("failed to write {}: {e}", self.path.display()))
        };

        {
            let mut file = File::create(&temp_path).map_err(write_err)?;
            file.write_all(&content).map_err(write_err)?;
            file.sync_all().map_err(write_err)?;
        }
        std::fs::rename(&temp_path, &self.path).map_err(write_err)?;
        sync_parent_dir(&self.path).map_err(write_err)
    }
}

/// Make the rename itself durable.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent().filter(|d| !d.as_os_str().is_empty()) {
        Some(dir) => File::open(dir)?.sync_all(),
        None => File::open(".")?.sync_all(),
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

impl TrackingStore for BucketStore {
    fn create_namespace(&self, project: &str, database: &str) -> Result<()> {
        let exists = self.read(|b| Ok(b.namespace(project, database).is_ok()))?;
        if exists {
            return Ok(());
        }

        self.update(|b| {
            b.projects
                .entry(project.to_string())
                .or_default()
                .entry(database.to_string())
                .or_default();
            Ok(())
        })?;
        debug!("created bucket {project}/{database}");
        Ok(())
    }

    fn is_applied(&self, project: &str, database: &str, version: &str) -> Result<bool> {
        self.read(|b| Ok(b.namespace(project, database)?.contains_key(version)))
    }

    fn record_applied(&self, record: &MigrationRecord) -> Result<()> {
        self.update(|b| {
            let namespace = b.namespace_mut(&record.project, &record.database)?;
            if namespace.contains_key(&record.version) {
                return Err(Error::DuplicateVersion {
                    project: record.project.clone(),
                    database: record.database.clone(),
                    version: record.version.clone(),
                });
            }
            namespace.insert(record.version.clone(), record.clone());
            Ok(())
        })
    }

    fn list_applied(
        &self,
        project: &str,
        database: &str,
        skip_irreversible: bool,
        limit: Option<usize>,
    ) -> Result<Vec<MigrationRecord>> {
        self.read(|b| {
            let records: Vec<MigrationRecord> = b
                .namespace(project, database)?
                .values()
                .rev()
                .filter(|r| r.revertible || !skip_irreversible)
                .take(limit.unwrap_or(usize::MAX))
                .cloned()
                .collect();
            Ok(records)
        })
    }

    fn delete_applied(&self, record: &MigrationRecord) -> Result<()> {
        self.update(|b| {
            let namespace = b.namespace_mut(&record.project, &record.database)?;
            if namespace.remove(&record.version).is_none() {
                return Err(Error::RecordNotFound {
                    project: record.project.clone(),
                    database: record.database.clone(),
                    version: record.version.clone(),
                });
            }
            Ok(())
        })
    }

    fn close(&self) -> Result<()> {
        self.lock()?.take();
        Ok(())
    }
}

fn namespace_not_found(project: &str, database: &str) -> Error {
    Error::NamespaceNotFound {
        project: project.to_string(),
        database: database.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, BucketStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = BucketStore::open(&tmp.path().join("migrations.db")).unwrap();
        (tmp, store)
    }

    fn record(version: &str, revertible: bool) -> MigrationRecord {
        MigrationRecord::new("shop", "main", version, 1_700_000_000, revertible)
    }

    #[test]
    fn missing_namespace_is_not_the_same_as_not_applied() {
        let (_tmp, store) = open_temp();
        let err = store.is_applied("shop", "main", "v1").unwrap_err();
        assert!(matches!(err, Error::NamespaceNotFound { .. }));

        store.create_namespace("shop", "main").unwrap();
        assert!(!store.is_applied("shop", "main", "v1").unwrap());
    }

    #[test]
    fn create_namespace_is_idempotent() {
        let (_tmp, store) = open_temp();
        store.create_namespace("shop", "main").unwrap();
        store.record_applied(&record("v1", true)).unwrap();
        store.create_namespace("shop", "main").unwrap();

        assert!(store.is_applied("shop", "main", "v1").unwrap());
    }

    #[test]
    fn duplicate_version_is_rejected() {
        let (_tmp, store) = open_temp();
        store.create_namespace("shop", "main").unwrap();
        store.record_applied(&record("v1", true)).unwrap();

        let err = store.record_applied(&record("v1", false)).unwrap_err();
        assert!(matches!(err, Error::DuplicateVersion { version, .. } if version == "v1"));
        let listed = store.list_applied("shop", "main", false, None).unwrap();
        assert!(listed[0].revertible);
    }

    #[test]
    fn list_is_newest_first_filtered_and_limited() {
        let (_tmp, store) = open_temp();
        store.create_namespace("shop", "main").unwrap();
        for (version, revertible) in [
            ("20230101_a", true),
            ("20230103_c", true),
            ("20230102_b", false),
        ] {
            store.record_applied(&record(version, revertible)).unwrap();
        }

        let versions = |records: Vec<MigrationRecord>| -> Vec<String> {
            records.into_iter().map(|r| r.version).collect()
        };

        let all = store.list_applied("shop", "main", false, Some(2)).unwrap();
        assert_eq!(versions(all), vec!["20230103_c", "20230102_b"]);

        let reversible = store.list_applied("shop", "main", true, None).unwrap();
        assert_eq!(versions(reversible), vec!["20230103_c", "20230101_a"]);

        let short = store.list_applied("shop", "main", false, Some(10)).unwrap();
        assert_eq!(short.len(), 3);
    }

    #[test]
    fn delete_missing_record_fails() {
        let (_tmp, store) = open_temp();
        store.create_namespace("shop", "main").unwrap();
        let err = store.delete_applied(&record("v1", true)).unwrap_err();
        assert!(matches!(err, Error::RecordNotFound { .. }));
    }

    #[test]
    fn state_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("migrations.db");
        {
            let store = BucketStore::open(&path).unwrap();
            store.create_namespace("shop", "main").unwrap();
            store.record_applied(&record("v1", true)).unwrap();
            store.record_applied(&record("v2", false)).unwrap();
            store.delete_applied(&record("v1", true)).unwrap();
            store.close().unwrap();
        }

        let store = BucketStore::open(&path).unwrap();
        assert!(!store.is_applied("shop", "main", "v1").unwrap());
        let listed = store.list_applied("shop", "main", false, None).unwrap();
        assert_eq!(listed, vec![record("v2", false)]);
    }

    #[test]
    fn closed_store_is_unavailable_and_close_is_idempotent() {
        let (_tmp, store) = open_temp();
        store.close().unwrap();
        store.close().unwrap();

        let err = store.create_namespace("shop", "main").unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[test]
    fn open_requires_existing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data").join("migrations.db");
        assert!(matches!(
            BucketStore::open(&path),
            Err(Error::StorageUnavailable(_))
        ));

        BucketStore::provision(&path).unwrap();
        assert!(BucketStore::open(&path).is_ok());
    }

    #[test]
    fn write_leaves_no_temp_file_behind() {
        let (tmp, store) = open_temp();
        store.create_namespace("shop", "main").unwrap();
        store.record_applied(&record("v1", true)).unwrap();

        assert!(!tmp.path().join("migrations.db.tmp").exists());
        let on_disk: Buckets =
            serde_json::from_slice(&std::fs::read(tmp.path().join("migrations.db")).unwrap())
                .unwrap();
        assert!(on_disk.namespace("shop", "main").unwrap().contains_key("v1"));
    }

    #[test]
    fn failed_write_keeps_previous_state() {
        let (tmp, store) = open_temp();
        store.create_namespace("shop", "main").unwrap();
        store.record_applied(&record("v1", true)).unwrap();
        let before = std::fs::read(tmp.path().join("migrations.db")).unwrap();

        // A directory in the temp file's place makes the write fail.
        std::fs::create_dir(tmp.path().join("migrations.db.tmp")).unwrap();
        let err = store.record_applied(&record("v2", true)).unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(msg) if msg.contains("failed to write")));

        assert!(!store.is_applied("shop", "main", "v2").unwrap());
        assert_eq!(std::fs::read(tmp.path().join("migrations.db")).unwrap(), before);
    }

    #[test]
    fn corrupt_file_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("migrations.db");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            BucketStore::open(&path),
            Err(Error::StorageUnavailable(msg)) if msg.contains("not a valid bucket store")
        ));
    }
}
