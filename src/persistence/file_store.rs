//! Snapshot-backed store.
//!
//! Several worker processes may share one state directory, so the snapshot on
//! disk is the only source of truth:
//!
//! - Reads load the current snapshot. It is replaced by atomic rename, so a
//!   reader sees either the old or the new file.
//! - Mutations hold `catalog.lock` (an exclusive-create file), reload the
//!   snapshot, apply the change and write it back before releasing the lock.
//!   Uniqueness checks therefore see every other process's committed writes.
//!
//! A lock file older than [`STALE_LOCK_AGE`] was left by a crashed process and
//! is broken by the next writer.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use super::fsync::{create_exclusive, remove_if_exists};
use super::snapshot::{save_snapshot_atomic, try_load_snapshot};
use super::{CatalogState, FeatureCatalog, PublicationStore, Result, ScenarioDrafts};
use crate::types::{
    FeatureId, FeatureRecord, NewFeature, NewPublication, PublicationId, PublicationRequest,
    PublicationStatus, ScenarioDraft, ScenarioId,
};

/// File name of the snapshot inside the state directory.
pub const SNAPSHOT_FILE: &str = "catalog.json";

/// File name of the writer lock inside the state directory.
pub const LOCK_FILE: &str = "catalog.lock";

/// Age after which a lock file is treated as abandoned.
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(30);

/// Longest a writer waits for the lock.
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const LOCK_RETRY: Duration = Duration::from_millis(5);

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
    /// Serializes writers within this process before they touch the lock file.
    writer: Mutex<()>,
}

/// Holds `catalog.lock` until dropped.
struct LockGuard<'a> {
    path: &'a Path,
}

impl<'a> LockGuard<'a> {
    fn acquire(path: &'a Path) -> Result<Self> {
        let owner = std::process::id().to_string();
        let deadline = SystemTime::now() + LOCK_TIMEOUT;
        loop {
            if create_exclusive(path, owner.as_bytes())? {
                return Ok(LockGuard { path });
            }
            if is_stale(path)? {
                warn!(path = %path.display(), "Breaking abandoned catalog lock");
                remove_if_exists(path)?;
                continue;
            }
            if SystemTime::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("timed out waiting for {}", path.display()),
                )
                .into());
            }
            std::thread::sleep(LOCK_RETRY);
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = remove_if_exists(self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release catalog lock");
        }
    }
}

fn is_stale(lock_path: &Path) -> Result<bool> {
    let modified = match std::fs::metadata(lock_path).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        // Released between our create attempt and now.
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    Ok(modified
        .elapsed()
        .is_ok_and(|age| age > STALE_LOCK_AGE))
}

impl FileStore {
    /// Opens the store in `state_dir`, creating the directory if needed.
    ///
    /// An existing snapshot is validated here so that a corrupt file fails
    /// startup rather than the first task.
    pub fn open(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir)?;
        let store = FileStore {
            path: state_dir.join(SNAPSHOT_FILE),
            lock_path: state_dir.join(LOCK_FILE),
            writer: Mutex::new(()),
        };
        match try_load_snapshot(&store.path)? {
            Some(snapshot) => info!(
                path = %store.path.display(),
                features = snapshot.features.len(),
                publications = snapshot.publications.len(),
                "Opened catalog snapshot"
            ),
            None => info!(path = %store.path.display(), "No catalog snapshot, starting empty"),
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<CatalogState> {
        Ok(try_load_snapshot(&self.path)?
            .map(CatalogState::from_snapshot)
            .unwrap_or_default())
    }

    fn read<T>(&self, query: impl FnOnce(&CatalogState) -> T) -> Result<T> {
        Ok(query(&self.load()?))
    }

    fn writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies `mutation` to the latest snapshot and persists the result, all
    /// under the writer lock. A rejected mutation writes nothing.
    fn mutate<T>(&self, mutation: impl FnOnce(&mut CatalogState) -> Result<T>) -> Result<T> {
        let _writer = self.writer();
        let _lock = LockGuard::acquire(&self.lock_path)?;
        let mut state = self.load()?;
        let value = mutation(&mut state)?;
        save_snapshot_atomic(&self.path, &state.to_snapshot())?;
        debug!(path = %self.path.display(), "Saved catalog snapshot");
        Ok(value)
    }
}

impl FeatureCatalog for FileStore {
    fn find_feature_by_path(&self, file_path: &str) -> Result<Option<FeatureRecord>> {
        self.read(|state| state.find_feature_by_path(file_path).cloned())
    }

    fn create_feature(&self, feature: NewFeature) -> Result<FeatureRecord> {
        self.mutate(|state| state.create_feature(feature))
    }

    fn update_feature(&self, record: &FeatureRecord) -> Result<()> {
        self.mutate(|state| state.update_feature(record))
    }

    fn get_feature(&self, id: FeatureId) -> Result<Option<FeatureRecord>> {
        self.read(|state| state.get_feature(id).cloned())
    }

    fn list_feature_paths(&self) -> Result<Vec<String>> {
        self.read(CatalogState::list_feature_paths)
    }
}

impl PublicationStore for FileStore {
    fn create_publication(&self, new: NewPublication) -> Result<PublicationRequest> {
        self.mutate(|state| state.create_publication(new))
    }

    fn update_publication(&self, request: &PublicationRequest) -> Result<()> {
        self.mutate(|state| state.update_publication(request))
    }

    fn get_publication(&self, id: PublicationId) -> Result<Option<PublicationRequest>> {
        self.read(|state| state.get_publication(id).cloned())
    }

    fn find_active_publication(
        &self,
        scenario_id: &ScenarioId,
        target_branch: &str,
    ) -> Result<Option<PublicationRequest>> {
        self.read(|state| {
            state
                .find_active_publication(scenario_id, target_branch)
                .cloned()
        })
    }

    fn list_publications_by_status(
        &self,
        status: &PublicationStatus,
    ) -> Result<Vec<PublicationRequest>> {
        self.read(|state| state.list_publications_by_status(status))
    }
}

impl ScenarioDrafts for FileStore {
    fn get_draft(&self, scenario_id: &ScenarioId) -> Result<Option<ScenarioDraft>> {
        self.read(|state| state.get_draft(scenario_id).cloned())
    }

    fn save_draft(&self, draft: ScenarioDraft) -> Result<()> {
        self.mutate(|state| {
            state.save_draft(draft);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::StoreError;
    use crate::test_utils::sample_draft;
    use crate::types::{BackendKind, ContentHash, FeatureType, PublicationStatus, ReviewRef};
    use tempfile::tempdir;

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();

        let publication_id = {
            let store = FileStore::open(dir.path()).unwrap();
            store
                .create_feature(NewFeature {
                    file_path: "smoke/login.feature".into(),
                    content_hash: ContentHash::of("Feature: Login"),
                    feature_type: FeatureType::new("smoke"),
                    name: "Login".into(),
                    tags: vec!["@smoke".into()],
                    scenarios: Vec::new(),
                })
                .unwrap();
            store.save_draft(sample_draft("S1", 7)).unwrap();

            let mut request = store
                .create_publication(NewPublication {
                    scenario_id: ScenarioId::new("S1"),
                    target_branch: "feature/x".into(),
                    backend_kind: BackendKind::Stash,
                    task_id: None,
                })
                .unwrap();
            request.transition(PublicationStatus::TokenAcquired).unwrap();
            request.transition(PublicationStatus::Submitted).unwrap();
            request.review_ref = Some(ReviewRef { id: 12, url: None });
            store.update_publication(&request).unwrap();
            request.id
        };

        let store = FileStore::open(dir.path()).unwrap();
        let feature = store
            .find_feature_by_path("smoke/login.feature")
            .unwrap()
            .unwrap();
        assert_eq!(feature.name, "Login");
        assert!(store.get_draft(&ScenarioId::new("S1")).unwrap().is_some());

        let request = store.get_publication(publication_id).unwrap().unwrap();
        assert_eq!(request.status, PublicationStatus::Submitted);
        assert_eq!(request.review_ref, Some(ReviewRef { id: 12, url: None }));

        // The single-active constraint holds across restarts.
        let err = store
            .create_publication(NewPublication {
                scenario_id: ScenarioId::new("S1"),
                target_branch: "feature/x".into(),
                backend_kind: BackendKind::Stash,
                task_id: None,
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn rejected_mutation_is_not_persisted() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let record = NewFeature {
            file_path: "a.feature".into(),
            content_hash: ContentHash::of("a"),
            feature_type: FeatureType::new("smoke"),
            name: "A".into(),
            tags: Vec::new(),
            scenarios: Vec::new(),
        }
        .into_record(FeatureId(5));

        assert!(store.update_feature(&record).is_err());
        assert!(!store.path().exists());
    }

    fn new_feature(path: &str) -> NewFeature {
        NewFeature {
            file_path: path.into(),
            content_hash: ContentHash::of(path),
            feature_type: FeatureType::new("smoke"),
            name: path.into(),
            tags: Vec::new(),
            scenarios: Vec::new(),
        }
    }

    #[test]
    fn handles_on_one_directory_see_each_others_writes() {
        let dir = tempdir().unwrap();
        let a = FileStore::open(dir.path()).unwrap();
        let b = FileStore::open(dir.path()).unwrap();

        a.create_feature(new_feature("a.feature")).unwrap();
        assert!(matches!(
            b.create_feature(new_feature("a.feature")),
            Err(StoreError::Conflict(_))
        ));
        let created = b.create_feature(new_feature("b.feature")).unwrap();
        assert_eq!(created.id, FeatureId(2));

        b.save_draft(sample_draft("S9", 3)).unwrap();
        assert!(a.get_draft(&ScenarioId::new("S9")).unwrap().is_some());
        assert!(a.find_feature_by_path("b.feature").unwrap().is_some());

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(
            reopened.list_feature_paths().unwrap(),
            vec!["a.feature".to_string(), "b.feature".to_string()]
        );
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn single_active_publication_holds_across_handles() {
        let dir = tempdir().unwrap();
        let a = FileStore::open(dir.path()).unwrap();
        let b = FileStore::open(dir.path()).unwrap();
        let new = || NewPublication {
            scenario_id: ScenarioId::new("S1"),
            target_branch: "main".into(),
            backend_kind: BackendKind::Gitlab,
            task_id: None,
        };

        a.create_publication(new()).unwrap();
        assert!(matches!(
            b.create_publication(new()),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn concurrent_creates_of_one_path_yield_one_record() {
        let dir = tempdir().unwrap();
        let results: Vec<bool> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        let store = FileStore::open(dir.path()).unwrap();
                        store.create_feature(new_feature("race.feature")).is_ok()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|created| **created).count(), 1);
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.list_feature_paths().unwrap(), vec!["race.feature"]);
    }

    #[test]
    fn abandoned_lock_is_broken() {
        let dir = tempdir().unwrap();
        let lock = dir.path().join(LOCK_FILE);
        std::fs::write(&lock, b"12345").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&lock)
            .unwrap()
            .set_modified(SystemTime::now() - STALE_LOCK_AGE * 2)
            .unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        store.create_feature(new_feature("a.feature")).unwrap();
        assert!(!lock.exists());
    }

    #[test]
    fn corrupt_snapshot_fails_open() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(SNAPSHOT_FILE), b"not json").unwrap();
        assert!(matches!(
            FileStore::open(dir.path()),
            Err(StoreError::Snapshot(_))
        ));
    }
}
