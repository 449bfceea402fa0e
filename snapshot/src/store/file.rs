use crate::info::{validate_label, Info, Kind, Usage};
use crate::store::filter::Filters;
use crate::store::{MetaStore, Snapshot, Transaction, WalkFn};
use crate::{Error, Result, GUEST_PULL_LABEL};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{rename, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// `SnapshotRecord` is how a snapshot is persisted.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
struct SnapshotRecord {
    id: String,
    info: Info,
    /// Usage captured at commit time, zero for active and view snapshots
    #[serde(default)]
    usage: Usage,
}

/// `State` holds every snapshot record, indexed by key or committed name.
#[derive(Clone, Default, Deserialize, Debug, Serialize, PartialEq)]
pub(crate) struct State {
    snapshots: BTreeMap<String, SnapshotRecord>,
    /// The last allocated snapshot identifier
    sequence: u64,
}

impl State {
    /// Save the state into the file.
    ///
    /// The document is written next to the target then renamed over it, so a
    /// crash leaves either the previous or the new state on disk.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");

        let file = File::create(&tmp)
            .map_err(|e| Error::io(format!("failed to create {}", tmp.display()), e))?;
        serde_json::to_writer_pretty(&file, &self)?;
        file.sync_all()
            .map_err(|e| Error::io(format!("failed to sync {}", tmp.display()), e))?;

        rename(&tmp, path).map_err(|e| Error::io(format!("failed to replace {}", path.display()), e))
    }

    fn next_id(&mut self) -> String {
        self.sequence += 1;
        self.sequence.to_string()
    }

    fn record(&self, key: &str) -> Result<&SnapshotRecord> {
        self.snapshots
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("snapshot {}", key)))
    }

    /// Identifiers of the ancestors of `info`, nearest first.
    fn parent_ids(&self, info: &Info) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut parent = info.parent.as_deref();

        while let Some(name) = parent {
            let record = self.snapshots.get(name).ok_or_else(|| {
                Error::Store(format!(
                    "parent {} of snapshot {} is missing",
                    name, info.name
                ))
            })?;
            if ids.len() > self.snapshots.len() {
                return Err(Error::Store(format!(
                    "parent chain of snapshot {} is cyclic",
                    info.name
                )));
            }
            ids.push(record.id.clone());
            parent = record.info.parent.as_deref();
        }

        Ok(ids)
    }
}

impl TryFrom<&Path> for State {
    type Error = crate::Error;

    fn try_from(state_file: &Path) -> Result<Self> {
        if !state_file.exists() {
            return Ok(State::default());
        }

        let content = std::fs::read_to_string(state_file)
            .map_err(|e| Error::io(format!("failed to read {}", state_file.display()), e))?;
        if content.trim().is_empty() {
            return Ok(State::default());
        }

        Ok(serde_json::from_str(&content)?)
    }
}

/// `FileMetaStore` keeps the snapshot records in a single JSON document.
///
/// Readers share the state, a writer gets exclusive access and works on a
/// private copy which replaces the state, on disk then in memory, when the
/// transaction commits.
pub struct FileMetaStore {
    path: PathBuf,
    state: Arc<RwLock<State>>,
}

impl FileMetaStore {
    pub fn new(path: &Path) -> Result<Self> {
        let state = State::try_from(path)?;

        log::debug!(
            "loaded {} snapshot records from {}",
            state.snapshots.len(),
            path.display()
        );

        Ok(Self {
            path: path.to_path_buf(),
            state: Arc::new(RwLock::new(state)),
        })
    }
}

#[async_trait]
impl MetaStore for FileMetaStore {
    type Transaction = FileTransaction;

    async fn begin(&self, writable: bool) -> Result<FileTransaction> {
        let (guard, pending) = if writable {
            let guard = self.state.clone().write_owned().await;
            let pending = guard.clone();
            (Guard::Write(guard), Some(pending))
        } else {
            (Guard::Read(self.state.clone().read_owned().await), None)
        };

        Ok(FileTransaction {
            path: self.path.clone(),
            guard,
            pending,
        })
    }

    async fn close(&self) -> Result<()> {
        // Wait for in-flight transactions.
        let _state = self.state.write().await;
        log::debug!("closed metadata store {}", self.path.display());
        Ok(())
    }
}

enum Guard {
    Read(OwnedRwLockReadGuard<State>),
    Write(OwnedRwLockWriteGuard<State>),
}

/// A transaction over a [`FileMetaStore`].
pub struct FileTransaction {
    path: PathBuf,
    guard: Guard,
    /// The working copy of a writable transaction
    pending: Option<State>,
}

impl FileTransaction {
    fn state(&self) -> &State {
        match (&self.pending, &self.guard) {
            (Some(state), _) => state,
            (None, Guard::Read(guard)) => &**guard,
            (None, Guard::Write(guard)) => &**guard,
        }
    }

    fn state_mut(&mut self) -> Result<&mut State> {
        self.pending.as_mut().ok_or_else(|| {
            Error::FailedPrecondition("cannot modify records in a read-only transaction".to_string())
        })
    }
}

impl Transaction for FileTransaction {
    fn create_snapshot(
        &mut self,
        kind: Kind,
        key: &str,
        parent: Option<&str>,
        base: Info,
    ) -> Result<Snapshot> {
        if kind == Kind::Committed {
            return Err(Error::InvalidArgument(format!(
                "snapshot type {} invalid; only snapshots of type active or view can be created",
                kind
            )));
        }
        if key.is_empty() {
            return Err(Error::InvalidArgument("snapshot key cannot be empty".to_string()));
        }

        let state = self.state_mut()?;

        if state.snapshots.contains_key(key) {
            return Err(Error::AlreadyExists(format!("snapshot {}", key)));
        }

        let parent_ids = match parent {
            Some(parent) => {
                let record = state.snapshots.get(parent).ok_or_else(|| {
                    Error::NotFound(format!("parent snapshot {} does not exist", parent))
                })?;
                if record.info.kind != Kind::Committed {
                    return Err(Error::FailedPrecondition(format!(
                        "parent {} is not committed snapshot",
                        parent
                    )));
                }
                let mut ids = vec![record.id.clone()];
                ids.extend(state.parent_ids(&record.info)?);
                ids
            }
            None => Vec::new(),
        };

        let id = state.next_id();
        let now = Utc::now();
        let info = Info {
            kind,
            name: key.to_string(),
            parent: parent.map(str::to_string),
            labels: base.labels,
            created: now,
            updated: now,
        };

        state.snapshots.insert(
            key.to_string(),
            SnapshotRecord {
                id: id.clone(),
                info,
                usage: Usage::default(),
            },
        );

        Ok(Snapshot {
            kind,
            id,
            parent_ids,
        })
    }

    fn get_snapshot(&self, key: &str) -> Result<Snapshot> {
        let state = self.state();
        let record = state.record(key)?;

        if record.info.kind == Kind::Committed {
            return Err(Error::FailedPrecondition(format!(
                "requested snapshot {} not active or view",
                key
            )));
        }

        Ok(Snapshot {
            kind: record.info.kind,
            id: record.id.clone(),
            parent_ids: state.parent_ids(&record.info)?,
        })
    }

    fn get_info(&self, key: &str) -> Result<(String, Info, Usage)> {
        let record = self.state().record(key)?;
        Ok((record.id.clone(), record.info.clone(), record.usage))
    }

    fn commit_active(
        &mut self,
        key: &str,
        name: &str,
        usage: Usage,
        base: Info,
    ) -> Result<String> {
        if name.is_empty() {
            return Err(Error::InvalidArgument(
                "committed snapshot name cannot be empty".to_string(),
            ));
        }

        let state = self.state_mut()?;

        if state.snapshots.contains_key(name) {
            return Err(Error::AlreadyExists(format!("snapshot {}", name)));
        }

        let record = state.record(key)?;
        if record.info.kind != Kind::Active {
            return Err(Error::FailedPrecondition(format!(
                "snapshot {} is not active",
                key
            )));
        }

        let mut record = state
            .snapshots
            .remove(key)
            .ok_or_else(|| Error::NotFound(format!("snapshot {}", key)))?;

        // Labels are replaced, not inherited, except for the guest pull marker.
        let mut labels = base.labels;
        if let Some(marker) = record.info.labels.remove(GUEST_PULL_LABEL) {
            labels.entry(GUEST_PULL_LABEL.to_string()).or_insert(marker);
        }

        let now = Utc::now();
        record.info = Info {
            kind: Kind::Committed,
            name: name.to_string(),
            parent: record.info.parent,
            labels,
            created: now,
            updated: now,
        };
        record.usage = usage;

        let id = record.id.clone();
        state.snapshots.insert(name.to_string(), record);

        Ok(id)
    }

    fn remove(&mut self, key: &str) -> Result<(String, Kind)> {
        let state = self.state_mut()?;
        state.record(key)?;

        if state
            .snapshots
            .values()
            .any(|r| r.info.parent.as_deref() == Some(key))
        {
            return Err(Error::FailedPrecondition(format!(
                "cannot remove snapshot {} with child",
                key
            )));
        }

        let record = state
            .snapshots
            .remove(key)
            .ok_or_else(|| Error::NotFound(format!("snapshot {}", key)))?;

        Ok((record.id, record.info.kind))
    }

    fn update_info(&mut self, info: Info, fieldpaths: &[String]) -> Result<Info> {
        let state = self.state_mut()?;
        let record = state
            .snapshots
            .get_mut(&info.name)
            .ok_or_else(|| Error::NotFound(format!("snapshot {}", info.name)))?;

        let mut updated = record.info.clone();

        if fieldpaths.is_empty() {
            updated.labels = info.labels.clone();
        }
        for path in fieldpaths {
            if path == "labels" {
                updated.labels = info.labels.clone();
            } else if let Some(key) = path.strip_prefix("labels.") {
                match info.labels.get(key) {
                    Some(value) => {
                        updated.labels.insert(key.to_string(), value.clone());
                    }
                    None => {
                        updated.labels.remove(key);
                    }
                }
            } else {
                return Err(Error::InvalidArgument(format!(
                    "cannot update {} field on snapshot {}",
                    path, info.name
                )));
            }
        }

        for (key, value) in &updated.labels {
            validate_label(key, value)?;
        }

        if let Some(marker) = record.info.labels.get(GUEST_PULL_LABEL) {
            updated
                .labels
                .entry(GUEST_PULL_LABEL.to_string())
                .or_insert_with(|| marker.clone());
        }

        updated.updated = Utc::now();
        record.info = updated.clone();

        Ok(updated)
    }

    fn walk_info(&self, f: &mut WalkFn<'_>, filters: &[String]) -> Result<()> {
        let filters = Filters::parse(filters)?;

        for record in self.state().snapshots.values() {
            if filters.matches(&record.info) {
                f(&record.info)?;
            }
        }

        Ok(())
    }

    fn ids(&self) -> Result<Vec<String>> {
        Ok(self
            .state()
            .snapshots
            .values()
            .map(|r| r.id.clone())
            .collect())
    }

    fn commit(self) -> Result<()> {
        if let (Some(pending), Guard::Write(mut guard)) = (self.pending, self.guard) {
            pending.save(&self.path)?;
            *guard = pending;
        }
        Ok(())
    }

    fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn store() -> (tempfile::TempDir, FileMetaStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileMetaStore::new(&tmp.path().join("metadata.json")).unwrap();
        (tmp, store)
    }

    fn labels(list: &[(&str, &str)]) -> Info {
        Info {
            labels: list
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            ..Default::default()
        }
    }

    async fn committed(store: &FileMetaStore, name: &str, parent: Option<&str>) -> String {
        let key = format!("{}-active", name);
        let mut tx = store.begin(true).await.unwrap();
        tx.create_snapshot(Kind::Active, &key, parent, Info::default())
            .unwrap();
        let id = tx
            .commit_active(&key, name, Usage::default(), Info::default())
            .unwrap();
        tx.commit().unwrap();
        id
    }

    #[tokio::test]
    async fn test_create_and_get_snapshot() {
        let (_tmp, store) = store();
        let base = committed(&store, "base", None).await;
        let layer = committed(&store, "layer", Some("base")).await;

        let mut tx = store.begin(true).await.unwrap();
        let snapshot = tx
            .create_snapshot(Kind::Active, "container", Some("layer"), Info::default())
            .unwrap();
        tx.commit().unwrap();

        assert_eq!(snapshot.kind, Kind::Active);
        assert_eq!(snapshot.parent_ids, vec![layer, base]);

        let tx = store.begin(false).await.unwrap();
        assert_eq!(tx.get_snapshot("container").unwrap(), snapshot);
        let (id, info, _) = tx.get_info("container").unwrap();
        assert_eq!(id, snapshot.id);
        assert_eq!(info.parent.as_deref(), Some("layer"));
        tx.rollback().unwrap();
    }

    #[tokio::test]
    async fn test_create_snapshot_errors() {
        let (_tmp, store) = store();
        let mut tx = store.begin(true).await.unwrap();

        tx.create_snapshot(Kind::Active, "a", None, Info::default())
            .unwrap();

        let err = tx
            .create_snapshot(Kind::Active, "a", None, Info::default())
            .unwrap_err();
        assert!(err.is_already_exists());

        let err = tx
            .create_snapshot(Kind::View, "b", Some("missing"), Info::default())
            .unwrap_err();
        assert!(err.is_not_found());

        let err = tx
            .create_snapshot(Kind::View, "b", Some("a"), Info::default())
            .unwrap_err();
        assert!(matches!(err, Error::FailedPrecondition(_)));

        let err = tx
            .create_snapshot(Kind::Committed, "c", None, Info::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = tx
            .create_snapshot(Kind::Active, "", None, Info::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_read_only_transaction_cannot_write() {
        let (_tmp, store) = store();
        let mut tx = store.begin(false).await.unwrap();

        let err = tx
            .create_snapshot(Kind::Active, "a", None, Info::default())
            .unwrap_err();
        assert!(matches!(err, Error::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let (_tmp, store) = store();

        let mut tx = store.begin(true).await.unwrap();
        tx.create_snapshot(Kind::Active, "a", None, Info::default())
            .unwrap();
        tx.rollback().unwrap();

        let tx = store.begin(false).await.unwrap();
        assert!(tx.get_info("a").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_commit_active() {
        let (_tmp, store) = store();
        let mut tx = store.begin(true).await.unwrap();
        let snapshot = tx
            .create_snapshot(
                Kind::Active,
                "a",
                None,
                labels(&[(GUEST_PULL_LABEL, "true"), ("dropped", "1")]),
            )
            .unwrap();

        let usage = Usage { inodes: 3, size: 4096 };
        let id = tx
            .commit_active("a", "layer", usage, labels(&[("kept", "1")]))
            .unwrap();
        assert_eq!(id, snapshot.id);

        let (_, info, stored) = tx.get_info("layer").unwrap();
        assert_eq!(info.kind, Kind::Committed);
        assert_eq!(stored, usage);
        assert!(info.labels.contains_key("kept"));
        assert!(info.labels.contains_key(GUEST_PULL_LABEL));
        assert!(!info.labels.contains_key("dropped"));
        assert!(tx.get_info("a").unwrap_err().is_not_found());

        assert!(tx
            .get_snapshot("layer")
            .is_err_and(|e| matches!(e, Error::FailedPrecondition(_))));
    }

    #[tokio::test]
    async fn test_commit_active_errors() {
        let (_tmp, store) = store();
        committed(&store, "layer", None).await;

        let mut tx = store.begin(true).await.unwrap();
        tx.create_snapshot(Kind::Active, "a", None, Info::default())
            .unwrap();
        tx.create_snapshot(Kind::View, "v", Some("layer"), Info::default())
            .unwrap();

        let err = tx
            .commit_active("a", "layer", Usage::default(), Info::default())
            .unwrap_err();
        assert!(err.is_already_exists());

        let err = tx
            .commit_active("missing", "other", Usage::default(), Info::default())
            .unwrap_err();
        assert!(err.is_not_found());

        let err = tx
            .commit_active("v", "other", Usage::default(), Info::default())
            .unwrap_err();
        assert!(matches!(err, Error::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn test_remove() {
        let (_tmp, store) = store();
        let base = committed(&store, "base", None).await;
        committed(&store, "layer", Some("base")).await;

        let mut tx = store.begin(true).await.unwrap();
        let err = tx.remove("base").unwrap_err();
        assert!(matches!(err, Error::FailedPrecondition(_)));

        tx.remove("layer").unwrap();
        assert_eq!(tx.remove("base").unwrap(), (base, Kind::Committed));
        assert!(tx.remove("base").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_info() {
        let (_tmp, store) = store();
        let mut tx = store.begin(true).await.unwrap();
        tx.create_snapshot(
            Kind::Active,
            "a",
            None,
            labels(&[("a", "1"), ("b", "2"), (GUEST_PULL_LABEL, "true")]),
        )
        .unwrap();

        let mut info = labels(&[("a", "10"), ("c", "3")]);
        info.name = "a".to_string();

        let updated = tx
            .update_info(info.clone(), &["labels.a".to_string(), "labels.b".to_string()])
            .unwrap();
        assert_eq!(updated.labels["a"], "10");
        assert!(!updated.labels.contains_key("b"));
        assert!(!updated.labels.contains_key("c"));
        assert!(updated.labels.contains_key(GUEST_PULL_LABEL));

        let updated = tx.update_info(info.clone(), &[]).unwrap();
        assert_eq!(updated.labels.len(), 3);
        assert!(updated.labels.contains_key(GUEST_PULL_LABEL));

        let err = tx
            .update_info(info.clone(), &["kind".to_string()])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        info.name = "missing".to_string();
        assert!(tx.update_info(info, &[]).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_walk_info() {
        let (_tmp, store) = store();
        committed(&store, "base", None).await;
        committed(&store, "layer", Some("base")).await;

        let tx = store.begin(false).await.unwrap();

        let mut names = Vec::new();
        tx.walk_info(&mut |info| {
            names.push(info.name.clone());
            Ok(())
        }, &[])
        .unwrap();
        assert_eq!(names, vec!["base", "layer"]);

        let mut count = 0;
        tx.walk_info(&mut |_| {
            count += 1;
            Ok(())
        }, &["name==nothing".to_string()])
        .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_state_is_persisted() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("metadata.json");

        let store = FileMetaStore::new(&path).unwrap();
        let id = committed(&store, "base", None).await;
        store.close().await.unwrap();

        let store = FileMetaStore::new(&path).unwrap();
        let tx = store.begin(false).await.unwrap();
        let (stored, info, _) = tx.get_info("base").unwrap();
        assert_eq!(stored, id);
        assert_eq!(info.kind, Kind::Committed);

        // identifiers are never reused
        drop(tx);
        assert_ne!(committed(&store, "other", None).await, id);
    }

    #[test]
    fn test_corrupted_state_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("metadata.json");

        std::fs::write(&path, "").unwrap();
        assert!(FileMetaStore::new(&path).is_ok());

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(FileMetaStore::new(&path), Err(Error::Metadata(_))));
    }
}
