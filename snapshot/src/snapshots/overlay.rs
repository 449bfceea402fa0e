use crate::config::SnapshotterConfig;
use crate::info::{apply_opts, Info, Kind, Opt, Usage};
use crate::layout::Layout;
use crate::mounts::{compose, Mount};
use crate::snapshots::Snapshotter;
use crate::store::{FileMetaStore, MetaStore, Transaction, WalkFn};
use crate::utils::disk_usage;
use crate::{
    is_guest_pull_mode, Error, Result, ResultExt, GUEST_PULL_LABEL, METADATA_FILE,
    TARGET_SNAPSHOT_LABEL,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;

/// `OverlaySnapshotter` keeps snapshots as overlayfs layer directories.
///
/// Each operation runs in a single metadata store transaction, and directory
/// changes are arranged so that a failed operation leaves no trace on disk.
pub struct OverlaySnapshotter<S: MetaStore = FileMetaStore> {
    config: SnapshotterConfig,
    layout: Layout,
    store: S,
}

impl OverlaySnapshotter<FileMetaStore> {
    /// Create a snapshotter keeping its records in the root directory.
    pub fn new(config: SnapshotterConfig) -> Result<Self> {
        config.validate()?;

        let store = FileMetaStore::new(&config.root_dir.join(METADATA_FILE))
            .context("failed to open metadata store")?;

        Ok(Self::with_store(config, store))
    }
}

impl<S: MetaStore> OverlaySnapshotter<S> {
    pub fn with_store(config: SnapshotterConfig, store: S) -> Self {
        let layout = Layout::new(&config.root_dir);
        Self {
            config,
            layout,
            store,
        }
    }

    /// Run `f` in a transaction.
    ///
    /// A writable transaction is committed if `f` succeeds, anything else is rolled back.
    async fn with_transaction<T, F>(&self, writable: bool, f: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut S::Transaction) -> Result<T> + Send,
    {
        let mut tx = self
            .store
            .begin(writable)
            .await
            .context("failed to start transaction")?;

        match f(&mut tx) {
            Ok(value) if writable => {
                tx.commit().context("failed to commit transaction")?;
                Ok(value)
            }
            Ok(value) => {
                rollback(tx);
                Ok(value)
            }
            Err(e) => {
                rollback(tx);
                Err(e)
            }
        }
    }

    async fn create_snapshot(
        &self,
        kind: Kind,
        key: &str,
        parent: &str,
        opts: &[Opt],
    ) -> Result<Vec<Mount>> {
        let mut base = apply_opts(opts)?;
        let parent = base
            .parent
            .take()
            .or_else(|| Some(parent.to_string()).filter(|p| !p.is_empty()));

        let target = match kind {
            Kind::Active => base.labels.get(TARGET_SNAPSHOT_LABEL).cloned(),
            _ => None,
        };
        if target.is_some() {
            base.labels
                .insert(GUEST_PULL_LABEL.to_string(), "true".to_string());
        }

        let mut tx = self
            .store
            .begin(true)
            .await
            .context("failed to start transaction")?;

        let mut created = None;
        let result = self.create_in(
            &mut tx,
            kind,
            key,
            parent.as_deref(),
            base,
            target.as_deref(),
            &mut created,
        );

        let result = match result {
            Ok(mounts) => tx
                .commit()
                .context("failed to commit transaction")
                .map(|()| mounts),
            Err(e) => {
                rollback(tx);
                Err(e)
            }
        };

        result.map_err(|e| match created {
            Some(path) => self.discard(path, e),
            None => e,
        })
    }

    /// Stage, record and publish a new snapshot.
    ///
    /// `created` is kept pointing at the directory to remove if the operation fails.
    #[allow(clippy::too_many_arguments)]
    fn create_in(
        &self,
        tx: &mut S::Transaction,
        kind: Kind,
        key: &str,
        parent: Option<&str>,
        base: Info,
        target: Option<&str>,
        created: &mut Option<PathBuf>,
    ) -> Result<Vec<Mount>> {
        let anchor = match kind {
            Kind::View => {
                let parent = parent.ok_or_else(|| {
                    Error::NotFound(format!("view {} requires a parent snapshot", key))
                })?;
                let (id, _, _) = tx
                    .get_info(parent)
                    .with_context(|| format!("failed to get parent snapshot {}", parent))?;
                Some(id)
            }
            _ => None,
        };

        let staged = self
            .layout
            .prepare_directory(kind)
            .context("failed to create prepare snapshot dir")?;
        *created = Some(staged.clone());

        // views are always pulled inside the guest
        let deferred = kind == Kind::View || is_guest_pull_mode(&base.labels);
        let commit_base = Info {
            labels: base.labels.clone(),
            ..Default::default()
        };

        let snapshot = tx
            .create_snapshot(kind, key, parent, base)
            .context("failed to create snapshot")?;

        if let Some(parent_id) = snapshot.parent_ids.first() {
            self.layout
                .inherit_ownership(&staged, parent_id)
                .context("failed to inherit parent ownership")?;
        }

        *created = Some(self.layout.publish(&staged, &snapshot.id)?);

        if let Some(target) = target {
            let usage = disk_usage(&self.layout.upper_path(&snapshot.id))?;
            tx.commit_active(key, target, usage, commit_base)
                .with_context(|| format!("failed to commit snapshot {} to {}", key, target))?;

            log::debug!("snapshot {} committed to {} on prepare", key, target);
            return Ok(Vec::new());
        }

        let anchor = anchor.or_else(|| snapshot.parent_ids.first().cloned());
        compose(&self.layout, &snapshot, anchor.as_deref(), deferred)
    }

    /// Remove the directory of a failed operation, chaining a cleanup failure to `err`.
    fn discard(&self, path: PathBuf, err: Error) -> Error {
        match self.layout.remove_directory(&path) {
            Ok(()) => err,
            Err(cleanup) => {
                log::warn!("failed to cleanup {}: {}", path.display(), cleanup);
                Error::Cleanup {
                    path,
                    source: Box::new(err),
                    cleanup: Box::new(cleanup),
                }
            }
        }
    }

    fn remove_in(&self, tx: &mut S::Transaction, key: &str) -> Result<(String, Option<PathBuf>)> {
        let (id, kind) = tx.remove(key)?;
        log::debug!("removing {} snapshot {} with id {}", kind, key, id);

        let removed = self.layout.mark_removed(&id)?;
        Ok((id, removed))
    }
}

fn rollback<T: Transaction>(tx: T) {
    if let Err(e) = tx.rollback() {
        log::warn!("failed to rollback transaction: {}", e);
    }
}

#[async_trait]
impl<S: MetaStore> Snapshotter for OverlaySnapshotter<S> {
    async fn stat(&self, key: &str) -> Result<Info> {
        log::debug!("stat snapshot {}", key);

        self.with_transaction(false, |tx| tx.get_info(key).map(|(_, info, _)| info))
            .await
            .with_context(|| format!("failed to stat snapshot {}", key))
    }

    async fn update(&self, info: Info, fieldpaths: &[String]) -> Result<Info> {
        log::debug!("update snapshot {} fields {:?}", info.name, fieldpaths);

        let name = info.name.clone();
        self.with_transaction(true, |tx| tx.update_info(info, fieldpaths))
            .await
            .with_context(|| format!("failed to update snapshot {}", name))
    }

    async fn usage(&self, key: &str) -> Result<Usage> {
        log::debug!("usage of snapshot {}", key);

        self.with_transaction(false, |tx| {
            let (id, info, usage) = tx.get_info(key)?;
            match info.kind {
                Kind::Active => disk_usage(&self.layout.upper_path(&id)),
                _ => Ok(usage),
            }
        })
        .await
        .with_context(|| format!("failed to get usage of snapshot {}", key))
    }

    async fn mounts(&self, key: &str) -> Result<Vec<Mount>> {
        log::debug!("mounts of snapshot {}", key);

        self.with_transaction(false, |tx| {
            let snapshot = tx.get_snapshot(key)?;
            let (_, info, _) = tx.get_info(key)?;

            let deferred = is_guest_pull_mode(&info.labels);
            let anchor = match (deferred, snapshot.kind) {
                (false, _) => None,
                (true, Kind::View) => Some(snapshot.id.clone()),
                (true, _) => snapshot.parent_ids.first().cloned(),
            };

            compose(&self.layout, &snapshot, anchor.as_deref(), deferred)
        })
        .await
        .with_context(|| format!("failed to get mounts of snapshot {}", key))
    }

    async fn prepare(&self, key: &str, parent: &str, opts: &[Opt]) -> Result<Vec<Mount>> {
        log::debug!("prepare snapshot {} with parent {:?}", key, parent);

        self.create_snapshot(Kind::Active, key, parent, opts)
            .await
            .with_context(|| format!("failed to prepare snapshot {}", key))
    }

    async fn view(&self, key: &str, parent: &str, opts: &[Opt]) -> Result<Vec<Mount>> {
        log::debug!("view snapshot {} with parent {:?}", key, parent);

        self.create_snapshot(Kind::View, key, parent, opts)
            .await
            .with_context(|| format!("failed to create view {}", key))
    }

    async fn commit(&self, name: &str, key: &str, opts: &[Opt]) -> Result<()> {
        log::debug!("commit snapshot {} to {}", key, name);

        let base = apply_opts(opts)?;
        self.with_transaction(true, |tx| {
            let (id, info, _) = tx.get_info(key)?;
            if info.kind != Kind::Active {
                return Err(Error::FailedPrecondition(format!(
                    "snapshot {} is {}, only active snapshots can be committed",
                    key, info.kind
                )));
            }

            let usage = disk_usage(&self.layout.upper_path(&id))
                .context("failed to compute usage")?;
            tx.commit_active(key, name, usage, base)?;
            Ok(())
        })
        .await
        .with_context(|| format!("failed to commit snapshot {}", key))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        log::debug!("remove snapshot {}", key);

        let mut tx = self
            .store
            .begin(true)
            .await
            .context("failed to start transaction")?;

        let (id, removed) = match self.remove_in(&mut tx, key) {
            Ok(removed) => removed,
            Err(e) => {
                rollback(tx);
                return Err(e).with_context(|| format!("failed to remove snapshot {}", key));
            }
        };

        if let Err(e) = tx.commit() {
            if let Some(removed) = &removed {
                if let Err(restore) = self.layout.restore_removed(removed, &id) {
                    log::warn!("failed to restore directory of snapshot {}: {}", id, restore);
                }
            }
            return Err(e).context("failed to commit transaction");
        }

        // The record is gone, a leftover directory is reclaimed by cleanup.
        if let Some(removed) = removed {
            if let Err(e) = self.layout.remove_directory(&removed) {
                log::error!("failed to remove {}: {}", removed.display(), e);
            }
        }

        Ok(())
    }

    async fn walk(&self, f: &mut WalkFn<'_>, filters: &[String]) -> Result<()> {
        log::debug!("walk snapshots with filters {:?}", filters);

        self.with_transaction(false, |tx| tx.walk_info(f, filters))
            .await
            .context("failed to walk snapshots")
    }

    async fn close(&self) -> Result<()> {
        log::debug!("closing snapshotter at {}", self.config.root_dir.display());
        self.store.close().await
    }

    async fn cleanup(&self) -> Result<()> {
        log::debug!("cleanup snapshots in {}", self.layout.snapshots_dir().display());

        // Staging directories are only created by writers, which the read
        // transaction holds off.
        self.with_transaction(false, |tx| {
            let known = tx.ids()?.into_iter().collect::<HashSet<_>>();

            for dir in self.layout.orphans(&known)? {
                log::debug!("removing orphan directory {}", dir.display());
                if let Err(e) = self.layout.remove_directory(&dir) {
                    log::warn!("failed to remove {}: {}", dir.display(), e);
                }
            }
            Ok(())
        })
        .await
        .context("failed to cleanup snapshots")
    }
}
