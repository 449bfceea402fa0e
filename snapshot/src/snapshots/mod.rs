pub mod overlay;

use crate::info::{Info, Opt, Usage};
use crate::mounts::Mount;
use crate::store::WalkFn;
use crate::Result;
use async_trait::async_trait;

/// The `Snapshotter` trait defines the operations a container engine uses to manage image layer snapshots.
///
/// An empty `parent` means the snapshot has no parent.
#[async_trait]
pub trait Snapshotter: Send + Sync {
    /// Returns the info of the snapshot `key`.
    async fn stat(&self, key: &str) -> Result<Info>;

    /// Update the labels of a snapshot, `fieldpaths` selects the labels to update.
    async fn update(&self, info: Info, fieldpaths: &[String]) -> Result<Info>;

    /// Returns the disk resources used by the snapshot `key`.
    async fn usage(&self, key: &str) -> Result<Usage>;

    /// Returns the mounts of the active or view snapshot `key`.
    async fn mounts(&self, key: &str) -> Result<Vec<Mount>>;

    /// Create an active snapshot on top of `parent` and return its mounts.
    ///
    /// When the options carry a target snapshot label, the snapshot is committed
    /// to that name straight away and no mounts are returned.
    async fn prepare(&self, key: &str, parent: &str, opts: &[Opt]) -> Result<Vec<Mount>>;

    /// Create a read-only view of `parent` and return its mounts.
    async fn view(&self, key: &str, parent: &str, opts: &[Opt]) -> Result<Vec<Mount>>;

    /// Turn the active snapshot `key` into the committed snapshot `name`.
    async fn commit(&self, name: &str, key: &str, opts: &[Opt]) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Invoke `f` on every snapshot matching one of `filters`.
    async fn walk(&self, f: &mut WalkFn<'_>, filters: &[String]) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// Remove directories which do not belong to any snapshot anymore.
    async fn cleanup(&self) -> Result<()>;
}
