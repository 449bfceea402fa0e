//! Transactional access to the snapshot records.
//!
//! The snapshotter treats the metadata store as the single source of truth for
//! snapshot existence. Every operation runs inside exactly one transaction,
//! obtained from [`MetaStore::begin`], and ends it with exactly one of
//! [`Transaction::commit`] or [`Transaction::rollback`].

pub mod file;
pub mod filter;

use crate::info::{Info, Kind, Usage};
use crate::Result;
use async_trait::async_trait;

pub use file::FileMetaStore;

/// `Snapshot` is the storage view of a snapshot: what the directory layer needs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub kind: Kind,
    /// The store assigned identifier, also the name of the snapshot directory
    pub id: String,
    /// Ancestor identifiers, nearest first
    pub parent_ids: Vec<String>,
}

/// A callback invoked once per walked snapshot.
pub type WalkFn<'a> = dyn FnMut(&Info) -> Result<()> + Send + 'a;

/// The record operations available inside a transaction.
pub trait Transaction: Send {
    /// Create an active or view snapshot record on top of the committed `parent`.
    fn create_snapshot(
        &mut self,
        kind: Kind,
        key: &str,
        parent: Option<&str>,
        base: Info,
    ) -> Result<Snapshot>;

    fn get_snapshot(&self, key: &str) -> Result<Snapshot>;

    /// Returns the identifier, info and stored usage of a snapshot.
    fn get_info(&self, key: &str) -> Result<(String, Info, Usage)>;

    /// Rename the active snapshot `key` to the committed snapshot `name`.
    ///
    /// Fails with `AlreadyExists` if `name` is taken. Returns the snapshot identifier.
    fn commit_active(&mut self, key: &str, name: &str, usage: Usage, base: Info)
        -> Result<String>;

    /// Delete a snapshot record, returning its identifier and kind.
    fn remove(&mut self, key: &str) -> Result<(String, Kind)>;

    /// Replace the fields named by `fieldpaths` with the ones from `info`.
    fn update_info(&mut self, info: Info, fieldpaths: &[String]) -> Result<Info>;

    /// Invoke `f` for every snapshot matching one of `filters`.
    fn walk_info(&self, f: &mut WalkFn<'_>, filters: &[String]) -> Result<()>;

    /// Identifiers of every snapshot record.
    fn ids(&self) -> Result<Vec<String>>;

    fn commit(self) -> Result<()>;

    fn rollback(self) -> Result<()>;
}

/// The `MetaStore` trait defines how transactions over the snapshot records are obtained.
#[async_trait]
pub trait MetaStore: Send + Sync {
    type Transaction: Transaction;

    /// Begin a read-only or a read-write transaction.
    async fn begin(&self, writable: bool) -> Result<Self::Transaction>;

    /// Release the store.
    async fn close(&self) -> Result<()>;
}
