//! Snapshot lifecycle and overlay mount composition for guest pull images.
//!
//! A snapshotter keeps container image layers as directories under a root
//! location and describes how to assemble them into a root file system with
//! overlayfs. Snapshots flagged for guest pull have their content fetched
//! lazily inside the VM, in which case the mount also carries a Kata virtual
//! volume descriptor for the runtime.

use std::fmt;
use std::path::PathBuf;

pub mod config;
pub mod info;
pub mod layout;
pub mod mounts;
pub mod snapshots;
pub mod store;
mod utils;

pub use config::SnapshotterConfig;
pub use info::{Info, Kind, Opt, Usage};
pub use mounts::Mount;
pub use snapshots::overlay::OverlaySnapshotter;
pub use snapshots::Snapshotter;
pub use utils::disk_usage;

/// Label naming the snapshot a prepared snapshot should be committed to.
pub const TARGET_SNAPSHOT_LABEL: &str = "containerd.io/snapshot.ref";

/// Label marking a snapshot whose content is pulled inside the guest.
pub const GUEST_PULL_LABEL: &str = "containerd.io/snapshot/guestpull";

/// Directory under the root holding one directory per snapshot id.
pub(crate) const SNAPSHOTS_DIR: &str = "snapshots";

/// File under the root where the metadata store persists its records.
pub(crate) const METADATA_FILE: &str = "metadata.json";

/// Returns true if the labels flag the snapshot for guest pull.
pub fn is_guest_pull_mode(labels: &std::collections::HashMap<String, String>) -> bool {
    labels.contains_key(GUEST_PULL_LABEL)
}

/// The error classes surfaced to the snapshotter callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::FailedPrecondition => "failed precondition",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Snapshot related errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A key, label or option is malformed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The referenced snapshot does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// The snapshot name is already taken
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// The operation does not apply to the snapshot in its current kind
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
    /// A directory operation failed
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    /// The metadata store could not be read or persisted
    #[error("metadata store: {0}")]
    Store(String),
    /// The metadata document could not be (de)serialized
    #[error("metadata encoding: {0}")]
    Metadata(#[from] serde_json::Error),
    /// The guest pull volume could not be built
    #[error(transparent)]
    GuestPull(#[from] guest_pull::Error),
    /// An error wrapped with the operation it happened in
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
    /// An error whose best-effort directory cleanup failed as well
    #[error("{source} (failed to remove {path:?}: {cleanup})")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: Box<Error>,
        cleanup: Box<Error>,
    },
}

impl Error {
    /// Build an `Io` error with some context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Classify the error, looking through context and cleanup wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::FailedPrecondition(_) => ErrorKind::FailedPrecondition,
            Error::Context { source, .. } | Error::Cleanup { source, .. } => source.kind(),
            Error::Io { .. } | Error::Store(_) | Error::Metadata(_) | Error::GuestPull(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }
}

/// A common result type for our crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Wrap errors with the operation they happened in.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Context {
            context: context.into(),
            source: Box::new(e),
        })
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| Error::Context {
            context: f().into(),
            source: Box::new(e),
        })
    }
}
