//! On-disk layout of the snapshotter root.
//!
//! ```text
//! <root>/metadata.json
//! <root>/snapshots/<id>/fs      layer content, the overlay upper dir when active
//! <root>/snapshots/<id>/work    overlay work dir, active snapshots only
//! <root>/snapshots/new-*        staging directories, not yet published
//! <root>/snapshots/rm-<id>      removed snapshots waiting to be deleted
//! ```
//!
//! A snapshot directory is always populated under a `new-*` name and only
//! becomes visible under its identifier through an atomic rename.

use crate::info::Kind;
use crate::{Error, Result, SNAPSHOTS_DIR};
use std::collections::HashSet;
use std::fs::{self, DirBuilder};
use std::io::ErrorKind;
use std::os::unix::fs::{lchown, DirBuilderExt, MetadataExt};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const STAGING_PREFIX: &str = "new-";
const REMOVED_PREFIX: &str = "rm-";
const FS_DIR: &str = "fs";
const WORK_DIR: &str = "work";

/// `Layout` knows where every snapshot lives under the root directory.
#[derive(Clone, Debug)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// The directory holding one directory per snapshot.
    ///
    /// It is also the lower directory of snapshots without parents.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join(SNAPSHOTS_DIR)
    }

    pub fn snapshot_dir(&self, id: &str) -> PathBuf {
        self.snapshots_dir().join(id)
    }

    pub fn upper_path(&self, id: &str) -> PathBuf {
        self.snapshot_dir(id).join(FS_DIR)
    }

    pub fn work_path(&self, id: &str) -> PathBuf {
        self.snapshot_dir(id).join(WORK_DIR)
    }

    /// The layer directory of a snapshot used as an overlay lower dir.
    pub fn lower_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id == "." || id == ".." || id.contains('/') {
            return Err(Error::InvalidArgument(format!(
                "invalid snapshot id {:?}",
                id
            )));
        }
        Ok(self.upper_path(id))
    }

    /// Create a staging directory populated for a snapshot of `kind`.
    pub fn prepare_directory(&self, kind: Kind) -> Result<PathBuf> {
        let snapshots_dir = self.snapshots_dir();

        let staging = TempDir::with_prefix_in(STAGING_PREFIX, &snapshots_dir)
            .map_err(|e| Error::io("failed to create temporary directory", e))?;

        DirBuilder::new()
            .mode(0o755)
            .create(staging.path().join(FS_DIR))
            .map_err(|e| Error::io("failed to create fs directory", e))?;

        if kind == Kind::Active {
            DirBuilder::new()
                .mode(0o711)
                .create(staging.path().join(WORK_DIR))
                .map_err(|e| Error::io("failed to create work directory", e))?;
        }

        Ok(staging.keep())
    }

    /// Give the staged layer directory the owner of the parent layer directory,
    /// so permissions carry down the overlay chain.
    pub fn inherit_ownership(&self, staged: &Path, parent_id: &str) -> Result<()> {
        let parent_fs = self.lower_path(parent_id)?;

        match fs::metadata(&parent_fs) {
            Ok(metadata) => lchown(
                staged.join(FS_DIR),
                Some(metadata.uid()),
                Some(metadata.gid()),
            )
            .map_err(|e| Error::io("failed to chown snapshot directory", e)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!(
                    "parent layer directory {} is missing, creating it",
                    parent_fs.display()
                );
                DirBuilder::new()
                    .recursive(true)
                    .mode(0o755)
                    .create(&parent_fs)
                    .map_err(|e| Error::io("failed to create parent layer directory", e))
            }
            Err(e) => Err(Error::io("failed to stat parent", e)),
        }
    }

    /// Atomically move a staged directory to its final location.
    pub fn publish(&self, staged: &Path, id: &str) -> Result<PathBuf> {
        let path = self.snapshot_dir(id);
        fs::rename(staged, &path).map_err(|e| Error::io("failed to rename snapshot directory", e))?;
        Ok(path)
    }

    /// Move the directory of a removed snapshot out of the way.
    ///
    /// Returns the new location, or `None` if the snapshot had no directory.
    pub fn mark_removed(&self, id: &str) -> Result<Option<PathBuf>> {
        let path = self.snapshot_dir(id);
        let removed = self.snapshots_dir().join(format!("{}{}", REMOVED_PREFIX, id));

        match fs::rename(&path, &removed) {
            Ok(()) => Ok(Some(removed)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::warn!("snapshot directory {} does not exist", path.display());
                Ok(None)
            }
            Err(e) => Err(Error::io(
                format!("failed to rename {} for removal", path.display()),
                e,
            )),
        }
    }

    /// Move a directory marked by [`Layout::mark_removed`] back in place.
    pub fn restore_removed(&self, removed: &Path, id: &str) -> Result<()> {
        fs::rename(removed, self.snapshot_dir(id))
            .map_err(|e| Error::io(format!("failed to restore {}", removed.display()), e))
    }

    pub fn remove_directory(&self, dir: &Path) -> Result<()> {
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(
                format!("failed to remove directory {}", dir.display()),
                e,
            )),
        }
    }

    /// Directories under the snapshots directory which belong to no known snapshot.
    pub fn orphans(&self, known_ids: &HashSet<String>) -> Result<Vec<PathBuf>> {
        let snapshots_dir = self.snapshots_dir();
        let entries = fs::read_dir(&snapshots_dir).map_err(|e| {
            Error::io(format!("failed to read {}", snapshots_dir.display()), e)
        })?;

        let mut orphans = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                Error::io(format!("failed to read {}", snapshots_dir.display()), e)
            })?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !known_ids.contains(&name) {
                orphans.push(entry.path());
            }
        }
        orphans.sort();

        Ok(orphans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> (TempDir, Layout) {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        fs::create_dir_all(layout.snapshots_dir()).unwrap();
        (tmp, layout)
    }

    #[test]
    fn test_paths() {
        let layout = Layout::new(Path::new("/var/lib/gp"));

        assert_eq!(layout.snapshots_dir(), PathBuf::from("/var/lib/gp/snapshots"));
        assert_eq!(layout.upper_path("3"), PathBuf::from("/var/lib/gp/snapshots/3/fs"));
        assert_eq!(layout.work_path("3"), PathBuf::from("/var/lib/gp/snapshots/3/work"));
        assert_eq!(layout.lower_path("3").unwrap(), layout.upper_path("3"));
        assert!(layout.lower_path("").is_err());
        assert!(layout.lower_path("../etc").is_err());
    }

    #[test]
    fn test_prepare_and_publish_active_directory() {
        let (_tmp, layout) = layout();

        let staged = layout.prepare_directory(Kind::Active).unwrap();
        let name = staged.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(STAGING_PREFIX));
        assert!(staged.join(FS_DIR).is_dir());
        assert!(staged.join(WORK_DIR).is_dir());

        let path = layout.publish(&staged, "1").unwrap();
        assert_eq!(path, layout.snapshot_dir("1"));
        assert!(!staged.exists());
        assert!(layout.upper_path("1").is_dir());
        assert!(layout.work_path("1").is_dir());
    }

    #[test]
    fn test_view_directory_has_no_work_dir() {
        let (_tmp, layout) = layout();

        let staged = layout.prepare_directory(Kind::View).unwrap();
        assert!(staged.join(FS_DIR).is_dir());
        assert!(!staged.join(WORK_DIR).exists());
    }

    #[test]
    fn test_inherit_ownership() {
        let (_tmp, layout) = layout();

        let parent = layout.prepare_directory(Kind::Active).unwrap();
        layout.publish(&parent, "1").unwrap();

        let staged = layout.prepare_directory(Kind::Active).unwrap();
        layout.inherit_ownership(&staged, "1").unwrap();

        let parent_meta = fs::metadata(layout.upper_path("1")).unwrap();
        let child_meta = fs::metadata(staged.join(FS_DIR)).unwrap();
        assert_eq!(parent_meta.uid(), child_meta.uid());
        assert_eq!(parent_meta.gid(), child_meta.gid());

        // a missing parent layer directory is recreated
        layout.inherit_ownership(&staged, "2").unwrap();
        assert!(layout.upper_path("2").is_dir());
    }

    #[test]
    fn test_mark_removed_and_orphans() {
        let (_tmp, layout) = layout();

        for id in ["1", "2"] {
            let staged = layout.prepare_directory(Kind::Active).unwrap();
            layout.publish(&staged, id).unwrap();
        }
        let leftover = layout.prepare_directory(Kind::View).unwrap();

        let removed = layout.mark_removed("2").unwrap().unwrap();
        assert!(!layout.snapshot_dir("2").exists());
        assert!(layout.mark_removed("3").unwrap().is_none());

        let known = HashSet::from(["1".to_string()]);
        let mut orphans = layout.orphans(&known).unwrap();
        orphans.sort();
        let mut expected = vec![leftover, removed.clone()];
        expected.sort();
        assert_eq!(orphans, expected);

        layout.restore_removed(&removed, "2").unwrap();
        assert!(layout.upper_path("2").is_dir());

        layout.remove_directory(&layout.snapshot_dir("2")).unwrap();
        assert!(!layout.snapshot_dir("2").exists());
        assert!(layout.remove_directory(&layout.snapshot_dir("2")).is_ok());
    }
}
