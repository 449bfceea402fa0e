use crate::{Error, Result, SNAPSHOTS_DIR};
use std::fs::{create_dir_all, remove_file, set_permissions, write, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// File written then removed to prove the root directory is writable.
const WRITE_TEST_FILE: &str = ".write_test";

/// `SnapshotterConfig` is everything the snapshotter needs to be built.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SnapshotterConfig {
    /// The directory holding the snapshots and the metadata store.
    pub root_dir: PathBuf,
}

impl SnapshotterConfig {
    pub fn new(root_dir: &Path) -> Self {
        Self::default().with_root_dir(root_dir)
    }

    /// Define the root directory for the snapshotter.
    pub fn with_root_dir(mut self, root_dir: &Path) -> Self {
        self.root_dir = root_dir.to_path_buf();
        self
    }

    /// Make sure the root directory can be used.
    ///
    /// The root and snapshots directories are created if missing, and the root
    /// must be writable.
    pub fn validate(&self) -> Result<()> {
        if self.root_dir.as_os_str().is_empty() {
            return Err(Error::InvalidArgument(
                "root directory must be specified".to_string(),
            ));
        }

        for dir in [self.root_dir.clone(), self.root_dir.join(SNAPSHOTS_DIR)] {
            if !dir.exists() {
                log::debug!("creating snapshotter directory {}", dir.display());
                create_dir_all(&dir).map_err(|e| {
                    Error::io(format!("failed to create directory {}", dir.display()), e)
                })?;
                set_permissions(&dir, Permissions::from_mode(0o700)).map_err(|e| {
                    Error::io(format!("failed to restrict directory {}", dir.display()), e)
                })?;
            }
        }

        let test_file = self.root_dir.join(WRITE_TEST_FILE);
        write(&test_file, b"").map_err(|e| {
            Error::io(
                format!("root directory {} is not writable", self.root_dir.display()),
                e,
            )
        })?;
        remove_file(&test_file)
            .map_err(|e| Error::io(format!("failed to remove {}", test_file.display()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_creates_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");

        let config = SnapshotterConfig::new(&root);
        assert!(config.validate().is_ok());

        assert!(root.join(SNAPSHOTS_DIR).is_dir());
        assert!(!root.join(WRITE_TEST_FILE).exists());

        let mode = std::fs::metadata(&root).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_validate_rejects_empty_root() {
        let result = SnapshotterConfig::default().validate();
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
