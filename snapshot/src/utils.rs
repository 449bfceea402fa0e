use crate::info::Usage;
use crate::{Error, Result};
use std::collections::HashSet;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use walkdir::WalkDir;

/// Compute the disk usage of a directory tree.
///
/// Hard links are accounted once. The size is the number of allocated 512-byte
/// blocks, so sparse files only count what they really use.
pub fn disk_usage(root: &Path) -> Result<Usage> {
    let mut seen = HashSet::new();
    let mut usage = Usage::default();

    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| walk_error(format!("failed to walk {}", root.display()), e))?;

        let metadata = entry
            .metadata()
            .map_err(|e| walk_error(format!("failed to stat {}", entry.path().display()), e))?;

        if seen.insert((metadata.dev(), metadata.ino())) {
            usage.inodes += 1;
            usage.size += (metadata.blocks() * 512) as i64;
        }
    }

    Ok(usage)
}

/// Turn a walkdir error into an I/O error, loops included.
fn walk_error(context: String, err: walkdir::Error) -> Error {
    let message = err.to_string();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::other(message));
    Error::io(context, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{create_dir, hard_link, write};

    #[test]
    fn test_disk_usage_counts_inodes_once() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        write(root.join("a"), vec![1u8; 8192]).unwrap();
        create_dir(root.join("sub")).unwrap();
        write(root.join("sub").join("b"), b"b").unwrap();
        hard_link(root.join("a"), root.join("sub").join("a-link")).unwrap();

        let usage = disk_usage(root).unwrap();

        // root, a, sub, sub/b
        assert_eq!(usage.inodes, 4);
        assert!(usage.size >= 0);
    }

    #[test]
    fn test_disk_usage_of_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = disk_usage(&dir.path().join("missing")).unwrap_err();

        match err {
            Error::Io { source, .. } => assert_eq!(source.kind(), std::io::ErrorKind::NotFound),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
