use crate::config::Config;
use snapshot::{OverlaySnapshotter, SnapshotterConfig};

/// Create a new snapshotter instance rooted at the configured directory
pub fn get_snapshotter_instance(config: &Config) -> snapshot::Result<OverlaySnapshotter> {
    OverlaySnapshotter::new(SnapshotterConfig::new(&config.root_dir))
}
