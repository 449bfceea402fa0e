//! Overlay mount composition.

use crate::info::Kind;
use crate::layout::Layout;
use crate::store::Snapshot;
use crate::Result;
use guest_pull::volume::prepare_guest_pull_mounts;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mount type handled by the guest pull overlay helper.
pub const GUEST_PULL_MOUNT_TYPE: &str = "fuse.guest-pull-overlayfs";

/// Mount source of every composed mount.
pub const OVERLAY_SOURCE: &str = "overlay";

/// `Mount` describes a mount the runtime has to perform.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Mount {
    #[serde(rename = "type")]
    pub r#type: String,
    pub source: String,
    pub options: Vec<String>,
}

/// Build the mounts of `snapshot`.
///
/// In deferred mode a view only gets the layer of `anchor` as lower directory,
/// since its content is pulled inside the guest, and the options are completed
/// with a guest pull volume describing them.
pub fn compose(
    layout: &Layout,
    snapshot: &Snapshot,
    anchor: Option<&str>,
    deferred: bool,
) -> Result<Vec<Mount>> {
    let mut options = Vec::new();

    if snapshot.kind == Kind::Active {
        options.push(format!(
            "workdir={}",
            layout.work_path(&snapshot.id).display()
        ));
        options.push(format!(
            "upperdir={}",
            layout.upper_path(&snapshot.id).display()
        ));
    }

    let lowers = if deferred && snapshot.kind == Kind::View {
        match anchor.map(|id| layout.lower_path(id)) {
            Some(Ok(path)) => vec![path.display().to_string()],
            Some(Err(e)) => {
                log::warn!("failed to resolve anchor of view {}: {}", snapshot.id, e);
                Vec::new()
            }
            None => {
                log::warn!("view {} has no anchor snapshot", snapshot.id);
                Vec::new()
            }
        }
    } else if snapshot.parent_ids.is_empty() {
        vec![layout.snapshots_dir().display().to_string()]
    } else {
        snapshot
            .parent_ids
            .iter()
            .map(|id| layout.lower_path(id).map(|p| p.display().to_string()))
            .collect::<Result<Vec<_>>>()?
    };

    options.push(format!("lowerdir={}", lowers.join(":")));

    if deferred {
        let volume = prepare_guest_pull_mounts("", &options, BTreeMap::new())?;
        options.extend(volume);
    }

    log::debug!("composed mount options for snapshot {}: {:?}", snapshot.id, options);

    Ok(vec![Mount {
        r#type: GUEST_PULL_MOUNT_TYPE.to_string(),
        source: OVERLAY_SOURCE.to_string(),
        options,
    }])
}
