use crate::cli::{label_opts, parse_label, print_json};
use crate::{Handler, Result};
use async_trait::async_trait;
use clap::Args;
use snapshot::Snapshotter;

/// Arguments for our `ViewCommand`.
///
/// Example :
///
/// `guest-pull-snapshotter view rootfs-view sha256:layer`
#[derive(Debug, Args)]
pub struct ViewCommand {
    /// The key of the new view.
    key: String,
    /// The committed snapshot to look at.
    parent: String,
    /// Labels of the view, in the key=value form.
    #[clap(long = "label", short, parse(try_from_str = parse_label))]
    labels: Vec<(String, String)>,
}

#[async_trait]
impl Handler for ViewCommand {
    async fn handler(&self, snapshotter: &dyn Snapshotter) -> Result<()> {
        let mounts = snapshotter
            .view(&self.key, &self.parent, &label_opts(&self.labels))
            .await?;

        print_json(&mounts)
    }
}
