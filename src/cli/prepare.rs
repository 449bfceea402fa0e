use crate::cli::{label_opts, parse_label, print_json};
use crate::{Handler, Result};
use async_trait::async_trait;
use clap::Args;
use snapshot::Snapshotter;

/// Arguments for our `PrepareCommand`.
///
/// Example :
///
/// `guest-pull-snapshotter prepare extract-1 sha256:base --label containerd.io/snapshot.ref=sha256:layer`
///
/// With a target snapshot label the snapshot is committed straight away and
/// an empty mount list is printed.
#[derive(Debug, Args)]
pub struct PrepareCommand {
    /// The key of the new active snapshot.
    key: String,
    /// The committed snapshot to build on.
    parent: Option<String>,
    /// Labels of the snapshot, in the key=value form.
    #[clap(long = "label", short, parse(try_from_str = parse_label))]
    labels: Vec<(String, String)>,
}

#[async_trait]
impl Handler for PrepareCommand {
    async fn handler(&self, snapshotter: &dyn Snapshotter) -> Result<()> {
        let mounts = snapshotter
            .prepare(
                &self.key,
                self.parent.as_deref().unwrap_or_default(),
                &label_opts(&self.labels),
            )
            .await?;

        print_json(&mounts)
    }
}
