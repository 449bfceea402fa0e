use crate::cli::{parse_label, print_json};
use crate::{Handler, Result};
use async_trait::async_trait;
use clap::Args;
use snapshot::Snapshotter;

/// Arguments for our `UpdateCommand`.
///
/// Without any field every label is replaced by the given ones. With
/// `--field labels.<key>` only that label is set, or deleted when it is not
/// given.
///
/// Example :
///
/// `guest-pull-snapshotter update sha256:layer --label owner=ci --field labels.owner`
#[derive(Debug, Args)]
pub struct UpdateCommand {
    /// The key or name of the snapshot.
    key: String,
    /// Labels to write, in the key=value form.
    #[clap(long = "label", short, parse(try_from_str = parse_label))]
    labels: Vec<(String, String)>,
    /// Field paths to update, `labels` or `labels.<key>`.
    #[clap(long = "field", short)]
    fields: Vec<String>,
}

#[async_trait]
impl Handler for UpdateCommand {
    async fn handler(&self, snapshotter: &dyn Snapshotter) -> Result<()> {
        let mut info = snapshotter.stat(&self.key).await?;
        info.labels = self.labels.iter().cloned().collect();

        let updated = snapshotter.update(info, &self.fields).await?;
        print_json(&updated)
    }
}
