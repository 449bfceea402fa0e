use crate::cli::{label_opts, parse_label};
use crate::{Handler, Result};
use async_trait::async_trait;
use clap::Args;
use snapshot::Snapshotter;

/// Arguments for our `CommitCommand`.
///
/// Example :
///
/// `guest-pull-snapshotter commit sha256:layer extract-1`
#[derive(Debug, Args)]
pub struct CommitCommand {
    /// The name of the committed snapshot.
    name: String,
    /// The key of the active snapshot to commit.
    key: String,
    /// Labels of the committed snapshot, in the key=value form.
    #[clap(long = "label", short, parse(try_from_str = parse_label))]
    labels: Vec<(String, String)>,
}

#[async_trait]
impl Handler for CommitCommand {
    async fn handler(&self, snapshotter: &dyn Snapshotter) -> Result<()> {
        snapshotter
            .commit(&self.name, &self.key, &label_opts(&self.labels))
            .await?;

        log::info!("committed {} to {}", self.key, self.name);
        Ok(())
    }
}
