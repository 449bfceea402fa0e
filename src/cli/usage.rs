use crate::cli::print_json;
use crate::{Handler, Result};
use async_trait::async_trait;
use clap::Args;
use snapshot::Snapshotter;

#[derive(Debug, Args)]
pub struct UsageCommand {
    /// The key or name of the snapshot.
    key: String,
}

#[async_trait]
impl Handler for UsageCommand {
    async fn handler(&self, snapshotter: &dyn Snapshotter) -> Result<()> {
        print_json(&snapshotter.usage(&self.key).await?)
    }
}
