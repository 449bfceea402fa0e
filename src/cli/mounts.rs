use crate::cli::print_json;
use crate::{Handler, Result};
use async_trait::async_trait;
use clap::Args;
use snapshot::Snapshotter;

#[derive(Debug, Args)]
pub struct MountsCommand {
    /// The key of an active or view snapshot.
    key: String,
}

#[async_trait]
impl Handler for MountsCommand {
    async fn handler(&self, snapshotter: &dyn Snapshotter) -> Result<()> {
        print_json(&snapshotter.mounts(&self.key).await?)
    }
}
