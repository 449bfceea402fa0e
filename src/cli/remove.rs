use crate::{Handler, Result};
use async_trait::async_trait;
use clap::Args;
use snapshot::Snapshotter;

#[derive(Debug, Args)]
pub struct RemoveCommand {
    /// The keys of the snapshots to remove, children first.
    #[clap(required = true)]
    keys: Vec<String>,
}

#[async_trait]
impl Handler for RemoveCommand {
    async fn handler(&self, snapshotter: &dyn Snapshotter) -> Result<()> {
        for key in &self.keys {
            snapshotter.remove(key).await?;
            log::info!("removed {}", key);
        }
        Ok(())
    }
}
