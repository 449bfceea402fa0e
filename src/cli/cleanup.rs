use crate::{Handler, Result};
use async_trait::async_trait;
use clap::Args;
use snapshot::Snapshotter;

#[derive(Debug, Args)]
pub struct CleanupCommand {}

#[async_trait]
impl Handler for CleanupCommand {
    async fn handler(&self, snapshotter: &dyn Snapshotter) -> Result<()> {
        snapshotter.cleanup().await?;
        Ok(())
    }
}
