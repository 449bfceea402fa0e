use crate::{Handler, Result};
use async_trait::async_trait;
use clap::Args;
use snapshot::{Info, Snapshotter};

/// Arguments for our `ListCommand`.
///
/// Example :
///
/// `guest-pull-snapshotter list --filter 'kind==committed,labels."containerd.io/snapshot/guestpull"'`
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Only list snapshots matching one of the filters.
    #[clap(long = "filter", short)]
    filters: Vec<String>,
}

#[async_trait]
impl Handler for ListCommand {
    async fn handler(&self, snapshotter: &dyn Snapshotter) -> Result<()> {
        let mut infos: Vec<Info> = Vec::new();
        snapshotter
            .walk(
                &mut |info| {
                    infos.push(info.clone());
                    Ok(())
                },
                &self.filters,
            )
            .await?;

        for info in infos {
            println!("{}", serde_json::to_string(&info)?);
        }
        Ok(())
    }
}
