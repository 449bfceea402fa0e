mod cleanup;
mod commit;
mod list;
mod mounts;
mod prepare;
mod remove;
mod stat;
mod update;
mod usage;
mod view;

use crate::cli::cleanup::CleanupCommand;
use crate::cli::commit::CommitCommand;
use crate::cli::list::ListCommand;
use crate::cli::mounts::MountsCommand;
use crate::cli::prepare::PrepareCommand;
use crate::cli::remove::RemoveCommand;
use crate::cli::stat::StatCommand;
use crate::cli::update::UpdateCommand;
use crate::cli::usage::UsageCommand;
use crate::cli::view::ViewCommand;
use crate::config::DEFAULT_CONFIG_PATH;
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use serde::Serialize;
use snapshot::{Opt, Snapshotter};
use std::collections::HashMap;
use std::path::PathBuf;

/// CLI related errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Snapshot(#[from] snapshot::Error),
    #[error("failed to read config file {path:?}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path:?}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid log level {0}")]
    LogLevel(String),
    #[error("failed to print output: {0}")]
    Output(#[from] serde_json::Error),
}

/// A common result type for our CLI.
pub type Result<T> = std::result::Result<T, Error>;

/// `Handler` is a trait that should be implemented for each of our commands.
///
/// It defines the contract & the input / output of a command execution.
#[async_trait]
pub trait Handler {
    /// Executes the command handler against the snapshotter.
    async fn handler(&self, snapshotter: &dyn Snapshotter) -> Result<()>;
}

#[derive(Parser, Debug)]
#[clap(version, author, about = "Manage guest pull snapshots")]
pub struct Cli {
    #[clap(flatten)]
    pub(crate) options: GlobalOptions,
    #[clap(subcommand)]
    pub(crate) command: Command,
}

/// Options shared by every command.
#[derive(Args, Debug)]
pub struct GlobalOptions {
    /// Root directory of the snapshotter
    #[clap(long, env = "GUEST_PULL_ROOT")]
    pub root: Option<PathBuf>,
    /// Path to the TOML configuration file
    #[clap(long, env = "GUEST_PULL_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// Log level: off, error, warn, info, debug or trace
    #[clap(long, env = "GUEST_PULL_LOG_LEVEL")]
    pub log_level: Option<LevelFilter>,
}

impl Cli {
    /// Get the command used by the user.
    ///
    /// For example, if the user executes the command `prepare`,
    /// we dynamically return the command so the `main` can
    /// execute it.
    pub fn command(self) -> Box<dyn Handler> {
        match self.command {
            Command::Prepare(cmd) => Box::new(cmd),
            Command::View(cmd) => Box::new(cmd),
            Command::Mounts(cmd) => Box::new(cmd),
            Command::Commit(cmd) => Box::new(cmd),
            Command::Remove(cmd) => Box::new(cmd),
            Command::Stat(cmd) => Box::new(cmd),
            Command::Update(cmd) => Box::new(cmd),
            Command::List(cmd) => Box::new(cmd),
            Command::Usage(cmd) => Box::new(cmd),
            Command::Cleanup(cmd) => Box::new(cmd),
        }
    }
}

/// The enumeration of our commands.
///
/// Each of our commands should be listed in this enumeration with the following format :
/// CommandName(CommandHandler)
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an active snapshot and print its mounts
    Prepare(PrepareCommand),
    /// Create a read-only view of a committed snapshot and print its mounts
    View(ViewCommand),
    /// Print the mounts of an active or view snapshot
    Mounts(MountsCommand),
    /// Commit an active snapshot
    Commit(CommitCommand),
    /// Remove a snapshot
    Remove(RemoveCommand),
    /// Print the info of a snapshot
    Stat(StatCommand),
    /// Update the labels of a snapshot
    Update(UpdateCommand),
    /// List snapshots
    List(ListCommand),
    /// Print the disk usage of a snapshot
    Usage(UsageCommand),
    /// Remove directories not belonging to any snapshot
    Cleanup(CleanupCommand),
}

/// Parse a `key=value` label argument.
pub(crate) fn parse_label(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, _)) if key.is_empty() => Err(format!("empty label key in {:?}", s)),
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => Err(format!("label {:?} is not in the key=value form", s)),
    }
}

/// Turn label arguments into snapshot options.
pub(crate) fn label_opts(labels: &[(String, String)]) -> Vec<Opt> {
    if labels.is_empty() {
        return Vec::new();
    }
    vec![Opt::Labels(labels.iter().cloned().collect::<HashMap<_, _>>())]
}

/// Print a value as pretty JSON on the standard output.
pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_label() {
        assert_eq!(
            parse_label("containerd.io/snapshot.ref=sha256:abc").unwrap(),
            (
                "containerd.io/snapshot.ref".to_string(),
                "sha256:abc".to_string()
            )
        );
        assert_eq!(
            parse_label("empty=").unwrap(),
            ("empty".to_string(), String::new())
        );
        assert!(parse_label("novalue").is_err());
        assert!(parse_label("=value").is_err());
    }

    #[test]
    fn test_label_opts() {
        assert!(label_opts(&[]).is_empty());

        let opts = label_opts(&[("a".to_string(), "1".to_string())]);
        assert_eq!(
            opts,
            vec![Opt::Labels(HashMap::from([(
                "a".to_string(),
                "1".to_string()
            )]))]
        );
    }

    #[test]
    fn test_parse_command_line() {
        let cli = Cli::try_parse_from([
            "guest-pull-snapshotter",
            "--root",
            "/tmp/gp",
            "prepare",
            "key",
            "parent",
            "--label",
            "a=1",
        ])
        .unwrap();

        assert_eq!(cli.options.root, Some(PathBuf::from("/tmp/gp")));
        assert!(matches!(cli.command, Command::Prepare(_)));
    }
}
