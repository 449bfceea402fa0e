use crate::cli::{Error, Result};
use log::LevelFilter;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Where snapshots live unless told otherwise.
pub const DEFAULT_ROOT_DIR: &str = "/var/lib/containerd-guest-pull-grpc";

pub const DEFAULT_CONFIG_PATH: &str = "/etc/containerd-guest-pull-grpc/config.toml";

pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Info;

/// `FileConfig` is the content of the optional TOML configuration file.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct FileConfig {
    pub root_dir: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl FileConfig {
    /// Read the configuration file, a missing file yields an empty configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(Error::ConfigRead {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        toml::from_str(&content).map_err(|e| Error::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// `Config` is the resolved configuration of the command line tool.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub root_dir: PathBuf,
    pub log_level: LevelFilter,
}

impl Config {
    /// Merge the command line values over the configuration file, then over the defaults.
    pub fn resolve(
        root_dir: Option<&Path>,
        log_level: Option<LevelFilter>,
        config_file: &Path,
    ) -> Result<Self> {
        let file = FileConfig::load(config_file)?;

        let root_dir = root_dir
            .map(Path::to_path_buf)
            .or(file.root_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT_DIR));

        let log_level = match (log_level, file.log_level) {
            (Some(level), _) => level,
            (None, Some(level)) => level
                .parse()
                .map_err(|_| Error::LogLevel(level.clone()))?,
            (None, None) => DEFAULT_LOG_LEVEL,
        };

        Ok(Self {
            root_dir,
            log_level,
        })
    }
}
