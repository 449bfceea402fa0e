use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Upper bound for a label key plus its value, in bytes.
const MAX_LABEL_SIZE: usize = 4096;

/// Snapshot kind
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum Kind {
    /// Mutable snapshot with its own upper and work directories
    #[default]
    #[serde(rename = "active")]
    Active,
    /// Read-only projection of a committed lineage
    #[serde(rename = "view")]
    View,
    /// Immutable layer, addressable by its name
    #[serde(rename = "committed")]
    Committed,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Active => "active",
            Kind::View => "view",
            Kind::Committed => "committed",
        };
        f.write_str(name)
    }
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Kind::Active),
            "view" => Ok(Kind::View),
            "committed" => Ok(Kind::Committed),
            _ => Err(Error::InvalidArgument(format!("unknown snapshot kind {}", s))),
        }
    }
}

/// `Info` holds the user visible metadata of a snapshot.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Info {
    pub kind: Kind,
    /// The key of an active or view snapshot, or the name of a committed one
    pub name: String,
    /// The name of the parent committed snapshot, if any
    pub parent: Option<String>,
    pub labels: HashMap<String, String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Disk resources used by a snapshot.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Usage {
    /// Number of distinct inodes
    pub inodes: i64,
    /// Allocated bytes
    pub size: i64,
}

/// A field setter applied to the info of a snapshot before it is written.
#[derive(Clone, Debug, PartialEq)]
pub enum Opt {
    /// Merge these labels into the snapshot labels
    Labels(HashMap<String, String>),
    /// Set a single label
    Label(String, String),
    /// Override the parent given to the operation
    Parent(String),
}

impl Opt {
    pub fn apply(&self, info: &mut Info) -> Result<()> {
        match self {
            Opt::Labels(labels) => {
                for (key, value) in labels {
                    validate_label(key, value)?;
                }
                info.labels
                    .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Opt::Label(key, value) => {
                validate_label(key, value)?;
                info.labels.insert(key.clone(), value.clone());
            }
            Opt::Parent(parent) => {
                info.parent = Some(parent.clone()).filter(|p| !p.is_empty());
            }
        }
        Ok(())
    }
}

/// Apply every option, in order, on a fresh info.
pub fn apply_opts(opts: &[Opt]) -> Result<Info> {
    let mut base = Info::default();
    for opt in opts {
        opt.apply(&mut base)
            .map_err(|e| Error::InvalidArgument(format!("failed to apply option: {}", e)))?;
    }
    Ok(base)
}

/// Check a label against the size limits shared with containerd.
pub fn validate_label(key: &str, value: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("label key cannot be empty".to_string()));
    }
    if key.len() + value.len() > MAX_LABEL_SIZE {
        return Err(Error::InvalidArgument(format!(
            "label key and value length ({} bytes) greater than maximum size ({} bytes), key: {}",
            key.len() + value.len(),
            MAX_LABEL_SIZE,
            key
        )));
    }
    Ok(())
}
