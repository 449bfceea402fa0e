//! Guest pull support shared by the snapshotter and its mount helper.
//!
//! The snapshotter never fetches image content itself. Instead it hands the
//! runtime a Kata virtual volume descriptor, embedded in the overlay mount
//! options, and the guest VM performs the pull. The [`volume`] module builds
//! and reads that descriptor, the [`overlayfs`] module implements the host-side
//! mount helper that strips it before calling `mount(2)`.

pub mod overlayfs;
pub mod volume;

/// Guest pull related errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The volume descriptor could not be serialized or parsed
    #[error("failed to (de)serialize volume descriptor: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The encoded volume descriptor is not valid base64
    #[error("failed to decode volume descriptor: {0}")]
    Decode(#[from] base64::DecodeError),
    /// The volume descriptor is structurally invalid
    #[error("invalid volume configuration: {0}")]
    InvalidVolume(String),
    /// The option string is not a Kata virtual volume option
    #[error("not a kata virtual volume option: {0}")]
    InvalidOption(String),
    /// The mount helper was invoked with unusable arguments
    #[error("invalid mount arguments: {0}")]
    InvalidMountArguments(String),
    /// The overlay mount syscall failed
    #[error("mount overlayfs by syscall: {0}")]
    Mount(#[from] nix::Error),
}

/// A common result type for our crate.
pub type Result<T> = std::result::Result<T, Error>;
