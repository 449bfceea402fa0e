use crate::volume::{is_volume_option, KataVirtualVolume};
use crate::{Error, Result};
use nix::mount::MsFlags;
use std::path::{Path, PathBuf};

/// The only file system type the helper knows how to mount.
pub const OVERLAY_FS_TYPE: &str = "overlay";

/// `MountArgs` holds a parsed helper invocation.
///
/// containerd runs fuse mount helpers as:
///
/// `guest-pull-overlayfs overlay /tmp/ctd-volume107067851 -o lowerdir=/foo/lower2:/foo/lower1,upperdir=/foo/upper,workdir=/foo/work,io.katacontainers.volume=...,dev,suid`
#[derive(Debug, PartialEq)]
pub struct MountArgs {
    pub fs_type: String,
    pub target: PathBuf,
    /// Options left once guest pull volumes are filtered out.
    pub options: Vec<String>,
}

impl MountArgs {
    /// Validate the helper arguments and drop the guest pull options the kernel
    /// would not understand.
    pub fn new(fs_type: &str, target: &Path, options: Option<&str>) -> Result<Self> {
        if fs_type != OVERLAY_FS_TYPE {
            return Err(Error::InvalidMountArguments(format!(
                "invalid filesystem type {} for overlayfs",
                fs_type
            )));
        }

        if target.as_os_str().is_empty() {
            return Err(Error::InvalidMountArguments(
                "empty overlayfs mount target".to_string(),
            ));
        }

        let mut kept = Vec::new();
        for opt in options.unwrap_or_default().split(',') {
            if opt.is_empty() {
                continue;
            }
            if !is_volume_option(opt) {
                kept.push(opt.to_string());
                continue;
            }

            match KataVirtualVolume::from_option(opt) {
                Ok(volume) => log::debug!(
                    "ignoring {} volume with options {:?}",
                    volume.volume_type,
                    volume.options
                ),
                Err(e) => log::warn!("ignoring undecodable volume option: {}", e),
            }
        }
        let options = kept;

        if options.is_empty() {
            return Err(Error::InvalidMountArguments(
                "empty overlayfs mount options".to_string(),
            ));
        }

        Ok(Self {
            fs_type: fs_type.to_string(),
            target: target.to_path_buf(),
            options,
        })
    }

    /// Perform the overlay mount.
    pub fn mount(&self) -> Result<()> {
        let (flags, data) = parse_options(&self.options);

        log::info!(
            "fsType: {}, target: {}, flags: {:?}, data: {}",
            &self.fs_type,
            self.target.display(),
            flags,
            &data
        );

        nix::mount::mount(
            Some(self.fs_type.as_str()),
            self.target.as_path(),
            Some(self.fs_type.as_str()),
            flags,
            Some(data.as_str()),
        )?;

        log::debug!("new overlay mountpoint at {}", self.target.display());

        Ok(())
    }
}

/// Returns the flag a mount option word sets, or clears when `true` is returned as the second value.
fn option_flag(option: &str) -> Option<(MsFlags, bool)> {
    let flag = match option {
        "defaults" => (MsFlags::empty(), false),
        "ro" => (MsFlags::MS_RDONLY, false),
        "rw" => (MsFlags::MS_RDONLY, true),
        "nosuid" => (MsFlags::MS_NOSUID, false),
        "suid" => (MsFlags::MS_NOSUID, true),
        "nodev" => (MsFlags::MS_NODEV, false),
        "dev" => (MsFlags::MS_NODEV, true),
        "noexec" => (MsFlags::MS_NOEXEC, false),
        "exec" => (MsFlags::MS_NOEXEC, true),
        "sync" => (MsFlags::MS_SYNCHRONOUS, false),
        "async" => (MsFlags::MS_SYNCHRONOUS, true),
        "dirsync" => (MsFlags::MS_DIRSYNC, false),
        "remount" => (MsFlags::MS_REMOUNT, false),
        "mand" => (MsFlags::MS_MANDLOCK, false),
        "nomand" => (MsFlags::MS_MANDLOCK, true),
        "noatime" => (MsFlags::MS_NOATIME, false),
        "atime" => (MsFlags::MS_NOATIME, true),
        "nodiratime" => (MsFlags::MS_NODIRATIME, false),
        "diratime" => (MsFlags::MS_NODIRATIME, true),
        "bind" => (MsFlags::MS_BIND, false),
        "rbind" => (MsFlags::MS_BIND | MsFlags::MS_REC, false),
        "relatime" => (MsFlags::MS_RELATIME, false),
        "norelatime" => (MsFlags::MS_RELATIME, true),
        "strictatime" => (MsFlags::MS_STRICTATIME, false),
        "nostrictatime" => (MsFlags::MS_STRICTATIME, true),
        _ => return None,
    };
    Some(flag)
}

/// Split mount options into the flags bitmask and the data string passed to the file system.
pub fn parse_options(options: &[String]) -> (MsFlags, String) {
    let mut flags = MsFlags::empty();
    let mut data = Vec::new();

    for option in options {
        match option_flag(option) {
            Some((flag, true)) => flags.remove(flag),
            Some((flag, false)) => flags.insert(flag),
            None => data.push(option.as_str()),
        }
    }

    (flags, data.join(","))
}
