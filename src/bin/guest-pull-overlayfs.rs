use clap::Parser;
use guest_pull::overlayfs::MountArgs;
use log::LevelFilter;
use std::path::PathBuf;

/// Mount helper for the `fuse.guest-pull-overlayfs` mounts.
///
/// containerd invokes it as `guest-pull-overlayfs overlay <target> -o <options>`.
#[derive(Parser, Debug)]
#[clap(version, author, about = "Mount an overlay file system without its guest pull volume")]
struct MountOpts {
    /// File system type, only overlay is supported
    fs_type: String,
    /// The mount target
    target: PathBuf,
    /// Comma separated mount options
    #[clap(short, long)]
    options: Option<String>,
    /// Log level: off, error, warn, info, debug or trace
    #[clap(long, default_value = "info")]
    log_level: LevelFilter,
}

fn main() {
    let opts: MountOpts = MountOpts::parse();
    env_logger::Builder::new()
        .filter_level(opts.log_level)
        .init();

    let result = MountArgs::new(&opts.fs_type, &opts.target, opts.options.as_deref())
        .and_then(|args| args.mount());

    if let Err(e) = result {
        log::error!("failed to mount {}: {}", opts.target.display(), e);
        std::process::exit(1);
    }
}
