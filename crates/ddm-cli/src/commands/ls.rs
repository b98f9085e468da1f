use std::path::PathBuf;

use clap::Args;

use ddm_core::{DirectoryTree, ScanOpt};

use crate::output;

#[derive(Args)]
pub struct LsArgs {
    /// Directory to scan
    dir: PathBuf,
    /// Skip content hashing
    #[arg(short = 'n', long = "nohash")]
    nohash: bool,
    /// Write the snapshot here instead of stdout (refuses to overwrite)
    #[arg(short = 'o', long = "out")]
    out: Option<PathBuf>,
}

pub fn run(args: LsArgs) -> anyhow::Result<i32> {
    let mut out = output::open_output(args.out.as_ref())?;
    let opt = if args.nohash {
        ScanOpt::OmitHash
    } else {
        ScanOpt::ComputeHash
    };
    let mut tree = DirectoryTree::new();
    tree.set_warning_callback(output::warning_callback());
    tree.scan_directory(&args.dir, opt)?;
    tree.write_to(&mut out)?;
    Ok(0)
}
