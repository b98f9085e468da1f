use std::path::PathBuf;

use clap::Args;

use ddm_engine::StdinPrompter;

use crate::output;

#[derive(Args)]
pub struct BackupArgs {
    /// Source directory (never written to)
    #[arg(short = 's', long = "source")]
    source: PathBuf,
    /// Backup directory to align to the source
    #[arg(short = 't', long = "target")]
    target: PathBuf,
    /// Optional `<meta1> <meta2>` replica pair enabling the bit rot guard
    paths: Vec<PathBuf>,
    /// Attempt to fix inconsistencies found by the pre-backup scrub
    #[arg(long)]
    fixup: bool,
    /// Skip hashing during the scans; missing hashes are computed after
    /// the backup, from the destination
    #[arg(long)]
    nohash: bool,
    /// Do not scan source and backup directories in parallel
    #[arg(long)]
    singlethread: bool,
}

pub fn run(args: BackupArgs) -> anyhow::Result<i32> {
    let warning = output::warning_callback();
    let mut prompter = StdinPrompter;
    let code = match args.paths.as_slice() {
        [] => {
            if args.fixup || args.nohash {
                return Ok(output::usage(
                    "backup: --fixup and --nohash require the <meta1> <meta2> pair",
                ));
            }
            ddm_engine::backup(
                &args.source,
                &args.target,
                !args.singlethread,
                Some(&warning),
                &mut prompter,
            )?
        }
        [meta1, meta2] => ddm_engine::backup_with_meta(
            &args.source,
            &args.target,
            meta1,
            meta2,
            args.fixup,
            !args.nohash,
            !args.singlethread,
            Some(&warning),
            &mut prompter,
        )?,
        _ => {
            return Ok(output::usage(
                "usage: ddm backup -s <src> -t <dst> [<meta1> <meta2>] \
                 [--fixup] [--nohash] [--singlethread]",
            ))
        }
    };
    Ok(code)
}
