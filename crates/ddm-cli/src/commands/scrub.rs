use std::path::PathBuf;

use clap::Args;

use ddm_engine::StdinPrompter;

use crate::output;

#[derive(Args)]
pub struct ScrubArgs {
    /// Source directory to consult when repairing the backup
    #[arg(short = 's', long = "source", requires = "target")]
    source: Option<PathBuf>,
    /// Backup directory (with -s; otherwise it is the first positional)
    #[arg(short = 't', long = "target", requires = "source")]
    target: Option<PathBuf>,
    /// `<dir> <meta1> <meta2>`, or `<meta1> <meta2>` with -s/-t
    paths: Vec<PathBuf>,
    /// Attempt to fix inconsistencies in the backup directory
    #[arg(long)]
    fixup: bool,
    /// Do not scan source and backup directories in parallel
    #[arg(long)]
    singlethread: bool,
}

pub fn run(args: ScrubArgs) -> anyhow::Result<i32> {
    let warning = output::warning_callback();
    let mut prompter = StdinPrompter;
    let code = match (&args.source, &args.target) {
        (Some(source), Some(target)) => {
            let [meta1, meta2] = args.paths.as_slice() else {
                return Ok(output::usage(
                    "usage: ddm scrub -s <src> -t <dst> <meta1> <meta2> [--fixup] [--singlethread]",
                ));
            };
            ddm_engine::scrub_with_source(
                source,
                target,
                meta1,
                meta2,
                args.fixup,
                !args.singlethread,
                Some(&warning),
                &mut prompter,
            )?
        }
        (None, None) => {
            let [dir, meta1, meta2] = args.paths.as_slice() else {
                return Ok(output::usage(
                    "usage: ddm scrub <dir> <meta1> <meta2> [--fixup]",
                ));
            };
            ddm_engine::scrub(dir, meta1, meta2, args.fixup, Some(&warning), &mut prompter)?
        }
        // clap's `requires` already rejects one without the other
        _ => return Ok(output::usage("scrub: -s and -t must be given together")),
    };
    Ok(code)
}
