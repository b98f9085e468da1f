use std::path::PathBuf;

use clap::Args;

use ddm_core::{diff2, diff3, write_diff, CompareOpt, DirectoryTree, ScanOpt};

use crate::output;

#[derive(Args)]
pub struct DiffArgs {
    /// First operand: a directory or a metadata file
    a: PathBuf,
    /// Second operand: a directory or a metadata file
    b: PathBuf,
    /// Optional third operand for a three way diff
    c: Option<PathBuf>,
    /// Skip content hashing when scanning directories
    #[arg(short = 'n', long = "nohash")]
    nohash: bool,
    /// Write the diff here instead of stdout (refuses to overwrite)
    #[arg(short = 'o', long = "out")]
    out: Option<PathBuf>,
    /// Attributes to ignore: perm owner mtime size hash symlink all
    #[arg(short = 'i', long = "ignore")]
    ignore: Option<String>,
}

pub fn run(args: DiffArgs) -> anyhow::Result<i32> {
    let opt: CompareOpt = match args.ignore.as_deref() {
        Some(list) => match list.parse() {
            Ok(opt) => opt,
            Err(e) => return Ok(output::usage(&e.to_string())),
        },
        None => CompareOpt::default(),
    };
    let scan_opt = if args.nohash {
        ScanOpt::OmitHash
    } else {
        ScanOpt::ComputeHash
    };
    let mut out = output::open_output(args.out.as_ref())?;

    let callback = output::warning_callback();
    let load = |path: &PathBuf| -> anyhow::Result<DirectoryTree> {
        let mut tree = DirectoryTree::new();
        tree.set_warning_callback(callback.clone());
        tree.load_path(path, scan_opt)?;
        Ok(tree)
    };

    let a = load(&args.a)?;
    let b = load(&args.b)?;
    let differences = match &args.c {
        Some(c_path) => {
            let c = load(c_path)?;
            let diff = diff3(&a, &b, &c, &opt);
            write_diff(&mut out, &diff)?;
            !diff.is_empty()
        }
        None => {
            let diff = diff2(&a, &b, &opt);
            write_diff(&mut out, &diff)?;
            !diff.is_empty()
        }
    };
    Ok(if differences { 1 } else { 0 })
}
