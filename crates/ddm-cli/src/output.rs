//! Console helpers: color banners, the warning sink, and safe output
//! file creation.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use owo_colors::OwoColorize;

use ddm_core::WarningCallback;

pub fn error_banner(err: &anyhow::Error) -> String {
    let mut msg = format!("{} {err}", "Error:".red().bold());
    for cause in err.chain().skip(1) {
        msg.push_str(&format!("\n  caused by: {cause}"));
    }
    msg
}

/// Warnings go to stderr in yellow so redirected output stays clean.
pub fn warning_callback() -> WarningCallback {
    Arc::new(|msg: &str| eprintln!("{}", msg.yellow()))
}

/// stdout, or the file at `path` — refusing to overwrite an existing
/// one rather than clobber an earlier snapshot.
pub fn open_output(path: Option<&PathBuf>) -> anyhow::Result<Box<dyn Write>> {
    match path {
        None => Ok(Box::new(std::io::stdout().lock())),
        Some(p) => {
            if p.exists() {
                anyhow::bail!("output file {} already exists, aborting", p.display());
            }
            Ok(Box::new(File::create(p)?))
        }
    }
}

/// Print a subcommand usage complaint and return the usage exit code.
pub fn usage(msg: &str) -> i32 {
    eprintln!("{msg}");
    100
}
