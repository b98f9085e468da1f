pub mod backup;
pub mod diff;
pub mod ls;
pub mod scrub;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Produce a metadata snapshot of a directory
    Ls(ls::LsArgs),
    /// Two or three way diff between directories or metadata files
    Diff(diff::DiffArgs),
    /// Check a backup directory against its two metadata files
    Scrub(scrub::ScrubArgs),
    /// Mirror a source directory into a backup directory
    Backup(backup::BackupArgs),
}

impl Commands {
    /// Run the subcommand, returning its process exit code.
    pub fn run(self) -> anyhow::Result<i32> {
        match self {
            Commands::Ls(args) => ls::run(args),
            Commands::Diff(args) => diff::run(args),
            Commands::Scrub(args) => scrub::run(args),
            Commands::Backup(args) => backup::run(args),
        }
    }
}
