use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::Commands;

#[derive(Parser)]
#[command(
    name = "ddm",
    version,
    about = "Content and metadata aware directory compare, scrub and backup"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 100,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    match cli.command.run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}", output::error_banner(&e));
            std::process::exit(10);
        }
    }
}
