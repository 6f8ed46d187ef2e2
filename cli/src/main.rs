mod cli;
mod commands;

use cli::{Cli, Commands};
use commands::simplify;

/// Install the log subscriber; `-v` raises the level from info to debug, `-vv` to trace.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

pub fn run() -> anyhow::Result<()> {
    use clap::Parser;

    let cli = Cli::parse();
    init_logging(cli.verbose);
    match &cli.command {
        Commands::Simplify(args) => simplify::run(&cli, args),
    }
}

fn main() -> anyhow::Result<()> { run() }
