//! cycler - rotate emulator instances in fixed-size batches.

use anyhow::Result;
use clap::Parser;

mod commands;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = cli.run().await {
        output::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}
