use std::process::ExitCode;

use clap::Parser;
use vizstream_cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    Cli::parse().run().await
}
