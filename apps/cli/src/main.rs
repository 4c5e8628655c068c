//! Vigil CLI — workflow assignment and batch issue processing.
//!
//! Discovers monitored web content, files tracking tickets, and drives
//! them through the label-driven processing lifecycle.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
