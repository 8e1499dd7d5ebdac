//! PaperScout CLI: multi-catalog literature discovery.
//!
//! Searches several scholarly catalogs at once, merges and enriches the
//! results, and optionally stores abstract or full-text chunks locally.

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
