//! feeddigest CLI: bundle unread feed entries into a periodic e-book digest.
//!
//! Records feed items into a local store, builds a digest document from the
//! unread ones, hands it to an external converter and mail transport, and
//! marks the delivered entries.

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
