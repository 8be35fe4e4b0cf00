//! Watermark removal CLI entry point

use wmremove::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}
