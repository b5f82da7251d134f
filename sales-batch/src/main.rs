use anyhow::Result;
use clap::Parser;

use sales_batch::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before the logger so RUST_LOG can live there too
    let _ = dotenvy::dotenv();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    cli::run(cli).await
}
