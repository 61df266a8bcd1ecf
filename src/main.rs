use anyhow::Result;
use palaver::cli;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
