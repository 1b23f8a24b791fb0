//! dotbitd - authoritative DNS daemon for the .bit namespace.

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    dotbit_cli::run().await
}
