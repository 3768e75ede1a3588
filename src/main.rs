use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    nl_ledger::cli::run_cli().await
}
