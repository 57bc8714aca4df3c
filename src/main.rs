#[tokio::main]
async fn main() -> anyhow::Result<()> {
    accessly::cli::run().await
}
