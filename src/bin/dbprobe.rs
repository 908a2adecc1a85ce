#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dbprobe::cli::start().await
}
