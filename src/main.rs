#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gatewatch_lib::run().await
}
