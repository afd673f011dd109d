use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    model_server::run().await
}
