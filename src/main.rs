#[tokio::main]
async fn main() -> anyhow::Result<()> {
    osduth_gateway::server::run().await
}
