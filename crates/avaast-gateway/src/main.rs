use anyhow::Result;

use avaast_gateway::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = telemetry::init("avaast-gateway")?;
    avaast_gateway::server::run().await
}
