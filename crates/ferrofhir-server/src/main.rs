use ferrofhir_server::ServerConfig;
use ferrofhir_server::server::{init_tracing, run};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = ServerConfig::load()?;
    run(config).await
}
