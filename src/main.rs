use murmur::{logging, NodeConfig};
use murmur_node::StdioTransport;
use std::sync::Arc;
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = NodeConfig::from_env()?;
    logging::init(&config.log)?;

    let transport = Arc::new(StdioTransport::stdout());
    murmur::run(&config, BufReader::new(tokio::io::stdin()), transport).await?;
    Ok(())
}
