use anyhow::Result;
use clap::Parser;
use jeux::{shutdown::shutdown_signal, Server, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::parse();

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("jeux=info"))?;
    if config.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let shutdown = shutdown_signal()?;
    let server = Server::bind(config).await.inspect_err(|e| {
        tracing::error!("startup failed: {:#}", e);
    })?;
    server.run(shutdown).await
}
