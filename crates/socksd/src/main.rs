mod cli;
mod error;

use clap::Parser;
use cli::Cli;
use error::CliError;
use socksd_proxy::{ProxyConfig, ProxyServer};

#[tokio::main]
async fn main() {
    let _cli = Cli::parse();
    setup_tracing();

    if let Err(e) = serve().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn serve() -> Result<(), CliError> {
    let config = ProxyConfig::default();
    tracing::info!(addr = %config.bind_addr, "starting socksd");
    let server = ProxyServer::new(config);
    server.run().await?;
    Ok(())
}

fn setup_tracing() {
    let filter = std::env::var("SOCKSD_LOG").unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}
