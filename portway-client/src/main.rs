use anyhow::Result;
use clap::Parser;
use portway_common::constants::DEFAULT_LOCAL_HOST;
use portway_core::TunnelClient;
use tracing::{error, info, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod api;

use api::ApiClient;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Control-plane base URL
    #[arg(long, env = "PORTWAY_SERVER_URL")]
    server_url: String,

    /// API token
    #[arg(long, env = "PORTWAY_TOKEN")]
    token: String,

    /// Host of the local service to expose
    #[arg(long, default_value = DEFAULT_LOCAL_HOST)]
    host: String,

    /// Port of the local service to expose
    #[arg(long)]
    port: u16,

    /// Log level
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "portway_client={},portway_core={}",
            args.log_level, args.log_level
        ))
        .init();

    info!("Starting Portway Client v{}", env!("CARGO_PKG_VERSION"));

    let api = ApiClient::new(&args.server_url, &args.token)?;

    info!("Requesting a tunnel allocation...");
    let connection = api.create_connection().await?;
    info!(
        "Tunnel allocated: {}:{} -> {}:{}",
        connection.address, connection.external_port, args.host, args.port
    );

    let client = TunnelClient::new(
        format!("{}:{}", connection.address, connection.internal_port),
        format!("{}:{}", args.host, args.port),
    );

    let outcome = tokio::select! {
        result = client.run() => {
            match result {
                Ok(()) => info!("Tunnel finished"),
                Err(e) => error!("Tunnel failed: {e}"),
            }
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            Ok(())
        }
    };

    if let Err(e) = api.delete_connection(&connection.id).await {
        warn!("Failed to release tunnel allocation: {e}");
    }

    outcome
}
