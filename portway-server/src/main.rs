use anyhow::Result;
use clap::Parser;
use portway_common::constants::DEFAULT_CONTROL_BIND;
use portway_core::{PlainRelay, SessionManager, SessionRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod control;

use control::ControlConsumer;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the control-plane listener to
    #[arg(long, default_value = DEFAULT_CONTROL_BIND, env = "PORTWAY_CONTROL_BIND")]
    control_bind: SocketAddr,

    /// Log level
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Run a plain unframed relay instead (format: EXTERNAL:INTERNAL)
    #[arg(long, value_name = "EXT:INT")]
    relay: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "portway_server={},portway_core={}",
            args.log_level, args.log_level
        ))
        .init();

    info!("Starting Portway Server v{}", env!("CARGO_PKG_VERSION"));

    if let Some(ports) = args.relay {
        let (external, internal) = parse_relay_ports(&ports)?;
        info!("Running in plain relay mode ({external}:{internal})");
        PlainRelay::new(external, internal).run().await?;
        return Ok(());
    }

    let registry = Arc::new(SessionRegistry::new());
    let manager = Arc::new(SessionManager::new(registry));
    let consumer = ControlConsumer::new(args.control_bind, manager);

    consumer.run().await
}

fn parse_relay_ports(ports: &str) -> Result<(u16, u16)> {
    let (external, internal) = ports
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("relay ports must look like EXT:INT, got '{ports}'"))?;
    Ok((external.parse()?, internal.parse()?))
}
