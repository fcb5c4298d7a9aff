//! reef - Redis-compatible storage server over an ordered KV engine

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use reef::config::Config;
use reef::server::{RespServer, ServerEntry};

#[derive(Parser, Debug)]
#[command(name = "reef")]
#[command(about = "reef - Redis-compatible storage server")]
struct Args {
    /// RESP listen address
    #[arg(short, long)]
    listen_addr: Option<String>,

    /// Number of lock chunks keys are routed across
    #[arg(long)]
    chunk_count: Option<u32>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    /// Configuration file path (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(addr) = args.listen_addr {
        config.server.listen_addr = addr;
    }
    if let Some(chunk_count) = args.chunk_count {
        config.server.chunk_count = chunk_count;
    }
    if let Some(level) = args.log_level {
        config.log.level = level;
    }

    let level = Level::from_str(&config.log.level)
        .map_err(|_| anyhow::anyhow!("invalid log level: {}", config.log.level))?;
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let addr: SocketAddr = config.server.listen_addr.parse()?;
    info!(
        "starting reef: addr={} chunks={}",
        addr, config.server.chunk_count
    );

    let entry = Arc::new(ServerEntry::new(config.server.chunk_count));
    let server = RespServer::new(entry, addr);
    server.start().await?;
    Ok(())
}
