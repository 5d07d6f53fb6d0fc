//! Live Poll Daemon Binary
//!
//! A WebSocket server that runs live polls for connected working-group
//! members.
//!
//! # Usage
//!
//! ```bash
//! livepoll-daemon --port 9850
//! livepoll-daemon --port 9850 --host 0.0.0.0 --config livepoll.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use live_poll::access::Directory;
use live_poll::config::DaemonConfig;
use live_poll::socket_server::{serve, Services};
use live_poll::store::MemoryStore;

/// Live Poll Socket Server Daemon
#[derive(Parser, Debug)]
#[command(name = "livepoll-daemon")]
#[command(about = "Live meeting poll daemon", version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "9850", env = "LIVEPOLL_PORT")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1", env = "LIVEPOLL_HOST")]
    host: String,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => DaemonConfig::load_from(path)?,
        None => DaemonConfig::default(),
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("live_poll={}", config.logging.level).parse()?)
                .add_directive(format!("livepoll_daemon={}", config.logging.level).parse()?),
        )
        .init();

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    let store = Arc::new(MemoryStore::new());
    let directory = Arc::new(Directory::from_entries(&config.members));
    tracing::info!("Loaded {} members from configuration", directory.member_count());

    let services = Arc::new(Services::new(store, directory.clone(), directory, config.server.clone()));

    // Start the TCP listener
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Live poll daemon listening on ws://{}", addr);

    serve(listener, services).await
}
