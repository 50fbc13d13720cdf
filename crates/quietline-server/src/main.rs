//! Quietline relay server binary.
//!
//! # Usage
//!
//! ```bash
//! # In-memory storage and a self-signed certificate (development)
//! quietline-server --bind 0.0.0.0:4433
//!
//! # Durable storage and a real certificate
//! quietline-server --bind 0.0.0.0:4433 --cert cert.pem --key key.pem --db relay.redb
//! ```

use std::path::PathBuf;

use clap::Parser;
use quietline_server::{MemoryStorage, RedbStorage, Server, ServerConfig, ServerError, Storage};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Quietline relay server
#[derive(Parser, Debug)]
#[command(name = "quietline-server")]
#[command(about = "Relay for end-to-end encrypted quietline chats")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<String>,

    /// Path to the redb database; in-memory storage when omitted
    #[arg(long)]
    db: Option<PathBuf>,

    /// Maximum concurrent live connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Frames buffered per live connection before falling back to the inbox
    #[arg(long, default_value = "256")]
    outbound_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    if args.cert.is_none() || args.key.is_none() {
        tracing::warn!("no TLS certificate provided, using a self-signed certificate");
    }

    let config = ServerConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        db_path: args.db,
        max_connections: args.max_connections,
        outbound_capacity: args.outbound_capacity,
    };

    match config.db_path.clone() {
        Some(path) => {
            tracing::info!(path = %path.display(), "using redb storage");
            serve(config, RedbStorage::open(&path)?).await?;
        },
        None => {
            tracing::warn!("no --db given, queued messages are lost on restart");
            serve(config, MemoryStorage::new()).await?;
        },
    }

    Ok(())
}

async fn serve<S: Storage>(config: ServerConfig, storage: S) -> Result<(), ServerError> {
    let server = Server::bind(config, storage)?;
    tracing::info!(addr = %server.local_addr()?, "listening");

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        },
    }
}
