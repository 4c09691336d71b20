//! Sealwire server binary.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: ws://0.0.0.0:8080/ws
//! sealwire-server
//!
//! # Development overrides
//! sealwire-server --bind 127.0.0.1:9090 --log-level debug
//! ```

use clap::Parser;
use sealwire_server::{Server, ServerConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Sealwire chat relay server
#[derive(Parser, Debug)]
#[command(name = "sealwire-server")]
#[command(about = "End-to-end-encrypted chat relay")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging("sealwire-server", &args.log_level)?;

    tracing::info!("sealwire server starting");

    let config =
        ServerConfig { bind_address: args.bind, max_connections: args.max_connections };
    let server = Server::bind(config).await?;
    let shutdown = server.shutdown_token();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            shutdown.cancel();
        }
    });

    server.run().await?;

    Ok(())
}

/// Log to stderr and append to `/tmp/<name>.log`.
fn init_logging(name: &str, level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(format!("/tmp/{name}.log"))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(std::sync::Arc::new(file)))
        .with(filter)
        .init();

    Ok(())
}
