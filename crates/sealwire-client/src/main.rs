//! Sealwire client binary.
//!
//! Speaks line-delimited JSON with the TUI over stdio and the sealwire wire
//! protocol with the server. Runs with no arguments against the default
//! local server.
//!
//! ```bash
//! sealwire-client
//! sealwire-client --url ws://chat.example.net:8080/ws --log-level debug
//! ```

use clap::Parser;
use sealwire_client::{bridge, Supervisor, UiEmitter};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Sealwire chat client
#[derive(Parser, Debug)]
#[command(name = "sealwire-client")]
#[command(about = "End-to-end-encrypted chat client")]
#[command(version)]
struct Args {
    /// WebSocket URL of the relay server
    #[arg(long, default_value = "ws://localhost:8080/ws")]
    url: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging("sealwire-client", &args.log_level)?;

    tracing::info!("sealwire client starting");

    let (ui, ui_rx) = UiEmitter::new();
    tokio::spawn(bridge::write_ui_to_stdout(ui_rx));

    let supervisor = Supervisor::new(args.url, ui);

    {
        let supervisor = supervisor.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received");
                supervisor.quit().await;
            }
        });
    }

    bridge::run(supervisor).await?;

    // Clean shutdown: quit command, exhausted reconnect budget, or TUI EOF.
    Ok(())
}

/// Log to stderr and append to `/tmp/<name>.log`. Stdout is reserved for the
/// TUI protocol.
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
