//! Switchboard Signal Server
//!
//! WebSocket rendezvous and signaling relay for peer-to-peer sessions.
//!
//! # Usage
//!
//! ```bash
//! # Default port (9080)
//! switchboard-signal
//!
//! # Custom port, positional or via the environment
//! switchboard-signal 1234
//! PORT=1234 switchboard-signal
//!
//! # Explicit configuration file
//! switchboard-signal --config /etc/switchboard/config.toml
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use switchboard_core::Config;
use switchboard_signal::SignalServer;

#[derive(Parser, Debug)]
#[command(name = "switchboard-signal")]
#[command(about = "Signaling relay for peer-to-peer sessions")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(env = "PORT")]
    port: Option<u16>,

    /// Bind address (overrides the config file)
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Print a sample configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.print_config {
        print!("{}", Config::sample());
        return Ok(());
    }

    // Initialize logging
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    if args.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let addr = SocketAddr::new(config.server.bind, config.server.port);

    info!("Starting Switchboard Signal Server");
    info!(
        "Sealed lobby timeout {}ms, join timeout {}ms, sweep every {}ms",
        config.timeouts.sealed_lobby_ms, config.timeouts.join_ms, config.timeouts.sweep_interval_ms
    );

    let server = SignalServer::new(&config)?;
    server.serve(addr).await?;

    Ok(())
}
