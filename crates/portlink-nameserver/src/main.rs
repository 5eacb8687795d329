// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! portlink name server
//!
//! The well-known registry process that maps logical port names to network
//! contacts. Ports register here on startup; peers query here to connect;
//! processes that cannot be configured with this server's address find it
//! through the multicast discovery responder.
//!
//! # Usage
//!
//! ```bash
//! # Start on the well-known port (10000)
//! portlink-nameserver
//!
//! # Custom bind and port, discovery responder off
//! portlink-nameserver --bind 10.0.0.5 --port 10050 --no-discovery
//! ```

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod registry;
mod server;

pub use registry::{NameRecord, NameRegistry};
pub use server::NameServer;

/// portlink name server - logical port names to network contacts
#[derive(Parser, Debug)]
#[command(name = "portlink-nameserver")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "10000")]
    port: u16,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Address advertised to clients (defaults to the local IP)
    #[arg(short, long)]
    advertise: Option<String>,

    /// Disable the multicast discovery responder
    #[arg(long, default_value = "false")]
    no_discovery: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let advertise = args.advertise.unwrap_or_else(|| {
        local_ip_address::local_ip()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|_| "127.0.0.1".to_owned())
    });

    let server = NameServer::new(&args.bind, args.port, &advertise, !args.no_discovery);

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            server.shutdown();
        }
    }
    Ok(())
}
