//! OCPP Central Node - CLI for the OCPP central system
//!
//! Accepts charge point WebSocket connections and serves the admin API.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (in-memory backend)
//! ocpp-central-node
//!
//! # Forward records to a REST backend
//! ocpp-central-node --backend-url http://localhost:8000
//!
//! # Custom listeners and timing
//! ocpp-central-node --ws-addr 0.0.0.0:9100 --admin-addr 127.0.0.1:3100 \
//!     --call-timeout 15 --heartbeat-interval 300
//! ```
//!
//! Charge points connect to `ws://<ws-addr>/<chargePointId>`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ocpp_central::{admin, Backend, CentralConfig, CentralServer, CentralSystem, HttpBackend, MemoryBackend};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// OCPP 1.6 central system
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket listen address for charge points
    #[arg(long, default_value = "0.0.0.0:9000")]
    ws_addr: SocketAddr,

    /// HTTP listen address for the admin API
    #[arg(long, default_value = "0.0.0.0:3000")]
    admin_addr: SocketAddr,

    /// Backend base URL (in-memory backend when omitted)
    #[arg(long)]
    backend_url: Option<String>,

    /// Backend request timeout in seconds
    #[arg(long, default_value = "30")]
    backend_timeout: u64,

    /// Timeout for calls to charge points, in seconds
    #[arg(long, default_value = "8")]
    call_timeout: u64,

    /// Heartbeat interval handed to charge points, in seconds
    #[arg(long, default_value = "60")]
    heartbeat_interval: i32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let backend_label = args.backend_url.as_deref().unwrap_or("in-memory");

    // Print banner
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║              OCPP Central Node - Central System              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  WebSocket: {:<49} ║", format!("ws://{}/{{cpId}}", args.ws_addr));
    println!("║  Admin:     {:<49} ║", format!("http://{}", args.admin_addr));
    println!("║  Backend:   {:<49} ║", truncate(backend_label, 49));
    println!("║  Timeout:   {:<49} ║", format!("{}s", args.call_timeout));
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    // Build configuration
    let mut config = CentralConfig::new(args.ws_addr, args.admin_addr)
        .with_call_timeout(Duration::from_secs(args.call_timeout))
        .with_heartbeat_interval(args.heartbeat_interval)
        .with_backend_timeout(Duration::from_secs(args.backend_timeout));

    if let Some(url) = &args.backend_url {
        config = config.with_backend(url);
    }

    let backend: Arc<dyn Backend> = match &config.backend_url {
        Some(url) => {
            info!("Using backend at {}", url);
            Arc::new(HttpBackend::new(url, config.backend_timeout)?)
        }
        None => {
            info!("No backend URL configured, keeping records in memory");
            Arc::new(MemoryBackend::new())
        }
    };

    info!("Starting OCPP central system...");

    let system = CentralSystem::new(config.clone(), backend);
    let server = CentralServer::bind(config.ws_addr).await?;

    tokio::select! {
        result = server.run(system.clone()) => {
            if let Err(e) = result {
                error!("WebSocket server stopped: {}", e);
            }
        }
        result = admin::serve(config.admin_addr, system.clone()) => {
            if let Err(e) = result {
                error!("Admin API stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down ({} charge point(s) connected)", system.count());
        }
    }

    Ok(())
}

/// Truncate string with ellipsis, counting characters rather than bytes
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let cut = s
        .char_indices()
        .nth(max_len.saturating_sub(3))
        .map_or(s.len(), |(i, _)| i);
    format!("{}...", &s[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_ascii() {
        assert_eq!(truncate("memory", 49), "memory");
        assert_eq!(truncate("http://backend.example:8080/api", 10), "http://...");
    }

    #[test]
    fn test_truncate_multibyte() {
        let label = "http://bäckend/ü".repeat(10);
        let short = truncate(&label, 49);
        assert_eq!(short.chars().count(), 49);
        assert!(short.ends_with("..."));

        assert_eq!(truncate("ééééé", 5), "ééééé");
        assert_eq!(truncate("éééééé", 5), "éé...");
    }
}
