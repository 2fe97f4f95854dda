//! Guardian
//!
//! A self-hosted gateway fronting a web frontend, a backend API and a local
//! dashboard, built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌───────────────────────────────────────────────────────────┐
//!                      │                         GUARDIAN                           │
//!                      │                                                            │
//!   Client Request     │  ┌──────────┐   ┌──────────┐   ┌─────────────────────────┐ │
//!   ───────────────────┼─▶│ listener │──▶│ routing  │──▶│        pipeline         │ │
//!                      │  │ (3000,   │   │ (path →  │   │ traffic → headers →     │ │
//!                      │  │ 8000,    │   │ service) │   │ bans → rate-limit →     │ │
//!                      │  │ 9000)    │   └──────────┘   │ bot → waf → cache →     │ │
//!                      │  └──────────┘                  │ circuit-breaker → proxy │ │
//!                      │                                └───────────┬─────────────┘ │
//!   Client Response    │                                            │               │
//!   ◀──────────────────┼────────────────────────────────────────────┘               │
//!                      │                                            ▼               │
//!                      │  ┌──────────────────────────┐   ┌──────────────────────┐   │
//!                      │  │       supervisor         │──▶│  upstream processes  │   │
//!                      │  │ spawn/restart/logs/probe │   │  127.0.0.1:<port>    │   │
//!                      │  └──────────────────────────┘   └──────────────────────┘   │
//!                      └───────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use guardian::lifecycle::{signals, startup};
use guardian::Gateway;

#[derive(Debug, Parser)]
#[command(name = "guardian", version, about = "Reverse proxy, request filter and process supervisor")]
struct Cli {
    /// Path to the TOML configuration file. Built-in defaults when omitted.
    #[arg(short, long, env = "GUARDIAN_CONFIG")]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = startup::load(cli.config.as_deref())?;
    if cli.check {
        println!("configuration OK");
        return Ok(());
    }

    startup::init_observability(&config);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listeners = config.listeners.len(),
        services = config.services.len(),
        "guardian starting"
    );

    let gateway = Gateway::build(config)?;
    let running = gateway.start().await?;

    let signal = signals::wait_for_shutdown().await;
    tracing::info!(signal, "Shutdown signal received");
    running.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
