//! Monica Node - fleet agent for distributed infrastructure control
//!
//! Long-running process deployed on every host of the fleet:
//! - Durable node identity derived from hardware, persisted locally
//! - Periodic encrypted telemetry reports to redundant controllers
//! - Remote command execution with timeout and failure isolation

mod channel;
mod config;
mod crypto;
mod execution;
mod identity;
mod metrics;
mod reporting;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use channel::CommandChannel;
use config::NodeConfig;
use crypto::CipherChannel;
use execution::CommandExecutor;
use identity::NodeIdentity;
use metrics::SystemProfile;
use reporting::Reporter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("monica_node=info")),
        )
        .init();

    info!("Monica node agent v{} starting...", env!("CARGO_PKG_VERSION"));

    // Startup-class failures are fatal before any network activity: the
    // agent never runs unconfigured, on the placeholder key, or without an
    // identity.
    let config = NodeConfig::load().context("Configuration error")?;
    let cipher = Arc::new(
        CipherChannel::new(&config.encryption_key).context("Configuration error")?,
    );
    let identity = Arc::new(
        NodeIdentity::load_or_create(&config.identity_path).context("Identity error")?,
    );
    let profile = Arc::new(SystemProfile::capture());

    info!("Node '{}' (ID: {}) initialized", identity.hostname, identity.node_id);

    let reporter = Reporter::new(
        &config,
        Arc::clone(&identity),
        Arc::clone(&profile),
        Arc::clone(&cipher),
    )?;

    let executor = CommandExecutor::new(config.max_command_timeout());
    let command_channel = config.command_channel.clone().map(|channel_config| {
        CommandChannel::new(
            channel_config,
            Arc::clone(&identity),
            Arc::clone(&cipher),
            executor,
            config.default_command_timeout(),
        )
    });

    // Reporting and command handling run independently: a hung command must
    // not delay heartbeats, and a heartbeat in flight must not delay
    // command dispatch.
    tokio::select! {
        result = reporter.run() => {
            result.context("Reporting loop failed")?;
        }
        result = run_command_channel(command_channel) => {
            result.context("Command channel failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping agent");
        }
    }

    Ok(())
}

async fn run_command_channel(channel: Option<CommandChannel>) -> Result<()> {
    match channel {
        Some(channel) => channel.run().await,
        None => {
            // Heartbeat-only deployment: park this arm forever.
            std::future::pending::<()>().await;
            Ok(())
        }
    }
}
