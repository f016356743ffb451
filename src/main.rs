//! route-watchdog - liveness watchdog for in-process message routes
//!
//! Hosts the configured routes in a local runtime, attaches the enabled
//! restart policies to each of them and runs until Ctrl+C or an unrecoverable
//! restart failure.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: inactivity policy on "TestRoute", 5 demo messages then silence
//! cargo run --release
//!
//! # Explicit config file
//! ./route-watchdog --config ./watchdog.toml
//!
//! # Keep the route busy forever (no inactivity restarts expected)
//! ./route-watchdog --feed-messages 4294967295 --feed-interval-ms 1000
//! ```
//!
//! # Environment Variables
//!
//! - `ROUTE_WATCHDOG_CONFIG`: Path to the TOML config (when `--config` is not given)
//! - `RUST_LOG`: Logging level (default: info)
//!
//! # Exit Status
//!
//! `1` when a route could not be stopped or started during a restart. The
//! process is expected to run under a supervisor that restarts it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use route_watchdog::config::{HostConfig, WatchdogConfig};
use route_watchdog::{
    escalation_channel, Escalation, InactivityRestartPolicy, InactivityStrategy, LocalRouteRuntime,
    RouteEndpoint, RoutePolicy, Supervisor, Unconditional, UnconditionalRestartPolicy,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "route-watchdog")]
#[command(about = "Restarts message routes periodically or when they go silent")]
#[command(version)]
struct CliArgs {
    /// Path to a TOML config file. Skips the normal search order; a file that
    /// fails to load is fatal.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Override host.feed_interval_ms
    #[arg(long, value_name = "MS")]
    feed_interval_ms: Option<u64>,

    /// Override host.feed_messages (0 disables the demo producer)
    #[arg(long, value_name = "COUNT")]
    feed_messages: Option<u32>,
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_config(args: &CliArgs) -> Result<WatchdogConfig> {
    let config = match &args.config {
        Some(path) => WatchdogConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => WatchdogConfig::load(),
    }
    .with_feed_overrides(args.feed_interval_ms, args.feed_messages);

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// One instance of each enabled policy, shared by every hosted route.
fn build_policies(config: &WatchdogConfig, escalation: &Escalation) -> Vec<Arc<dyn RoutePolicy>> {
    let mut policies: Vec<Arc<dyn RoutePolicy>> = Vec::new();
    let stop_timeout = config.restart.stop_timeout();

    if config.unconditional.enabled {
        info!(interval_ms = config.unconditional.interval_ms, "Unconditional restart policy enabled");
        policies.push(Arc::new(UnconditionalRestartPolicy::new(
            Unconditional::from_config(&config.unconditional),
            stop_timeout,
            escalation.clone(),
        )));
    }
    if config.inactivity.enabled {
        info!(
            check_interval_ms = config.inactivity.check_interval_ms,
            inactivity_timeout_ms = config.inactivity.inactivity_timeout_ms,
            "Inactivity restart policy enabled"
        );
        policies.push(Arc::new(InactivityRestartPolicy::new(
            InactivityStrategy::from_config(&config.inactivity),
            stop_timeout,
            escalation.clone(),
        )));
    }

    policies
}

/// Demo producers: `feed_messages` messages per route, then silence.
fn spawn_producers(endpoints: &[RouteEndpoint], host: &HostConfig, cancel: &CancellationToken) -> JoinSet<()> {
    let mut producers = JoinSet::new();
    if host.feed_messages == 0 {
        info!("Demo producer disabled");
        return producers;
    }

    for endpoint in endpoints {
        let endpoint = endpoint.clone();
        let cancel = cancel.clone();
        let interval = host.feed_interval();
        let count = host.feed_messages;

        producers.spawn(async move {
            info!(route = %endpoint.route(), count, "[Producer] Task starting");
            for n in 1..=count {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(interval) => {}
                }
                if let Err(e) = endpoint.send(format!("message {n}")).await {
                    warn!(route = %endpoint.route(), error = %e, "[Producer] Send failed, stopping");
                    return;
                }
            }
            info!(route = %endpoint.route(), "[Producer] Done, route goes quiet");
        });
    }

    producers
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.json_logs);

    let config = load_config(&args)?;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  route-watchdog");
    info!("  Routes: {}", config.host.routes.join(", "));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let (escalation, fatal_rx) = escalation_channel();
    let policies = build_policies(&config, &escalation);
    drop(escalation);

    let runtime = LocalRouteRuntime::new();
    let mut endpoints = Vec::with_capacity(config.host.routes.len());
    for id in &config.host.routes {
        let endpoint = runtime
            .add_route(id.as_str(), policies.clone())
            .with_context(|| format!("Failed to add route {id}"))?;
        endpoints.push(endpoint);
    }

    runtime.start_all().await.context("Failed to start routes")?;
    for policy in &policies {
        policy
            .start()
            .with_context(|| format!("Failed to start policy {}", policy.name()))?;
    }

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let mut producers = spawn_producers(&endpoints, &config.host, &cancel_token);

    let outcome = Supervisor::new(policies, fatal_rx).run(cancel_token.clone()).await;

    cancel_token.cancel();
    producers.shutdown().await;
    runtime.shutdown(config.restart.stop_timeout()).await;

    match outcome {
        Ok(reason) => {
            info!(?reason, "✓ route-watchdog shutdown complete");
            Ok(())
        }
        Err(failure) => {
            error!("route-watchdog exiting after an unrecoverable restart failure");
            Err(anyhow::Error::new(failure).context("Unrecoverable route restart failure"))
        }
    }
}
