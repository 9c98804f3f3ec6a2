//! # Twitch Relay Service
//!
//! Binary entry point for the relay.
//!
//! This executable:
//! - Loads configuration from files, the command line and environment
//! - Initializes logging
//! - Wires the subscriber registry, fan-out dispatcher and identity client
//! - Runs the webhook listener and the subscriber listener until SIGINT/SIGTERM

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use twitch_relay_api::{
    shutdown_signal, start_server, start_subscriber_server, AppState, RelayMetrics, ServiceConfig,
    ServiceError,
};
use twitch_relay_core::dispatcher::FanoutDispatcher;
use twitch_relay_core::identity::TwitchIdentityClient;
use twitch_relay_core::registry::ConnectionRegistry;

const DEFAULT_LOG_FILTER: &str =
    "twitch_relay_service=info,twitch_relay_api=info,twitch_relay_core=info,tower_http=debug";

/// Set to `json` for JSON log lines.
const LOG_FORMAT_ENV: &str = "RELAY_LOG_FORMAT";

#[derive(Debug, Parser)]
#[command(name = "twitch-relay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Relays Twitch EventSub notifications to WebSocket subscribers")]
struct Args {
    /// Configuration file, applied over the default locations
    #[arg(short, long, env = "RELAY_CONFIG_FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(std::env::var(LOG_FORMAT_ENV).ok().as_deref());

    info!("Starting Twitch relay");

    let config = match ServiceConfig::load(args.config.as_deref())
        .and_then(|config| config.validate().map(|()| config))
    {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Service configuration is invalid; aborting");
            std::process::exit(ServiceError::from(e).exit_code());
        }
    };

    if let Err(e) = run(config).await {
        error!(error = %e, "Relay stopped with an error");
        std::process::exit(e.exit_code());
    }

    info!("Twitch relay stopped");
    Ok(())
}

/// Wire the components and serve both listeners until shutdown.
async fn run(config: ServiceConfig) -> Result<(), ServiceError> {
    let subscriber_addr = config.subscriber_addr()?;
    let subscriber_tls = config.subscribers.tls.clone();
    let grace = config.shutdown_timeout();

    let state = match build_state(config) {
        Ok(state) => state,
        Err(e) => {
            return Err(ServiceError::ServerFailed {
                message: format!("{:#}", e),
            })
        }
    };
    let gateway_state = state.gateway_state();

    // Both listeners stop on the same signal; the subscriber listener gets
    // `grace` to close its connections.
    let handle = axum_server::Handle::new();
    let shutdown = {
        let handle = handle.clone();
        async move {
            shutdown_signal().await;
            handle.graceful_shutdown(Some(grace));
        }
    };

    tokio::try_join!(
        start_server(state, shutdown),
        start_subscriber_server(
            subscriber_addr,
            subscriber_tls.as_ref(),
            gateway_state,
            handle
        ),
    )?;

    Ok(())
}

fn build_state(config: ServiceConfig) -> anyhow::Result<AppState> {
    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Arc::new(FanoutDispatcher::new(
        registry,
        config.webhooks.forwarded_subscription_types.iter().cloned(),
    ));
    info!(
        forwarded = ?config.webhooks.forwarded_subscription_types,
        "Configured forwarded subscription types"
    );

    let identity = TwitchIdentityClient::new(config.oauth.identity_client_config())
        .context("Failed to create the identity client")?;
    let metrics = RelayMetrics::new().context("Failed to register metrics")?;

    Ok(AppState::new(config, dispatcher, Arc::new(identity), metrics))
}

fn init_tracing(log_format: Option<&str>) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    if wants_json_logs(log_format) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn wants_json_logs(log_format: Option<&str>) -> bool {
    log_format.is_some_and(|format| format.trim().eq_ignore_ascii_case("json"))
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
