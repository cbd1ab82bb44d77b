//! Pollcast notifier binary entrypoint.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use pollcast_common::config::AppConfig;
use pollcast_common::queue::RedisQueue;
use pollcast_farcaster::neynar::NeynarClient;
use pollcast_notifier::dispatcher::{Dispatcher, DispatcherConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("pollcast_notifier=info,pollcast_farcaster=info,pollcast_common=info")
        }))
        .json()
        .init();

    tracing::info!("Pollcast notifier starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to the notification queue
    let queue = RedisQueue::connect(&config.redis_url).await?;

    // Build the Farcaster client and bind it to the bot account
    let mut client = NeynarClient::from_config(&config)?;
    client
        .configure(config.bot_fid, config.bot_signer_uuid.clone())
        .await?;

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(queue),
        Arc::new(client),
        DispatcherConfig::from_config(&config),
    ));
    let handle = dispatcher.start();

    // Run until Ctrl+C; an in-flight cycle is allowed to finish
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, stopping gracefully...");
    handle.stop().await;

    tracing::info!("Pollcast notifier stopped.");
    Ok(())
}
