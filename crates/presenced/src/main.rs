use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod tracker;

use config::Config;
use dbus_interface::TrackerService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("presenced starting");

    let config = Config::from_env();
    let handle = tracker::spawn_tracker(&config)?;

    let _conn = zbus::connection::Builder::session()?
        .name("org.presence.Tracker1")?
        .serve_at("/org/presence/Tracker1", TrackerService::new(handle))?
        .build()
        .await?;

    tracing::info!("presenced ready on org.presence.Tracker1");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("presenced shutting down");

    Ok(())
}
