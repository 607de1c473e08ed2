//! Tandem Player - headless session runner.
//!
//! Joins the world session named by `TANDEM_WORLD_ID` and logs every
//! coordination event until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tandem_player::application::events;
use tandem_player::infrastructure::websocket::WsConnector;
use tandem_player::{Connector, Coordinator, CoordinatorConfig};
use tandem_protocol::ChannelKind;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const LOGGED_EVENTS: &[&str] = &[
    events::WORLD_READY,
    events::WORLD_DISCONNECTED,
    events::INITIALIZATION_FAILED,
    events::ACTIVITY_CONNECTED,
    events::ACTIVITY_CONNECTION_FAILED,
    events::ACTIVITY_CONFLICT,
    events::ACTIVITY_DISCONNECTED,
    events::ACTIVITY_LEFT,
    events::SEND_QUEUED,
    events::SEND_REJECTED,
    events::SEND_FAILED,
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Prefer local overrides.
    for filename in [".env.local", ".env"] {
        let _ = dotenvy::from_filename(filename);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem_player=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Tandem Player");

    let server_url =
        std::env::var("TANDEM_SERVER_URL").unwrap_or_else(|_| "ws://localhost:3000/ws".into());
    let world_id = std::env::var("TANDEM_WORLD_ID").context("TANDEM_WORLD_ID must be set")?;
    let config = CoordinatorConfig::from_env();
    tracing::debug!(?config, "Coordinator configuration");

    let connector = Arc::new(
        WsConnector::new(&server_url)
            .with_context(|| format!("invalid TANDEM_SERVER_URL: {server_url}"))?,
    );
    let mut coordinator = Coordinator::new(config, connector.clone());

    for name in LOGGED_EVENTS {
        coordinator.on(*name, |event| {
            tracing::info!(event = %event.name, payload = %event.payload, "Coordination event");
            Ok(())
        });
    }

    tracing::info!(world_id = %world_id, url = %server_url, "Joining world");
    let transport = connector.join(ChannelKind::World, &world_id).await?;
    coordinator.initialize(transport).await?;
    tracing::info!("World ready, press Ctrl+C to leave");

    loop {
        tokio::select! {
            _ = coordinator.step() => {
                if coordinator.status().world.is_none() {
                    tracing::warn!("World channel closed");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                coordinator.disconnect_world();
                // Give the spawned leave a moment to report back.
                let _ = tokio::time::timeout(SHUTDOWN_GRACE, coordinator.step()).await;
                break;
            }
        }
    }

    Ok(())
}
