//! # murmur-server
//!
//! Realtime presence and room-messaging relay.
//!
//! This binary provides:
//! - **WebSocket endpoint** (`/ws`) for authenticated clients exchanging
//!   `["action", {type, data}]` frames
//! - **Session store** in Redis (fleet) or memory (single relay) mapping
//!   live connections to users
//! - **Backplane** over Redis pub/sub so room and direct-message fan-out
//!   reaches sockets held by any relay of the fleet
//! - **Notification throttling** for push notifications sent on behalf of
//!   offline users
//! - **REST endpoints** for health checks and relay info

mod api;
mod auth;
mod backplane;
mod collaborators;
mod config;
mod context;
mod dispatch;
mod error;
mod fanout;
mod handlers;
mod hub;
mod relay;
mod rooms;
mod throttle;
mod ws;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use murmur_store::{MemorySessionStore, RedisSessionStore, SessionStore};

use crate::api::AppState;
use crate::auth::Authenticator;
use crate::backplane::{spawn_subscriber, Backplane, LocalBackplane, RedisBackplane};
use crate::collaborators::RestCollaborators;
use crate::config::RelayConfig;
use crate::handlers::Services;
use crate::hub::Hub;
use crate::relay::Relay;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,murmur_server=debug,murmur_store=debug")),
        )
        .init();

    info!("Starting murmur relay v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = RelayConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Session store and backplane
    // -----------------------------------------------------------------------
    let hub = Hub::new();

    let (store, backplane): (Arc<dyn SessionStore>, Arc<dyn Backplane>) =
        match &config.redis_url {
            Some(url) => {
                let store = RedisSessionStore::connect(url, config.redis_key_prefix.clone()).await?;

                let client = redis::Client::open(url.as_str())?;
                let channel = config.dispatch_channel();
                let backplane = RedisBackplane::connect(client.clone(), channel.clone()).await?;
                spawn_subscriber(client, channel.clone(), hub.clone());

                info!(channel = %channel, "Using Redis session store and backplane");
                let store: Arc<dyn SessionStore> = Arc::new(store);
                let backplane: Arc<dyn Backplane> = Arc::new(backplane);
                (store, backplane)
            }
            None => {
                let store = Arc::new(MemorySessionStore::new());

                // Expired sessions and throttle markers are dropped lazily on
                // read; sweep the rest periodically.
                let sweeper = store.clone();
                let every = config.store_purge_interval;
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(every);
                    loop {
                        interval.tick().await;
                        let purged = sweeper.purge_expired().await;
                        if purged > 0 {
                            tracing::debug!(purged, "Purged expired store entries");
                        }
                    }
                });

                info!("REDIS_URL not set, using in-memory session store and local backplane");
                let backplane: Arc<dyn Backplane> = Arc::new(LocalBackplane::new(hub.clone()));
                (store as Arc<dyn SessionStore>, backplane)
            }
        };

    // -----------------------------------------------------------------------
    // 4. Collaborators and relay
    // -----------------------------------------------------------------------
    let collaborators = Arc::new(RestCollaborators::new(
        config.users_service_url.clone(),
        config.messages_service_url.clone(),
        config.collaborator_timeout,
    )?);

    let services = Services::new(
        store,
        collaborators,
        config.session_ttl,
        config.app_name.clone(),
    );
    let relay = Relay::new(
        services,
        hub,
        backplane,
        Authenticator::new(&config.jwt_secret),
        config.instance_name.clone(),
    );

    let http_addr = config.http_addr;
    let app_state = AppState {
        relay: Arc::new(relay),
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 5. Run the HTTP/WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
