//! Cross-instance broadcast backplane.
//!
//! Anything addressed beyond the originating socket is published here as a
//! [`Dispatch`]. Every relay of the fleet receives every dispatch and
//! delivers it to the local sockets the route matches.
//!
//! - [`LocalBackplane`] hands dispatches straight to this process's hub
//!   (single relay, tests).
//! - [`RedisBackplane`] publishes JSON on one pub/sub channel;
//!   [`spawn_subscriber`] feeds the channel back into the local hub.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use murmur_shared::Dispatch;

use crate::hub::Hub;

#[derive(Debug, Error)]
pub enum BackplaneError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait Backplane: Send + Sync {
    async fn publish(&self, dispatch: &Dispatch) -> Result<(), BackplaneError>;

    /// Short name for logs and `/info`.
    fn kind(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// In-process
// ---------------------------------------------------------------------------

pub struct LocalBackplane {
    hub: Hub,
}

impl LocalBackplane {
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl Backplane for LocalBackplane {
    async fn publish(&self, dispatch: &Dispatch) -> Result<(), BackplaneError> {
        self.hub.deliver(dispatch).await;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}

// ---------------------------------------------------------------------------
// Redis pub/sub
// ---------------------------------------------------------------------------

pub struct RedisBackplane {
    conn: ConnectionManager,
    channel: String,
}

impl RedisBackplane {
    pub async fn connect(client: redis::Client, channel: impl Into<String>) -> Result<Self, BackplaneError> {
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            channel: channel.into(),
        })
    }
}

#[async_trait]
impl Backplane for RedisBackplane {
    async fn publish(&self, dispatch: &Dispatch) -> Result<(), BackplaneError> {
        let payload = serde_json::to_string(dispatch)?;
        let mut conn = self.conn.clone();
        let receivers: usize = conn.publish(&self.channel, payload).await?;
        debug!(
            channel = %self.channel,
            receivers,
            action = ?dispatch.envelope.action,
            "Dispatch published"
        );
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}

/// Subscribe to the dispatch channel and deliver every message to `hub`.
/// Reconnects with a fixed delay when the subscription drops.
pub fn spawn_subscriber(client: redis::Client, channel: String, hub: Hub) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match run_subscriber(&client, &channel, &hub).await {
                Ok(()) => warn!(channel = %channel, "Backplane subscription ended, reconnecting"),
                Err(e) => error!(error = %e, channel = %channel, "Backplane subscriber failed"),
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    })
}

async fn run_subscriber(
    client: &redis::Client,
    channel: &str,
    hub: &Hub,
) -> Result<(), BackplaneError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    info!(channel = %channel, "Subscribed to backplane");

    let mut messages = pubsub.on_message();
    while let Some(message) = messages.next().await {
        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Unreadable backplane payload");
                continue;
            }
        };

        match serde_json::from_str::<Dispatch>(&payload) {
            Ok(dispatch) => {
                hub.deliver(&dispatch).await;
            }
            Err(e) => warn!(error = %e, "Dropping malformed dispatch"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_shared::{ConnectionId, Envelope, Route, ServerAction};

    #[tokio::test]
    async fn test_local_backplane_delivers_to_hub() {
        let hub = Hub::new();
        let id = ConnectionId::from("a");
        let mut rx = hub.register(id.clone()).await;

        let backplane = LocalBackplane::new(hub.clone());
        backplane
            .publish(&Dispatch {
                route: Route::Connection { id },
                envelope: Envelope::empty(ServerAction::NotificationCreated),
            })
            .await
            .unwrap();

        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.action, ServerAction::NotificationCreated);
        assert_eq!(backplane.kind(), "local");
    }

    #[test]
    fn test_dispatch_wire_round_trip() {
        let dispatch = Dispatch {
            route: Route::Everyone { except: None },
            envelope: Envelope::empty(ServerAction::SendRoomsList),
        };
        let json = serde_json::to_string(&dispatch).unwrap();
        assert!(json.contains("SERVER:SEND_ROOMS_LIST"));
        assert_eq!(serde_json::from_str::<Dispatch>(&json).unwrap(), dispatch);
    }
}
