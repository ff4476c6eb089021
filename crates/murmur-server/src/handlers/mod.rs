//! Client action handlers.
//!
//! Each handler takes the shared [`Services`], the caller's
//! [`ConnectionContext`] and a decoded payload, performs its store and
//! collaborator calls, and returns the ordered [`Effect`]s the relay must
//! apply. Handlers never write to sockets themselves.

pub mod connections;
pub mod messages;
pub mod notifications;
pub mod reactions;
pub mod rooms;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use murmur_shared::{ServerAction, UserId, UserStatus};
use murmur_store::{SessionRecord, SessionStore, StoreError};

use crate::collaborators::Collaborators;
use crate::context::ConnectionContext;
use crate::dispatch::Effect;
use crate::fanout::{self, Presence};
use crate::throttle::NotificationThrottle;

/// Shared dependencies of every handler.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn SessionStore>,
    pub collaborators: Arc<dyn Collaborators>,
    pub throttle: NotificationThrottle,
    pub session_ttl: Duration,
    pub app_name: String,
}

impl Services {
    pub fn new(
        store: Arc<dyn SessionStore>,
        collaborators: Arc<dyn Collaborators>,
        session_ttl: Duration,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            throttle: NotificationThrottle::new(store.clone()),
            store,
            collaborators,
            session_ttl,
            app_name: app_name.into(),
        }
    }

    /// The user's session when one of their sockets is connected. A session
    /// left `away` by a dropped socket counts as offline.
    pub async fn live_session(&self, user: &UserId) -> Result<Option<SessionRecord>, StoreError> {
        let session = self.store.get_by_user(user).await?;
        Ok(session.filter(|s| s.status == UserStatus::Active))
    }
}

/// Tell every online contact of `user` about a presence change.
///
/// Contacts come from the users service; only those with a live session
/// are addressed. Failures are logged and yield no effects.
pub async fn notify_connections(
    services: &Services,
    ctx: &ConnectionContext,
    user: &UserId,
    action: ServerAction,
    presence: &Presence,
) -> Vec<Effect> {
    let contacts = match services
        .collaborators
        .list_connected_user_ids(&ctx.request_context(), user)
        .await
    {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, user = %user, "Could not load user connections");
            return Vec::new();
        }
    };
    if contacts.is_empty() {
        return Vec::new();
    }

    let online = match services.store.get_many_by_user(&contacts).await {
        Ok(sessions) => sessions,
        Err(e) => {
            warn!(error = %e, user = %user, "Could not resolve online connections");
            return Vec::new();
        }
    };

    online
        .into_iter()
        .filter(|session| &session.id != user && session.status == UserStatus::Active)
        .map(|session| Effect::to_connection(session.socket_id, fanout::payload(action, presence)))
        .collect()
}
