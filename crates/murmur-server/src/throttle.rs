//! Push-notification throttle.
//!
//! One marker per (class, recipient, sender) in the session store. While a
//! marker exists, notifications for that pair are suppressed. Markers are
//! not extended by suppressed attempts, so a steady stream of reactions
//! still yields one notification per window.
//!
//! Advisory only: two relays racing on the same pair may both send.

use std::sync::Arc;

use tracing::{debug, warn};

use murmur_store::{SessionStore, StoreKey, ThrottleKey};

#[derive(Clone)]
pub struct NotificationThrottle {
    store: Arc<dyn SessionStore>,
}

impl NotificationThrottle {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// `true` when a notification for `key` must not be sent. A store that
    /// cannot answer counts as throttled.
    pub async fn should_throttle(&self, key: &ThrottleKey) -> bool {
        match self.store.is_marked(&StoreKey::Throttle(key.clone())).await {
            Ok(marked) => marked,
            Err(e) => {
                warn!(
                    error = %e,
                    recipient = %key.recipient,
                    sender = %key.sender,
                    "Throttle check failed, suppressing notification"
                );
                true
            }
        }
    }

    pub async fn mark_sent(&self, key: &ThrottleKey) {
        let ttl = key.class.ttl();
        if let Err(e) = self
            .store
            .mark(&StoreKey::Throttle(key.clone()), ttl)
            .await
        {
            warn!(error = %e, recipient = %key.recipient, "Failed to set throttle marker");
        }
    }

    /// Check and mark in one step. Returns `true` when the caller may send.
    pub async fn try_acquire(&self, key: &ThrottleKey) -> bool {
        if self.should_throttle(key).await {
            debug!(
                recipient = %key.recipient,
                sender = %key.sender,
                class = ?key.class,
                "Notification throttled"
            );
            return false;
        }
        self.mark_sent(key).await;
        true
    }
}
