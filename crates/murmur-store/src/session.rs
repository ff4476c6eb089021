use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use murmur_shared::{ConnectionId, UserId, UserStatus};

use crate::error::Result;
use crate::keys::StoreKey;

/// What the fleet knows about one logged-in user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: UserId,
    pub socket_id: ConnectionId,
    #[serde(default)]
    pub previous_socket_id: Option<ConnectionId>,
    #[serde(default)]
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default)]
    pub status: UserStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
}

impl SessionRecord {
    pub fn new(id: UserId, socket_id: ConnectionId, user_name: impl Into<String>) -> Self {
        Self {
            id,
            socket_id,
            previous_socket_id: None,
            user_name: user_name.into(),
            first_name: None,
            last_name: None,
            id_token: None,
            status: UserStatus::Active,
            ip: None,
            app: None,
        }
    }

    /// Copy safe to hand to other users.
    pub fn without_token(&self) -> Self {
        Self {
            id_token: None,
            ..self.clone()
        }
    }
}

/// TTL key-value session storage shared by every relay instance.
///
/// Implementations never retry internally; a failing backend surfaces as
/// [`crate::StoreError`] and the caller decides what the client sees.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store `record` for `connection`, replacing any prior entry for the
    /// user. When `record.previous_socket_id` is set, the old connection key
    /// is dropped. Returns the record as stored.
    async fn create(
        &self,
        connection: &ConnectionId,
        ttl: Duration,
        record: SessionRecord,
    ) -> Result<SessionRecord>;

    async fn get(&self, connection: &ConnectionId) -> Result<Option<SessionRecord>>;

    async fn get_by_user(&self, user: &UserId) -> Result<Option<SessionRecord>>;

    /// Live sessions for `users`, missing ones skipped, input order kept.
    async fn get_many_by_user(&self, users: &[UserId]) -> Result<Vec<SessionRecord>>;

    /// Rewrite the user's record with a new status and TTL.
    async fn update_status(
        &self,
        record: &SessionRecord,
        status: UserStatus,
        ttl: Duration,
    ) -> Result<()>;

    /// Drop the session behind `connection`. Removing an unknown connection is a no-op.
    async fn remove(&self, connection: &ConnectionId) -> Result<()>;

    async fn mark(&self, key: &StoreKey, ttl: Duration) -> Result<()>;

    async fn is_marked(&self, key: &StoreKey) -> Result<bool>;

    /// Liveness check of the backend.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_wire_shape() {
        let mut record = SessionRecord::new(UserId::new("u1"), ConnectionId::from("c1"), "alice");
        record.id_token = Some("secret".into());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["socketId"], "c1");
        assert_eq!(json["previousSocketId"], serde_json::Value::Null);
        assert_eq!(json["status"], "active");
        assert_eq!(json["idToken"], "secret");

        let public = serde_json::to_value(record.without_token()).unwrap();
        assert!(public.get("idToken").is_none());
    }

    #[test]
    fn test_ttl_never_zero() {
        assert_eq!(ttl_secs(Duration::from_millis(10)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(1800)), 1800);
    }
}
