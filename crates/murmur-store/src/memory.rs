//! In-process session store.
//!
//! Mirrors the Redis key layout in a `HashMap` guarded by a tokio `RwLock`.
//! Expired entries are invisible to reads and physically dropped by
//! [`MemorySessionStore::purge_expired`], which the relay runs on an
//! interval.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use murmur_shared::{ConnectionId, UserId, UserStatus};

use crate::error::Result;
use crate::keys::StoreKey;
use crate::session::{SessionRecord, SessionStore};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn new(value: String, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Number of physically stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn live<'a>(entries: &'a HashMap<String, Entry>, key: &StoreKey) -> Option<&'a str> {
        let now = Instant::now();
        entries
            .get(&key.to_key_string())
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.as_str())
    }

    fn record_for(
        entries: &HashMap<String, Entry>,
        user: &UserId,
    ) -> Result<Option<SessionRecord>> {
        match Self::live(entries, &StoreKey::User(user.clone())) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(
        &self,
        connection: &ConnectionId,
        ttl: Duration,
        mut record: SessionRecord,
    ) -> Result<SessionRecord> {
        record.socket_id = connection.clone();
        let value = serde_json::to_string(&record)?;

        let mut entries = self.entries.write().await;
        if let Some(previous) = &record.previous_socket_id {
            entries.remove(&StoreKey::UserSocket(previous.clone()).to_key_string());
        }
        entries.insert(
            StoreKey::UserSocket(connection.clone()).to_key_string(),
            Entry::new(record.id.to_string(), ttl),
        );
        entries.insert(
            StoreKey::User(record.id.clone()).to_key_string(),
            Entry::new(value, ttl),
        );

        Ok(record)
    }

    async fn get(&self, connection: &ConnectionId) -> Result<Option<SessionRecord>> {
        let entries = self.entries.read().await;
        let Some(user) = Self::live(&entries, &StoreKey::UserSocket(connection.clone())) else {
            return Ok(None);
        };
        let record = Self::record_for(&entries, &UserId::new(user))?;
        // A stale socket index must not resolve to the user's newer socket
        Ok(record.filter(|r| &r.socket_id == connection))
    }

    async fn get_by_user(&self, user: &UserId) -> Result<Option<SessionRecord>> {
        let entries = self.entries.read().await;
        Self::record_for(&entries, user)
    }

    async fn get_many_by_user(&self, users: &[UserId]) -> Result<Vec<SessionRecord>> {
        let entries = self.entries.read().await;
        let mut found = Vec::new();
        for user in users {
            if let Some(record) = Self::record_for(&entries, user)? {
                found.push(record);
            }
        }
        Ok(found)
    }

    async fn update_status(
        &self,
        record: &SessionRecord,
        status: UserStatus,
        ttl: Duration,
    ) -> Result<()> {
        let updated = SessionRecord {
            status,
            ..record.clone()
        };
        let value = serde_json::to_string(&updated)?;
        self.entries.write().await.insert(
            StoreKey::User(record.id.clone()).to_key_string(),
            Entry::new(value, ttl),
        );
        Ok(())
    }

    async fn remove(&self, connection: &ConnectionId) -> Result<()> {
        let mut entries = self.entries.write().await;
        let socket_key = StoreKey::UserSocket(connection.clone());

        if let Some(user) = Self::live(&entries, &socket_key).map(UserId::new) {
            let owns_record = Self::record_for(&entries, &user)?
                .map(|record| &record.socket_id == connection)
                .unwrap_or(false);
            if owns_record {
                entries.remove(&StoreKey::User(user).to_key_string());
            }
        }
        entries.remove(&socket_key.to_key_string());
        Ok(())
    }

    async fn mark(&self, key: &StoreKey, ttl: Duration) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_key_string(), Entry::new("1".to_string(), ttl));
        Ok(())
    }

    async fn is_marked(&self, key: &StoreKey) -> Result<bool> {
        let entries = self.entries.read().await;
        Ok(Self::live(&entries, key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::ThrottleKey;

    const TTL: Duration = Duration::from_secs(1800);

    fn record(user: &str, name: &str) -> SessionRecord {
        SessionRecord::new(UserId::new(user), ConnectionId::from("unset"), name)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemorySessionStore::new();
        let c1 = ConnectionId::from("c1");

        let stored = store.create(&c1, TTL, record("u1", "alice")).await.unwrap();
        assert_eq!(stored.socket_id, c1);

        let fetched = store.get(&c1).await.unwrap().unwrap();
        assert_eq!(fetched.user_name, "alice");
        assert_eq!(
            store.get_by_user(&UserId::new("u1")).await.unwrap().unwrap().socket_id,
            c1
        );
    }

    #[tokio::test]
    async fn test_migration_drops_previous_socket() {
        let store = MemorySessionStore::new();
        let c1 = ConnectionId::from("c1");
        let c2 = ConnectionId::from("c2");

        store.create(&c1, TTL, record("u1", "alice")).await.unwrap();

        let mut moved = record("u1", "alice");
        moved.previous_socket_id = Some(c1.clone());
        let stored = store.create(&c2, TTL, moved).await.unwrap();

        assert_eq!(stored.socket_id, c2);
        assert_eq!(stored.previous_socket_id, Some(c1.clone()));
        assert!(store.get(&c1).await.unwrap().is_none());
        assert_eq!(
            store.get_by_user(&UserId::new("u1")).await.unwrap().unwrap().socket_id,
            c2
        );
    }

    #[tokio::test]
    async fn test_stale_socket_does_not_resolve() {
        let store = MemorySessionStore::new();
        let c1 = ConnectionId::from("c1");
        let c2 = ConnectionId::from("c2");

        store.create(&c1, TTL, record("u1", "alice")).await.unwrap();
        store.create(&c2, TTL, record("u1", "alice")).await.unwrap();

        assert!(store.get(&c1).await.unwrap().is_none());
        assert!(store.get(&c2).await.unwrap().is_some());

        // Removing the stale socket keeps the live session
        store.remove(&c1).await.unwrap();
        assert!(store.get(&c2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = MemorySessionStore::new();
        let c1 = ConnectionId::from("c1");
        store.create(&c1, TTL, record("u1", "alice")).await.unwrap();

        store.remove(&c1).await.unwrap();
        store.remove(&c1).await.unwrap();
        assert!(store.get(&c1).await.unwrap().is_none());
        assert!(store.get_by_user(&UserId::new("u1")).await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_many_skips_offline_users() {
        let store = MemorySessionStore::new();
        store
            .create(&ConnectionId::from("c1"), TTL, record("u1", "alice"))
            .await
            .unwrap();
        store
            .create(&ConnectionId::from("c3"), TTL, record("u3", "carol"))
            .await
            .unwrap();

        let users = [UserId::new("u1"), UserId::new("u2"), UserId::new("u3")];
        let found = store.get_many_by_user(&users).await.unwrap();
        let names: Vec<_> = found.iter().map(|r| r.user_name.as_str()).collect();
        assert_eq!(names, vec!["alice", "carol"]);
    }

    #[tokio::test]
    async fn test_update_status() {
        let store = MemorySessionStore::new();
        let c1 = ConnectionId::from("c1");
        let stored = store.create(&c1, TTL, record("u1", "alice")).await.unwrap();

        store
            .update_status(&stored, UserStatus::Away, TTL)
            .await
            .unwrap();
        let fetched = store.get(&c1).await.unwrap().unwrap();
        assert_eq!(fetched.status, UserStatus::Away);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_expire() {
        let store = MemorySessionStore::new();
        let c1 = ConnectionId::from("c1");
        store
            .create(&c1, Duration::from_secs(30), record("u1", "alice"))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(store.get(&c1).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get(&c1).await.unwrap().is_none());
        assert_eq!(store.len().await, 2);
        assert_eq!(store.purge_expired().await, 2);
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_markers_expire() {
        let store = MemorySessionStore::new();
        let key = StoreKey::from(ThrottleKey::reaction(UserId::new("a"), UserId::new("b")));

        assert!(!store.is_marked(&key).await.unwrap());
        store.mark(&key, Duration::from_secs(60)).await.unwrap();
        assert!(store.is_marked(&key).await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!store.is_marked(&key).await.unwrap());
    }
}
