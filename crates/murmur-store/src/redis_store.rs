//! Redis-backed session store shared by every relay in the fleet.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, warn};

use murmur_shared::{ConnectionId, UserId, UserStatus};

use crate::error::Result;
use crate::keys::StoreKey;
use crate::session::{ttl_secs, SessionRecord, SessionStore};

#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisSessionStore {
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, prefix))
    }

    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    fn key(&self, key: &StoreKey) -> String {
        format!("{}{}", self.prefix, key.to_key_string())
    }

    async fn read_record(&self, user: &UserId) -> Result<Option<SessionRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.key(&StoreKey::User(user.clone()))).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(
        &self,
        connection: &ConnectionId,
        ttl: Duration,
        mut record: SessionRecord,
    ) -> Result<SessionRecord> {
        record.socket_id = connection.clone();
        let value = serde_json::to_string(&record)?;
        let secs = ttl_secs(ttl);

        let mut pipe = redis::pipe();
        pipe.atomic();
        if let Some(previous) = &record.previous_socket_id {
            pipe.del(self.key(&StoreKey::UserSocket(previous.clone())))
                .ignore();
        }
        pipe.set_ex(
            self.key(&StoreKey::UserSocket(connection.clone())),
            record.id.as_str(),
            secs,
        )
        .ignore()
        .set_ex(self.key(&StoreKey::User(record.id.clone())), value, secs)
        .ignore();

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;

        debug!(user = %record.id, connection = %connection.short(), "Session stored");
        Ok(record)
    }

    async fn get(&self, connection: &ConnectionId) -> Result<Option<SessionRecord>> {
        let mut conn = self.conn.clone();
        let user: Option<String> = conn
            .get(self.key(&StoreKey::UserSocket(connection.clone())))
            .await?;
        let Some(user) = user else {
            return Ok(None);
        };

        let record = self.read_record(&UserId::new(user)).await?;
        Ok(record.filter(|r| &r.socket_id == connection))
    }

    async fn get_by_user(&self, user: &UserId) -> Result<Option<SessionRecord>> {
        self.read_record(user).await
    }

    async fn get_many_by_user(&self, users: &[UserId]) -> Result<Vec<SessionRecord>> {
        if users.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for user in users {
            pipe.get(self.key(&StoreKey::User(user.clone())));
        }

        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = pipe.query_async(&mut conn).await?;

        let mut found = Vec::with_capacity(values.len());
        for raw in values.into_iter().flatten() {
            match serde_json::from_str::<SessionRecord>(&raw) {
                Ok(record) => found.push(record),
                Err(e) => warn!(error = %e, "Skipping unreadable session record"),
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

        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(self.key(&StoreKey::User(record.id.clone())), value, ttl_secs(ttl))
            .await?;
        Ok(())
    }

    async fn remove(&self, connection: &ConnectionId) -> Result<()> {
        let socket_key = self.key(&StoreKey::UserSocket(connection.clone()));
        let mut conn = self.conn.clone();
        let user: Option<String> = conn.get(&socket_key).await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        if let Some(user) = user.map(UserId::new) {
            let owns_record = self
                .read_record(&user)
                .await?
                .map(|record| &record.socket_id == connection)
                .unwrap_or(false);
            if owns_record {
                pipe.del(self.key(&StoreKey::User(user))).ignore();
            }
        }
        pipe.del(&socket_key).ignore();

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn mark(&self, key: &StoreKey, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(self.key(key), 1, ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn is_marked(&self, key: &StoreKey) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(self.key(key)).await?;
        Ok(exists)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
