//! In-memory doubles and a relay harness shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use murmur_shared::protocol::{ConnectionUpdate, NotificationUpdate};
use murmur_shared::{ClientAction, ConnectionId, Envelope, ServerAction, UserId, UserStatus};
use murmur_store::{
    MemorySessionStore, Result as StoreResult, SessionRecord, SessionStore, StoreError, StoreKey,
};

use crate::auth::{Authenticator, Handshake, Identity};
use crate::backplane::LocalBackplane;
use crate::collaborators::{
    CollaboratorError, Collaborators, GroupNotice, NewDirectMessage, NewForumMessage,
    NewNotification, PersistedMessage, RequestContext, UserConnection,
};
use crate::context::ConnectionContext;
use crate::handlers::Services;
use crate::hub::Hub;
use crate::relay::Relay;

// ---------------------------------------------------------------------------
// Store that is always down
// ---------------------------------------------------------------------------

pub struct BrokenStore;

fn down<T>() -> StoreResult<T> {
    Err(StoreError::Unavailable("down".into()))
}

#[async_trait]
impl SessionStore for BrokenStore {
    async fn create(&self, _: &ConnectionId, _: Duration, _: SessionRecord) -> StoreResult<SessionRecord> {
        down()
    }
    async fn get(&self, _: &ConnectionId) -> StoreResult<Option<SessionRecord>> {
        down()
    }
    async fn get_by_user(&self, _: &UserId) -> StoreResult<Option<SessionRecord>> {
        down()
    }
    async fn get_many_by_user(&self, _: &[UserId]) -> StoreResult<Vec<SessionRecord>> {
        down()
    }
    async fn update_status(&self, _: &SessionRecord, _: UserStatus, _: Duration) -> StoreResult<()> {
        down()
    }
    async fn remove(&self, _: &ConnectionId) -> StoreResult<()> {
        down()
    }
    async fn mark(&self, _: &StoreKey, _: Duration) -> StoreResult<()> {
        down()
    }
    async fn is_marked(&self, _: &StoreKey) -> StoreResult<bool> {
        down()
    }
    async fn ping(&self) -> StoreResult<()> {
        down()
    }
}

// ---------------------------------------------------------------------------
// Collaborators that record every call
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ForumMessage(NewForumMessage),
    DirectMessage(NewDirectMessage),
    Notification(NewNotification),
    NotificationUpdate(NotificationUpdate),
    ConnectionUpdate(ConnectionUpdate),
    GroupNotice(GroupNotice),
}

#[derive(Default)]
pub struct RecordingCollaborators {
    calls: Mutex<Vec<Call>>,
    contacts: Mutex<HashMap<UserId, Vec<UserId>>>,
    pub fail_messages: AtomicBool,
    next_id: AtomicU64,
}

impl RecordingCollaborators {
    /// Make `a` and `b` contacts of each other.
    pub fn connect(&self, a: &str, b: &str) {
        let mut contacts = self.contacts.lock().unwrap();
        contacts.entry(UserId::new(a)).or_default().push(UserId::new(b));
        contacts.entry(UserId::new(b)).or_default().push(UserId::new(a));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<NewNotification> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Notification(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    pub fn direct_messages(&self) -> Vec<NewDirectMessage> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::DirectMessage(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) -> u64 {
        self.calls.lock().unwrap().push(call);
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn persisted(&self, id: u64) -> Result<PersistedMessage, CollaboratorError> {
        if self.fail_messages.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Status {
                service: "messages",
                status: 500,
            });
        }
        Ok(PersistedMessage {
            id: Some(json!(id)),
            created_at: None,
        })
    }
}

#[async_trait]
impl Collaborators for RecordingCollaborators {
    async fn create_forum_message(
        &self,
        _: &RequestContext,
        message: &NewForumMessage,
    ) -> Result<PersistedMessage, CollaboratorError> {
        let id = self.record(Call::ForumMessage(message.clone()));
        self.persisted(id)
    }

    async fn create_direct_message(
        &self,
        _: &RequestContext,
        message: &NewDirectMessage,
    ) -> Result<PersistedMessage, CollaboratorError> {
        let id = self.record(Call::DirectMessage(message.clone()));
        self.persisted(id)
    }

    async fn create_notification(
        &self,
        _: &RequestContext,
        notification: &NewNotification,
    ) -> Result<Value, CollaboratorError> {
        let id = self.record(Call::Notification(notification.clone()));
        let mut stored = serde_json::to_value(notification).unwrap_or_default();
        stored["id"] = json!(id);
        Ok(stored)
    }

    async fn update_notification(
        &self,
        _: &RequestContext,
        update: &NotificationUpdate,
    ) -> Result<Value, CollaboratorError> {
        self.record(Call::NotificationUpdate(update.clone()));
        Ok(serde_json::to_value(update).unwrap_or_default())
    }

    async fn update_user_connection(
        &self,
        ctx: &RequestContext,
        update: &ConnectionUpdate,
    ) -> Result<UserConnection, CollaboratorError> {
        self.record(Call::ConnectionUpdate(update.clone()));
        Ok(UserConnection {
            id: Some(json!("connection-1")),
            requesting_user_id: update.other_user_id.clone(),
            accepting_user_id: ctx.user_id.clone(),
            request_status: update.request_status,
            is_connection_broken: update.is_connection_broken.unwrap_or(false),
            ..Default::default()
        })
    }

    async fn notify_group_members(
        &self,
        _: &RequestContext,
        notice: &GroupNotice,
    ) -> Result<(), CollaboratorError> {
        self.record(Call::GroupNotice(notice.clone()));
        Ok(())
    }

    async fn list_connected_user_ids(
        &self,
        _: &RequestContext,
        user: &UserId,
    ) -> Result<Vec<UserId>, CollaboratorError> {
        Ok(self
            .contacts
            .lock()
            .unwrap()
            .get(user)
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Relay harness
// ---------------------------------------------------------------------------

pub const SESSION_TTL: Duration = Duration::from_secs(30 * 60);

pub fn identity(user: &str, name: &str) -> Identity {
    Identity {
        user_id: UserId::new(user),
        user_name: Some(name.to_string()),
        access_levels: Vec::new(),
        token: format!("token-{}", user),
    }
}

pub fn context(connection: &str, user: &str, name: &str) -> ConnectionContext {
    ConnectionContext::new(
        ConnectionId::from(connection),
        None,
        identity(user, name),
        Handshake::default(),
    )
}

pub struct TestClient {
    pub ctx: ConnectionContext,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl TestClient {
    /// Everything queued for this socket so far.
    pub fn drain(&mut self) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(envelope) = self.rx.try_recv() {
            out.push(envelope);
        }
        out
    }

    /// Queued envelopes of one action type.
    pub fn take(&mut self, action: ServerAction) -> Vec<Envelope> {
        self.drain()
            .into_iter()
            .filter(|envelope| envelope.action == action)
            .collect()
    }
}

pub struct TestRelay {
    pub relay: Relay,
    pub store: Arc<dyn SessionStore>,
    pub collaborators: Arc<RecordingCollaborators>,
}

impl TestRelay {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemorySessionStore::new()))
    }

    pub fn with_store(store: Arc<dyn SessionStore>) -> Self {
        let collaborators = Arc::new(RecordingCollaborators::default());
        let services = Services::new(store.clone(), collaborators.clone(), SESSION_TTL, "murmur");
        let hub = Hub::new();
        let backplane = Arc::new(LocalBackplane::new(hub.clone()));
        let relay = Relay::new(
            services,
            hub,
            backplane,
            Authenticator::new(crate::auth::tests::SECRET),
            "test-relay",
        );
        Self {
            relay,
            store,
            collaborators,
        }
    }

    pub async fn connect(&self, connection: &str, user: &str, name: &str) -> TestClient {
        let (ctx, rx) = self
            .relay
            .open(
                ConnectionId::from(connection),
                Some("127.0.0.1".into()),
                identity(user, name),
                Handshake::default(),
            )
            .await;
        TestClient { ctx, rx }
    }

    pub async fn send(&self, client: &mut TestClient, action: ClientAction) {
        self.relay.handle(&mut client.ctx, action).await;
    }

    pub async fn send_frame(&self, client: &mut TestClient, frame: &str) {
        self.relay.handle_frame(&mut client.ctx, frame).await;
    }

    /// Log `client` in as the user of its token.
    pub async fn login(&self, client: &mut TestClient) {
        let name = client.ctx.display_name("");
        let action = ClientAction::Login(murmur_shared::protocol::LoginRequest {
            id: client.ctx.user_id().clone(),
            user_name: name,
            ..Default::default()
        });
        self.send(client, action).await;
    }
}
