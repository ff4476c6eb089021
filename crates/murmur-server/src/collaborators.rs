//! REST collaborators: the users and messages services.
//!
//! The relay never stores messages, notifications or user connections
//! itself. It forwards them to the owning service with the caller's bearer
//! token and request headers, and only relays the results to sockets.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use murmur_shared::protocol::{ConnectionUpdate, NotificationUpdate, RequestStatus};
use murmur_shared::UserId;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} responded {status}")]
    Status { service: &'static str, status: u16 },
}

/// Identity and client headers forwarded on every call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    pub token: Option<String>,
    pub user_id: UserId,
    pub locale: String,
    pub brand_variation: Option<String>,
    pub platform: Option<String>,
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewForumMessage {
    pub forum_id: String,
    pub message: String,
    pub from_user_id: UserId,
    pub is_unread: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDirectMessage {
    pub message: String,
    pub to_user_id: UserId,
    pub from_user_id: UserId,
    pub is_unread: bool,
}

/// What the messages service returns for a stored message.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedMessage {
    pub id: Option<Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl PersistedMessage {
    /// Message id as a string, whatever its JSON type.
    pub fn id_string(&self) -> Option<String> {
        match &self.id {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    NewDmReceived,
    NewLikeReceived,
    NewSuperLikeReceived,
    ConnectionRequestAccepted,
}

impl NotificationKind {
    pub fn locale_key(&self) -> &'static str {
        match self {
            Self::NewDmReceived => "notifications.newDmReceived",
            Self::NewLikeReceived => "notifications.newLikeReceived",
            Self::NewSuperLikeReceived => "notifications.newSuperLikeReceived",
            Self::ConnectionRequestAccepted => "notifications.connectionRequestAccepted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub association_id: Option<Value>,
    pub is_unread: bool,
    pub message_locale_key: &'static str,
    pub message_params: Value,
    pub should_send_push_notification: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_user_name: Option<String>,
}

impl NewNotification {
    pub fn new(user_id: UserId, kind: NotificationKind, message_params: Value) -> Self {
        Self {
            user_id,
            kind,
            association_id: None,
            is_unread: true,
            message_locale_key: kind.locale_key(),
            message_params,
            should_send_push_notification: false,
            from_user_name: None,
        }
    }

    pub fn with_push(mut self, from_user_name: impl Into<String>) -> Self {
        self.should_send_push_notification = true;
        self.from_user_name = Some(from_user_name.into());
        self
    }

    pub fn associated_with(mut self, id: Value) -> Self {
        self.association_id = Some(id);
        self
    }
}

/// A user connection as returned by the users service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserConnection {
    pub id: Option<Value>,
    pub requesting_user_id: UserId,
    pub accepting_user_id: UserId,
    pub request_status: Option<RequestStatus>,
    pub is_connection_broken: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupNotice {
    pub group_id: String,
    pub group_name: String,
    pub excluded_members: Vec<UserId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ConnectedUsers {
    user_ids: Vec<UserId>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Collaborators: Send + Sync {
    async fn create_forum_message(
        &self,
        ctx: &RequestContext,
        message: &NewForumMessage,
    ) -> Result<PersistedMessage, CollaboratorError>;

    async fn create_direct_message(
        &self,
        ctx: &RequestContext,
        message: &NewDirectMessage,
    ) -> Result<PersistedMessage, CollaboratorError>;

    /// Returns the stored notification.
    async fn create_notification(
        &self,
        ctx: &RequestContext,
        notification: &NewNotification,
    ) -> Result<Value, CollaboratorError>;

    async fn update_notification(
        &self,
        ctx: &RequestContext,
        update: &NotificationUpdate,
    ) -> Result<Value, CollaboratorError>;

    async fn update_user_connection(
        &self,
        ctx: &RequestContext,
        update: &ConnectionUpdate,
    ) -> Result<UserConnection, CollaboratorError>;

    async fn notify_group_members(
        &self,
        ctx: &RequestContext,
        notice: &GroupNotice,
    ) -> Result<(), CollaboratorError>;

    /// Ids of the users `user` is connected with.
    async fn list_connected_user_ids(
        &self,
        ctx: &RequestContext,
        user: &UserId,
    ) -> Result<Vec<UserId>, CollaboratorError>;
}

// ---------------------------------------------------------------------------
// REST implementation
// ---------------------------------------------------------------------------

pub struct RestCollaborators {
    client: Client,
    users_url: String,
    messages_url: String,
}

impl RestCollaborators {
    pub fn new(
        users_url: impl Into<String>,
        messages_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            users_url: users_url.into(),
            messages_url: messages_url.into(),
        })
    }

    fn request(&self, ctx: &RequestContext, method: Method, url: String) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, url)
            .header("x-userid", ctx.user_id.as_str())
            .header("x-localecode", &ctx.locale);

        if let Some(token) = &ctx.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(brand) = &ctx.brand_variation {
            builder = builder.header("x-brand-variation", brand);
        }
        if let Some(platform) = &ctx.platform {
            builder = builder.header("x-platform", platform);
        }
        builder
    }

    async fn send<T: DeserializeOwned>(
        service: &'static str,
        builder: RequestBuilder,
    ) -> Result<T, CollaboratorError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::Status {
                service,
                status: status.as_u16(),
            });
        }
        debug!(service, status = status.as_u16(), "Collaborator call succeeded");
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl Collaborators for RestCollaborators {
    async fn create_forum_message(
        &self,
        ctx: &RequestContext,
        message: &NewForumMessage,
    ) -> Result<PersistedMessage, CollaboratorError> {
        let url = format!("{}/forums-messages", self.messages_url);
        Self::send("messages", self.request(ctx, Method::POST, url).json(message)).await
    }

    async fn create_direct_message(
        &self,
        ctx: &RequestContext,
        message: &NewDirectMessage,
    ) -> Result<PersistedMessage, CollaboratorError> {
        let url = format!("{}/direct-messages", self.messages_url);
        Self::send("messages", self.request(ctx, Method::POST, url).json(message)).await
    }

    async fn create_notification(
        &self,
        ctx: &RequestContext,
        notification: &NewNotification,
    ) -> Result<Value, CollaboratorError> {
        let url = format!("{}/users/notifications", self.users_url);
        Self::send("users", self.request(ctx, Method::POST, url).json(notification)).await
    }

    async fn update_notification(
        &self,
        ctx: &RequestContext,
        update: &NotificationUpdate,
    ) -> Result<Value, CollaboratorError> {
        let url = format!("{}/users/notifications/{}", self.users_url, update.id);
        Self::send("users", self.request(ctx, Method::PUT, url).json(update)).await
    }

    async fn update_user_connection(
        &self,
        ctx: &RequestContext,
        update: &ConnectionUpdate,
    ) -> Result<UserConnection, CollaboratorError> {
        let url = format!("{}/users/connections", self.users_url);
        Self::send("users", self.request(ctx, Method::PUT, url).json(update)).await
    }

    async fn notify_group_members(
        &self,
        ctx: &RequestContext,
        notice: &GroupNotice,
    ) -> Result<(), CollaboratorError> {
        let url = format!("{}/users-groups/notify-members", self.users_url);
        let _: Value =
            Self::send("users", self.request(ctx, Method::POST, url).json(notice)).await?;
        Ok(())
    }

    async fn list_connected_user_ids(
        &self,
        ctx: &RequestContext,
        user: &UserId,
    ) -> Result<Vec<UserId>, CollaboratorError> {
        let url = format!("{}/users/connections", self.users_url);
        let builder = self
            .request(ctx, Method::GET, url)
            .query(&[("userId", user.as_str()), ("idsOnly", "true")]);
        let connected: ConnectedUsers = Self::send("users", builder).await?;
        Ok(connected.user_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_wire_shape() {
        let notification = NewNotification::new(
            UserId::new("u2"),
            NotificationKind::NewDmReceived,
            serde_json::json!({ "userId": "u1", "userName": "alice" }),
        )
        .with_push("alice");

        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["type"], "NEW_DM_RECEIVED");
        assert_eq!(json["messageLocaleKey"], "notifications.newDmReceived");
        assert_eq!(json["isUnread"], true);
        assert_eq!(json["shouldSendPushNotification"], true);
        assert_eq!(json["associationId"], Value::Null);
        assert_eq!(json["fromUserName"], "alice");
    }

    #[test]
    fn test_persisted_message_ids() {
        let numeric: PersistedMessage = serde_json::from_str(r#"{"id": 17}"#).unwrap();
        assert_eq!(numeric.id_string().as_deref(), Some("17"));

        let text: PersistedMessage =
            serde_json::from_str(r#"{"id": "abc", "createdAt": "2024-01-05T15:04:00Z"}"#).unwrap();
        assert_eq!(text.id_string().as_deref(), Some("abc"));
        assert!(text.created_at.is_some());

        let empty: PersistedMessage = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.id_string(), None);
    }

    #[test]
    fn test_user_connection_keeps_extra_fields() {
        let connection: UserConnection = serde_json::from_str(
            r#"{"id":"x","requestingUserId":"u1","acceptingUserId":"u2","requestStatus":"COMPLETE","interactionCount":3}"#,
        )
        .unwrap();
        assert_eq!(connection.request_status, Some(RequestStatus::Complete));
        assert!(!connection.is_connection_broken);
        assert_eq!(connection.extra["interactionCount"], 3);

        let json = serde_json::to_value(&connection).unwrap();
        assert_eq!(json["interactionCount"], 3);
        assert_eq!(json["acceptingUserId"], "u2");
    }
}
