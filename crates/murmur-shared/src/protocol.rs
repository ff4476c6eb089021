use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{ACTION_EVENT, MESSAGE_TIME_FORMAT};
use crate::error::ProtocolError;
use crate::types::{ConnectionId, RoomId, UserId, UserStatus};

// ---------------------------------------------------------------------------
// Outbound action types (relay -> client)
// ---------------------------------------------------------------------------

/// Discriminator of every envelope the relay sends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerAction {
    #[serde(rename = "SERVER:ACTIVE_CONNECTIONS_ADDED")]
    ActiveConnectionsAdded,
    #[serde(rename = "SERVER:ACTIVE_CONNECTIONS_LOADED")]
    ActiveConnectionsLoaded,
    #[serde(rename = "SERVER:ACTIVE_CONNECTION_DISCONNECTED")]
    ActiveConnectionDisconnected,
    #[serde(rename = "SERVER:ACTIVE_CONNECTION_LOGGED_IN")]
    ActiveConnectionLoggedIn,
    #[serde(rename = "SERVER:ACTIVE_CONNECTION_LOGGED_OUT")]
    ActiveConnectionLoggedOut,
    #[serde(rename = "SERVER:ACTIVE_CONNECTION_REFRESHED")]
    ActiveConnectionRefreshed,
    #[serde(rename = "SERVER:ERROR")]
    Error,
    #[serde(rename = "SERVER:JOINED_ROOM")]
    JoinedRoom,
    #[serde(rename = "SERVER:LEFT_ROOM")]
    LeftRoom,
    #[serde(rename = "SERVER:NOTIFICATION_CREATED")]
    NotificationCreated,
    #[serde(rename = "SERVER:NOTIFICATION_UPDATED")]
    NotificationUpdated,
    #[serde(rename = "SERVER:OTHER_JOINED_ROOM")]
    OtherJoinedRoom,
    #[serde(rename = "SERVER:SEND_DIRECT_MESSAGE")]
    SendDirectMessage,
    #[serde(rename = "SERVER:SEND_MESSAGE")]
    SendMessage,
    #[serde(rename = "SERVER:SEND_ROOMS_LIST")]
    SendRoomsList,
    #[serde(rename = "SERVER:SESSION_CLOSED")]
    SessionClosed,
    #[serde(rename = "SERVER:SESSION_CREATED")]
    SessionCreated,
    #[serde(rename = "SERVER:SESSION_UPDATED")]
    SessionUpdated,
    #[serde(rename = "SERVER:UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "SERVER:USER_CONNECTION_UPDATED")]
    UserConnectionUpdated,
    #[serde(rename = "SERVER:USER_LOGIN_SUCCESS")]
    UserLoginSuccess,
    #[serde(rename = "SERVER:USER_LOGOUT_SUCCESS")]
    UserLogoutSuccess,
}

/// The uniform wire unit: `{ "type": ..., "data": {...} }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub action: ServerAction,
    pub data: Value,
}

impl Envelope {
    pub fn new<T: Serialize>(action: ServerAction, data: &T) -> Self {
        Self {
            action,
            data: serde_json::to_value(data).unwrap_or_default(),
        }
    }

    pub fn empty(action: ServerAction) -> Self {
        Self {
            action,
            data: Value::Object(Map::new()),
        }
    }

    /// Encode as a transport frame: `["action", <envelope>]`
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(&(ACTION_EVENT, self))?)
    }

    /// Decode a transport frame produced by [`Envelope::encode`]
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let (event, envelope): (String, Envelope) = serde_json::from_str(frame)?;
        if event != ACTION_EVENT {
            return Err(ProtocolError::UnknownEvent(event));
        }
        Ok(envelope)
    }
}

/// A relay-originated dispatch as carried on the backplane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub route: crate::types::Route,
    pub envelope: Envelope,
}

// ---------------------------------------------------------------------------
// Envelope payloads
// ---------------------------------------------------------------------------

/// A chat line as rendered by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub from_user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_img_src: Option<String>,
    pub time: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_announcement: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEvent {
    pub room_id: RoomId,
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessageEvent {
    pub context_user_id: UserId,
    pub message: ChatMessage,
}

/// System line without a sender (login/logout confirmations)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub key: String,
    pub time: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountEvent {
    pub message: Announcement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_key: RoomId,
    pub number_of_users: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub source: String,
    pub message: String,
}

pub fn message_time(at: DateTime<Utc>) -> String {
    at.format(MESSAGE_TIME_FORMAT).to_string()
}

pub fn message_key(at: DateTime<Utc>) -> String {
    at.timestamp_millis().to_string()
}

// ---------------------------------------------------------------------------
// Inbound actions (client -> relay)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomRequest {
    pub room_id: String,
    pub room_name: String,
    pub user_id: UserId,
    pub user_name: String,
    pub user_img_src: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ForumMessageRequest {
    pub room_id: String,
    pub room_name: String,
    pub message: String,
    pub user_id: UserId,
    pub user_name: String,
    pub user_img_src: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectMessageTarget {
    pub id: UserId,
    /// Client's last known socket of the recipient. Advisory only; the
    /// relay always resolves the live socket from the session store.
    pub socket_id: Option<ConnectionId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectMessageRequest {
    pub message: String,
    pub to: DirectMessageTarget,
    pub user_id: UserId,
    pub user_name: String,
    pub user_img_src: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginRequest {
    pub id: UserId,
    pub id_token: String,
    pub user_name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub status: Option<UserStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionReference {
    pub id: Option<ConnectionId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketDetails {
    pub session: SessionReference,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionUpdateRequest {
    pub details: LoginRequest,
    pub socket_details: SocketDetails,
    pub is_authenticated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentReaction {
    pub user_id: UserId,
    pub moment_id: Option<String>,
    pub space_id: Option<String>,
    pub thought_id: Option<String>,
    pub user_has_liked: bool,
    pub user_has_super_liked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReactionRequest {
    pub moment_reaction: Option<ContentReaction>,
    pub space_reaction: Option<ContentReaction>,
    pub thought_reaction: Option<ContentReaction>,
    pub area_user_id: Option<UserId>,
    pub thought_user_id: Option<UserId>,
    pub reactor_user_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Complete,
    Denied,
}

/// The user acting on a connection request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActingUser {
    pub id: UserId,
    pub user_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewConnection {
    pub accepting_user_id: UserId,
    pub notification: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionCreatedRequest {
    pub connection: NewConnection,
    pub user: ActingUser,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionUpdate {
    pub interaction_count: Option<u32>,
    pub is_connection_broken: Option<bool>,
    pub other_user_id: UserId,
    pub request_status: Option<RequestStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConnectionRequest {
    pub connection: ConnectionUpdate,
    pub user: ActingUser,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionUser {
    pub id: UserId,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionPair {
    pub users: Vec<ConnectionUser>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadActiveConnectionsRequest {
    pub connections: Vec<ConnectionPair>,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationUpdate {
    pub id: String,
    pub is_unread: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateNotificationRequest {
    pub notification: NotificationUpdate,
    pub user_name: Option<String>,
}

/// Every action a client may send
#[derive(Debug, Clone, PartialEq)]
pub enum ClientAction {
    JoinRoom(RoomRequest),
    ExitRoom(RoomRequest),
    SendMessage(ForumMessageRequest),
    SendDirectMessage(DirectMessageRequest),
    Login(LoginRequest),
    UpdateSession(SessionUpdateRequest),
    Logout(LoginRequest),
    CreateOrUpdateReaction(ReactionRequest),
    CreateUserConnection(ConnectionCreatedRequest),
    UpdateUserConnection(UpdateConnectionRequest),
    LoadActiveConnections(LoadActiveConnectionsRequest),
    UpdateNotification(UpdateNotificationRequest),
}

/// Undecoded `{ "type": ..., "data": ... }` as sent by a client
#[derive(Debug, Clone, Deserialize)]
pub struct RawAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl ClientAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinRoom(_) => "CLIENT:JOIN_ROOM",
            Self::ExitRoom(_) => "CLIENT:EXIT_ROOM",
            Self::SendMessage(_) => "CLIENT:SEND_MESSAGE",
            Self::SendDirectMessage(_) => "CLIENT:SEND_DIRECT_MESSAGE",
            Self::Login(_) => "CLIENT:LOGIN",
            Self::UpdateSession(_) => "CLIENT:UPDATE_SESSION",
            Self::Logout(_) => "CLIENT:LOGOUT",
            Self::CreateOrUpdateReaction(_) => "CLIENT:CREATE_OR_UPDATE_REACTION",
            Self::CreateUserConnection(_) => "CLIENT:CREATE_USER_CONNECTION",
            Self::UpdateUserConnection(_) => "CLIENT:UPDATE_USER_CONNECTION",
            Self::LoadActiveConnections(_) => "CLIENT:LOAD_ACTIVE_CONNECTIONS",
            Self::UpdateNotification(_) => "CLIENT:UPDATE_NOTIFICATION",
        }
    }

    pub fn from_raw(raw: RawAction) -> Result<Self, ProtocolError> {
        let RawAction { kind, data } = raw;
        // Clients send `data: null` for payload-less actions
        let data = if data.is_null() {
            Value::Object(Map::new())
        } else {
            data
        };

        let action = match kind.as_str() {
            "CLIENT:JOIN_ROOM" => Self::JoinRoom(payload(&kind, data)?),
            "CLIENT:EXIT_ROOM" => Self::ExitRoom(payload(&kind, data)?),
            "CLIENT:SEND_MESSAGE" => Self::SendMessage(payload(&kind, data)?),
            "CLIENT:SEND_DIRECT_MESSAGE" => Self::SendDirectMessage(payload(&kind, data)?),
            "CLIENT:LOGIN" => Self::Login(payload(&kind, data)?),
            "CLIENT:UPDATE_SESSION" => Self::UpdateSession(payload(&kind, data)?),
            "CLIENT:LOGOUT" => Self::Logout(payload(&kind, data)?),
            "CLIENT:CREATE_OR_UPDATE_REACTION" => {
                Self::CreateOrUpdateReaction(payload(&kind, data)?)
            }
            "CLIENT:CREATE_USER_CONNECTION" => Self::CreateUserConnection(payload(&kind, data)?),
            "CLIENT:UPDATE_USER_CONNECTION" => Self::UpdateUserConnection(payload(&kind, data)?),
            "CLIENT:LOAD_ACTIVE_CONNECTIONS" => {
                Self::LoadActiveConnections(payload(&kind, data)?)
            }
            "CLIENT:UPDATE_NOTIFICATION" => Self::UpdateNotification(payload(&kind, data)?),
            _ => return Err(ProtocolError::UnknownAction(kind)),
        };

        Ok(action)
    }

    /// Decode a client transport frame: `["action", {"type": ..., "data": ...}]`
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let (event, raw): (String, RawAction) = serde_json::from_str(frame)?;
        if event != ACTION_EVENT {
            return Err(ProtocolError::UnknownEvent(event));
        }
        Self::from_raw(raw)
    }
}

fn payload<T: DeserializeOwned>(kind: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::Malformed {
        action: kind.to_string(),
        reason: e.to_string(),
    })
}
