//! Envelope builders.
//!
//! Every client-visible event is shaped here so the message key, the
//! formatted time and the sender display fields are consistent across
//! rooms, direct messages and account events. Builders are pure: the
//! caller passes the timestamp.

use chrono::{DateTime, Utc};
use serde::Serialize;

use murmur_shared::constants::SELF_LABEL;
use murmur_shared::protocol::{
    message_key, message_time, AccountEvent, Announcement, ChatMessage, DirectMessageEvent,
    ErrorEvent, LoginRequest, RoomEvent, RoomSummary,
};
use murmur_shared::{Envelope, RoomId, ServerAction, UserId, UserStatus};
use murmur_store::SessionRecord;

/// Display fields of whoever caused an event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Speaker {
    pub name: String,
    pub img_src: Option<String>,
}

impl Speaker {
    pub fn new(name: impl Into<String>, img_src: Option<String>) -> Self {
        Self {
            name: name.into(),
            img_src,
        }
    }
}

/// Whether the recipient is the sender itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Sender,
    Others,
}

impl Audience {
    fn label<'a>(&self, speaker: &'a Speaker) -> &'a str {
        match self {
            Audience::Sender => SELF_LABEL,
            Audience::Others => &speaker.name,
        }
    }
}

fn line(
    from: &str,
    speaker: &Speaker,
    text: String,
    at: DateTime<Utc>,
    is_announcement: bool,
) -> ChatMessage {
    ChatMessage {
        key: message_key(at),
        id: None,
        from_user_name: from.to_string(),
        from_user_img_src: speaker.img_src.clone(),
        time: message_time(at),
        text,
        is_announcement,
    }
}

// ---------------------------------------------------------------------------
// Room membership
// ---------------------------------------------------------------------------

pub fn joined_room(room: &RoomId, room_name: &str, speaker: &Speaker, at: DateTime<Utc>) -> Envelope {
    Envelope::new(
        ServerAction::JoinedRoom,
        &RoomEvent {
            room_id: room.clone(),
            message: line(
                SELF_LABEL,
                speaker,
                format!("You joined the room, {}", room_name),
                at,
                true,
            ),
            user_name: Some(speaker.name.clone()),
        },
    )
}

pub fn other_joined_room(
    room: &RoomId,
    room_name: &str,
    speaker: &Speaker,
    at: DateTime<Utc>,
) -> Envelope {
    Envelope::new(
        ServerAction::OtherJoinedRoom,
        &RoomEvent {
            room_id: room.clone(),
            message: line(
                &speaker.name,
                speaker,
                format!("{} joined the room, {}", speaker.name, room_name),
                at,
                true,
            ),
            user_name: None,
        },
    )
}

pub fn left_room(room: &RoomId, speaker: &Speaker, audience: Audience, at: DateTime<Utc>) -> Envelope {
    let text = match audience {
        Audience::Sender => format!("You left the room, {}", room),
        Audience::Others => format!("{} left the room", speaker.name),
    };

    Envelope::new(
        ServerAction::LeftRoom,
        &RoomEvent {
            room_id: room.clone(),
            message: line(audience.label(speaker), speaker, text, at, true),
            user_name: None,
        },
    )
}

pub fn rooms_list(rooms: &[RoomSummary]) -> Envelope {
    Envelope::new(ServerAction::SendRoomsList, &rooms)
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A chat line after the messages service accepted it.
#[derive(Debug, Clone, PartialEq)]
pub struct Posted {
    pub id: Option<String>,
    pub text: String,
    pub at: DateTime<Utc>,
}

pub fn forum_message(room: &RoomId, speaker: &Speaker, posted: &Posted, audience: Audience) -> Envelope {
    let mut message = line(
        audience.label(speaker),
        speaker,
        posted.text.clone(),
        posted.at,
        false,
    );
    message.id = posted.id.clone();

    Envelope::new(
        ServerAction::SendMessage,
        &RoomEvent {
            room_id: room.clone(),
            message,
            user_name: None,
        },
    )
}

/// `context` is the other party of the conversation from the recipient's
/// point of view.
pub fn direct_message(
    context: &UserId,
    speaker: &Speaker,
    posted: &Posted,
    audience: Audience,
) -> Envelope {
    let mut message = line(
        audience.label(speaker),
        speaker,
        posted.text.clone(),
        posted.at,
        false,
    );
    message.id = posted.id.clone();

    Envelope::new(
        ServerAction::SendDirectMessage,
        &DirectMessageEvent {
            context_user_id: context.clone(),
            message,
        },
    )
}

// ---------------------------------------------------------------------------
// Account / session
// ---------------------------------------------------------------------------

pub fn account_event(
    action: ServerAction,
    text: &str,
    user_name: Option<String>,
    at: DateTime<Utc>,
) -> Envelope {
    Envelope::new(
        action,
        &AccountEvent {
            message: Announcement {
                key: message_key(at),
                time: message_time(at),
                text: text.to_string(),
            },
            user_name,
        },
    )
}

pub fn login_success(user_name: Option<String>, at: DateTime<Utc>) -> Envelope {
    account_event(
        ServerAction::UserLoginSuccess,
        "You have been logged in successfully.",
        user_name,
        at,
    )
}

pub fn logout_success(user_name: Option<String>, at: DateTime<Utc>) -> Envelope {
    account_event(
        ServerAction::UserLogoutSuccess,
        "You have been logged out successfully.",
        user_name,
        at,
    )
}

/// A user as shown to the people they are connected with. Never carries
/// the bearer token.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub id: UserId,
    pub user_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub status: UserStatus,
}

impl Presence {
    pub fn from_login(login: &LoginRequest, status: UserStatus) -> Self {
        Self {
            id: login.id.clone(),
            user_name: login.user_name.clone(),
            first_name: login.first_name.clone(),
            last_name: login.last_name.clone(),
            status,
        }
    }
}

impl From<&SessionRecord> for Presence {
    fn from(record: &SessionRecord) -> Self {
        Self {
            id: record.id.clone(),
            user_name: record.user_name.clone(),
            first_name: record.first_name.clone(),
            last_name: record.last_name.clone(),
            status: record.status,
        }
    }
}

/// Any serializable payload under `action` (session records, notifications,
/// user connections).
pub fn payload<T: Serialize>(action: ServerAction, data: &T) -> Envelope {
    Envelope::new(action, data)
}

pub fn error(source: &str, message: impl Into<String>) -> Envelope {
    Envelope::new(
        ServerAction::Error,
        &ErrorEvent {
            source: source.to_string(),
            message: message.into(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 9, 30, 0).unwrap()
    }

    fn alice() -> Speaker {
        Speaker::new("alice", Some("https://img/alice.png".into()))
    }

    #[test]
    fn test_joined_room_shape() {
        let env = joined_room(&RoomId::new("general"), "General", &alice(), at());
        assert_eq!(env.action, ServerAction::JoinedRoom);
        assert_eq!(env.data["roomId"], "general");
        assert_eq!(env.data["userName"], "alice");
        assert_eq!(env.data["message"]["fromUserName"], "you");
        assert_eq!(env.data["message"]["text"], "You joined the room, General");
        assert_eq!(env.data["message"]["isAnnouncement"], true);
        assert_eq!(env.data["message"]["time"], "March 9/24, 9:30am");
        assert_eq!(env.data["message"]["key"], at().timestamp_millis().to_string());
    }

    #[test]
    fn test_other_joined_room_uses_real_name() {
        let env = other_joined_room(&RoomId::new("general"), "General", &alice(), at());
        assert_eq!(env.action, ServerAction::OtherJoinedRoom);
        assert_eq!(env.data["message"]["fromUserName"], "alice");
        assert_eq!(env.data["message"]["text"], "alice joined the room, General");
        assert!(env.data.get("userName").is_none());
    }

    #[test]
    fn test_left_room_texts() {
        let room = RoomId::new("general");
        let own = left_room(&room, &alice(), Audience::Sender, at());
        assert_eq!(own.data["message"]["text"], "You left the room, general");
        assert_eq!(own.data["message"]["fromUserName"], "you");

        let other = left_room(&room, &alice(), Audience::Others, at());
        assert_eq!(other.data["message"]["text"], "alice left the room");
        assert_eq!(other.data["message"]["fromUserName"], "alice");
    }

    #[test]
    fn test_message_labels() {
        let posted = Posted {
            id: Some("m1".into()),
            text: "hello".into(),
            at: at(),
        };
        let room = RoomId::new("general");
        let echo = forum_message(&room, &alice(), &posted, Audience::Sender);
        let other = forum_message(&room, &alice(), &posted, Audience::Others);
        assert_eq!(echo.data["message"]["fromUserName"], "you");
        assert_eq!(other.data["message"]["fromUserName"], "alice");
        assert_eq!(other.data["message"]["id"], "m1");
        assert!(other.data["message"].get("isAnnouncement").is_none());

        let dm = direct_message(&UserId::new("u2"), &alice(), &posted, Audience::Sender);
        assert_eq!(dm.action, ServerAction::SendDirectMessage);
        assert_eq!(dm.data["contextUserId"], "u2");
        assert_eq!(dm.data["message"]["text"], "hello");
    }

    #[test]
    fn test_account_events() {
        let env = login_success(Some("alice".into()), at());
        assert_eq!(env.action, ServerAction::UserLoginSuccess);
        assert_eq!(env.data["message"]["text"], "You have been logged in successfully.");
        assert_eq!(env.data["userName"], "alice");

        let env = logout_success(None, at());
        assert_eq!(env.data["message"]["text"], "You have been logged out successfully.");
        assert!(env.data.get("userName").is_none());
    }

    #[test]
    fn test_presence_has_no_token() {
        let mut record = SessionRecord::new(UserId::new("u1"), "c1".into(), "alice");
        record.id_token = Some("secret".into());
        record.status = UserStatus::Away;

        let env = payload(ServerAction::ActiveConnectionDisconnected, &Presence::from(&record));
        assert_eq!(env.data["id"], "u1");
        assert_eq!(env.data["status"], "away");
        assert!(env.data.get("idToken").is_none());
    }

    #[test]
    fn test_rooms_list_is_array() {
        let env = rooms_list(&[RoomSummary {
            room_key: RoomId::new("general"),
            number_of_users: 2,
        }]);
        assert_eq!(env.data[0]["roomKey"], "general");
        assert_eq!(env.data[0]["numberOfUsers"], 2);
    }
}
