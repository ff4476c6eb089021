//! Forum and direct messages.
//!
//! Both paths persist through the messages service before anything is
//! echoed, so a message the sender sees is a message that was stored.

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info};

use murmur_shared::protocol::{DirectMessageRequest, ForumMessageRequest};
use murmur_shared::RoomId;
use murmur_store::ThrottleKey;

use crate::collaborators::{
    GroupNotice, NewDirectMessage, NewForumMessage, NewNotification, NotificationKind,
};
use crate::context::ConnectionContext;
use crate::dispatch::Effect;
use crate::error::RelayError;
use crate::fanout::{self, Audience, Posted, Speaker};

use super::Services;

pub async fn send_forum_message(
    services: &Services,
    ctx: &ConnectionContext,
    req: ForumMessageRequest,
) -> Result<Vec<Effect>, RelayError> {
    let room = RoomId::new(req.room_id.trim());
    if room.is_empty() {
        return Err(RelayError::BadRequest("roomId is required".into()));
    }
    if req.message.trim().is_empty() {
        return Err(RelayError::BadRequest("message is required".into()));
    }

    let request = ctx.request_context();
    let persisted = services
        .collaborators
        .create_forum_message(
            &request,
            &NewForumMessage {
                forum_id: room.to_string(),
                message: req.message.clone(),
                from_user_id: ctx.user_id().clone(),
                is_unread: false,
            },
        )
        .await?;

    let speaker = Speaker::new(ctx.display_name(&req.user_name), req.user_img_src);
    let posted = Posted {
        id: persisted.id_string(),
        text: req.message,
        at: persisted.created_at.unwrap_or_else(Utc::now),
    };

    let effects = vec![
        Effect::to_origin(fanout::forum_message(&room, &speaker, &posted, Audience::Sender)),
        Effect::to_room(
            room.clone(),
            Some(ctx.id.clone()),
            fanout::forum_message(&room, &speaker, &posted, Audience::Others),
        ),
        Effect::NotifyGroup(GroupNotice {
            group_id: room.to_string(),
            group_name: req.room_name,
            excluded_members: vec![ctx.user_id().clone()],
        }),
    ];

    debug!(connection = %ctx.id.short(), room = %room, "Forum message relayed");
    Ok(effects)
}

pub async fn send_direct_message(
    services: &Services,
    ctx: &ConnectionContext,
    req: DirectMessageRequest,
) -> Result<Vec<Effect>, RelayError> {
    let recipient_id = req.to.id.clone();
    if recipient_id.is_empty() {
        return Err(RelayError::BadRequest("to.id is required".into()));
    }
    if req.message.trim().is_empty() {
        return Err(RelayError::BadRequest("message is required".into()));
    }

    let sender_id = ctx.user_id().clone();
    let recipient = services.live_session(&recipient_id).await?;

    let request = ctx.request_context();
    let persisted = services
        .collaborators
        .create_direct_message(
            &request,
            &NewDirectMessage {
                message: req.message.clone(),
                to_user_id: recipient_id.clone(),
                from_user_id: sender_id.clone(),
                is_unread: recipient.is_none(),
            },
        )
        .await?;

    let speaker = Speaker::new(ctx.display_name(&req.user_name), req.user_img_src);
    let posted = Posted {
        id: persisted.id_string(),
        text: req.message,
        at: persisted.created_at.unwrap_or_else(Utc::now),
    };

    let mut effects = vec![Effect::to_origin(fanout::direct_message(
        &recipient_id,
        &speaker,
        &posted,
        Audience::Sender,
    ))];

    match recipient {
        Some(session) => {
            effects.push(Effect::to_connection(
                session.socket_id,
                fanout::direct_message(&sender_id, &speaker, &posted, Audience::Others),
            ));
        }
        None => {
            info!(to = %recipient_id, from = %sender_id, "Recipient offline, falling back to notification");
            let key = ThrottleKey::direct_message(recipient_id.clone(), sender_id.clone());
            if services.throttle.try_acquire(&key).await {
                let notification = NewNotification::new(
                    recipient_id.clone(),
                    NotificationKind::NewDmReceived,
                    json!({ "userId": sender_id, "userName": speaker.name }),
                )
                .with_push(speaker.name.clone());

                if let Err(e) = services
                    .collaborators
                    .create_notification(&request, &notification)
                    .await
                {
                    error!(error = %e, to = %recipient_id, "Failed to create direct message notification");
                }
            }
        }
    }

    Ok(effects)
}
