use serde_json::{json, Value};
use tracing::{debug, error};

use murmur_shared::protocol::{ContentReaction, ReactionRequest};
use murmur_shared::{ServerAction, UserId};
use murmur_store::ThrottleKey;

use crate::collaborators::{NewNotification, NotificationKind};
use crate::context::ConnectionContext;
use crate::dispatch::Effect;
use crate::error::RelayError;
use crate::fanout;

use super::Services;

/// A like worth notifying the content owner about.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ReactionNotice {
    pub owner: UserId,
    pub reactor: UserId,
    pub kind: NotificationKind,
    pub params: Value,
}

fn like_kind(reaction: &ContentReaction) -> Option<NotificationKind> {
    if reaction.user_has_super_liked {
        Some(NotificationKind::NewSuperLikeReceived)
    } else if reaction.user_has_liked {
        Some(NotificationKind::NewLikeReceived)
    } else {
        None
    }
}

/// A liked moment or space takes precedence over a liked thought.
/// Returns `None` for unlikes, missing owners and self-reactions.
pub(crate) fn classify(req: &ReactionRequest, fallback_reactor: &UserId) -> Option<ReactionNotice> {
    let reactor_of = |reaction: &ContentReaction| {
        if reaction.user_id.is_empty() {
            fallback_reactor.clone()
        } else {
            reaction.user_id.clone()
        }
    };

    // An area reaction that is not a like leaves room for a liked thought
    let area_like = req
        .moment_reaction
        .as_ref()
        .or(req.space_reaction.as_ref())
        .and_then(|reaction| like_kind(reaction).map(|kind| (reaction, kind)));

    let notice = if let Some((reaction, kind)) = area_like {
        let post_type = if req.moment_reaction.is_some() {
            "moments"
        } else {
            "spaces"
        };
        let reactor = reactor_of(reaction);
        let area_id = reaction.moment_id.clone().or_else(|| reaction.space_id.clone());
        ReactionNotice {
            owner: req.area_user_id.clone()?,
            params: json!({
                "areaId": area_id,
                "userName": req.reactor_user_name,
                "userId": reactor,
                "postType": post_type,
            }),
            reactor,
            kind,
        }
    } else {
        let reaction = req.thought_reaction.as_ref()?;
        let kind = like_kind(reaction)?;
        ReactionNotice {
            owner: req.thought_user_id.clone()?,
            reactor: reactor_of(reaction),
            kind,
            params: json!({
                "thoughtId": reaction.thought_id,
                "userName": req.reactor_user_name,
                "postType": "thoughts",
            }),
        }
    };

    if notice.owner.is_empty() || notice.owner == notice.reactor {
        return None;
    }
    Some(notice)
}

pub async fn send_reaction_notification(
    services: &Services,
    ctx: &ConnectionContext,
    req: ReactionRequest,
) -> Result<Vec<Effect>, RelayError> {
    let Some(notice) = classify(&req, ctx.user_id()) else {
        debug!(connection = %ctx.id.short(), "Reaction needs no notification");
        return Ok(Vec::new());
    };

    let key = ThrottleKey::reaction(notice.owner.clone(), notice.reactor.clone());
    if !services.throttle.try_acquire(&key).await {
        return Ok(Vec::new());
    }

    let from = ctx.display_name(&req.reactor_user_name);
    let notification =
        NewNotification::new(notice.owner.clone(), notice.kind, notice.params).with_push(from);

    let created = match services
        .collaborators
        .create_notification(&ctx.request_context(), &notification)
        .await
    {
        Ok(created) => created,
        Err(e) => {
            error!(error = %e, owner = %notice.owner, "Failed to create reaction notification");
            return Ok(Vec::new());
        }
    };

    let mut effects = Vec::new();
    if let Some(owner) = services.live_session(&notice.owner).await? {
        effects.push(Effect::to_connection(
            owner.socket_id,
            fanout::payload(ServerAction::NotificationCreated, &created),
        ));
    }
    Ok(effects)
}
