use chrono::{DateTime, Utc};
use tracing::info;

use murmur_shared::protocol::RoomRequest;
use murmur_shared::RoomId;

use crate::context::ConnectionContext;
use crate::dispatch::Effect;
use crate::error::RelayError;
use crate::fanout::Speaker;

fn requested_room(req: &RoomRequest) -> Result<RoomId, RelayError> {
    let room = RoomId::new(req.room_id.trim());
    if room.is_empty() {
        return Err(RelayError::BadRequest("roomId is required".into()));
    }
    Ok(room)
}

pub fn join_room(
    ctx: &mut ConnectionContext,
    req: RoomRequest,
    at: DateTime<Utc>,
) -> Result<Vec<Effect>, RelayError> {
    let room = requested_room(&req)?;
    let room_name = if req.room_name.trim().is_empty() {
        room.to_string()
    } else {
        req.room_name.clone()
    };
    let speaker = Speaker::new(ctx.display_name(&req.user_name), req.user_img_src);

    let mut effects = ctx
        .membership
        .join(&ctx.id, room.clone(), &room_name, &speaker, at);
    if !effects.is_empty() {
        info!(
            connection = %ctx.id.short(),
            user = %speaker.name,
            room = %room,
            "Joined room"
        );
        effects.push(Effect::BroadcastRoomsList);
    }
    Ok(effects)
}

pub fn exit_room(
    ctx: &mut ConnectionContext,
    req: RoomRequest,
    at: DateTime<Utc>,
) -> Result<Vec<Effect>, RelayError> {
    let room = requested_room(&req)?;
    let speaker = Speaker::new(ctx.display_name(&req.user_name), req.user_img_src);

    let mut effects = ctx.membership.leave(&ctx.id, &room, &speaker, at);
    if !effects.is_empty() {
        info!(connection = %ctx.id.short(), room = %room, "Left room");
        effects.push(Effect::BroadcastRoomsList);
    }
    Ok(effects)
}
