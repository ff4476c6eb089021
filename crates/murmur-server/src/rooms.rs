//! Per-connection room membership.
//!
//! A connection sits in at most one chat room. Joining another room leaves
//! the current one first, so the "left" events always precede the "joined"
//! events in the returned effects. Joining the room the connection is
//! already in is a no-op.
//!
//! The state machine is synchronous and does no I/O; the relay applies the
//! effects it returns.

use chrono::{DateTime, Utc};
use tracing::debug;

use murmur_shared::{ConnectionId, RoomId};

use crate::dispatch::Effect;
use crate::fanout::{self, Audience, Speaker};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RoomMembership {
    current: Option<RoomId>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&RoomId> {
        self.current.as_ref()
    }

    pub fn is_in(&self, room: &RoomId) -> bool {
        self.current.as_ref() == Some(room)
    }

    pub fn join(
        &mut self,
        origin: &ConnectionId,
        room: RoomId,
        room_name: &str,
        speaker: &Speaker,
        at: DateTime<Utc>,
    ) -> Vec<Effect> {
        if self.is_in(&room) {
            debug!(connection = %origin.short(), room = %room, "Already in room");
            return Vec::new();
        }

        let mut effects = Vec::new();
        if let Some(previous) = self.current.clone() {
            effects.extend(self.leave(origin, &previous, speaker, at));
        }

        effects.push(Effect::JoinRoom(room.clone()));
        effects.push(Effect::to_origin(fanout::joined_room(
            &room, room_name, speaker, at,
        )));
        effects.push(Effect::to_room(
            room.clone(),
            Some(origin.clone()),
            fanout::other_joined_room(&room, room_name, speaker, at),
        ));

        self.current = Some(room);
        effects
    }

    pub fn leave(
        &mut self,
        origin: &ConnectionId,
        room: &RoomId,
        speaker: &Speaker,
        at: DateTime<Utc>,
    ) -> Vec<Effect> {
        if !self.is_in(room) {
            return Vec::new();
        }
        self.current = None;

        vec![
            Effect::LeaveRoom(room.clone()),
            Effect::to_origin(fanout::left_room(room, speaker, Audience::Sender, at)),
            Effect::to_room(
                room.clone(),
                Some(origin.clone()),
                fanout::left_room(room, speaker, Audience::Others, at),
            ),
        ]
    }

    /// The socket is gone: tell the rest of the room, no self echo.
    pub fn leave_all_on_disconnect(
        &mut self,
        origin: &ConnectionId,
        speaker: &Speaker,
        at: DateTime<Utc>,
    ) -> Vec<Effect> {
        let Some(room) = self.current.take() else {
            return Vec::new();
        };

        vec![
            Effect::LeaveRoom(room.clone()),
            Effect::to_room(
                room.clone(),
                Some(origin.clone()),
                fanout::left_room(&room, speaker, Audience::Others, at),
            ),
        ]
    }
}
