//! What handlers ask the relay to do.
//!
//! Handlers never touch sockets. They return an ordered list of
//! [`Effect`]s and the relay applies them in order: room joins and leaves
//! on the local hub, emits to the origin socket directly and everything
//! else through the backplane. Group notices go last so the emits are
//! already queued while the users service answers.

use murmur_shared::{ConnectionId, Envelope, RoomId, Route};

use crate::collaborators::GroupNotice;

#[derive(Debug, Clone, PartialEq)]
pub enum Recipient {
    /// The socket whose frame is being handled.
    Origin,
    /// Anywhere in the fleet.
    Fleet(Route),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: Recipient,
    pub envelope: Envelope,
}

impl Outbound {
    pub fn origin(envelope: Envelope) -> Self {
        Self {
            to: Recipient::Origin,
            envelope,
        }
    }

    pub fn connection(id: ConnectionId, envelope: Envelope) -> Self {
        Self {
            to: Recipient::Fleet(Route::Connection { id }),
            envelope,
        }
    }

    pub fn room(room: RoomId, except: Option<ConnectionId>, envelope: Envelope) -> Self {
        Self {
            to: Recipient::Fleet(Route::Room { room, except }),
            envelope,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Emit(Outbound),
    JoinRoom(RoomId),
    LeaveRoom(RoomId),
    /// Push the current rooms list to every local socket.
    BroadcastRoomsList,
    /// Ask the users service to notify the members of a group.
    NotifyGroup(GroupNotice),
}

impl Effect {
    pub fn to_origin(envelope: Envelope) -> Self {
        Self::Emit(Outbound::origin(envelope))
    }

    pub fn to_connection(id: ConnectionId, envelope: Envelope) -> Self {
        Self::Emit(Outbound::connection(id, envelope))
    }

    pub fn to_room(room: RoomId, except: Option<ConnectionId>, envelope: Envelope) -> Self {
        Self::Emit(Outbound::room(room, except, envelope))
    }

    /// The envelope carried by an emit, if any.
    #[cfg(test)]
    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            Self::Emit(outbound) => Some(&outbound.envelope),
            _ => None,
        }
    }
}
