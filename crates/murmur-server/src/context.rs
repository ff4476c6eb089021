use murmur_shared::{ConnectionId, UserId};

use crate::auth::{Handshake, Identity};
use crate::collaborators::RequestContext;
use crate::rooms::RoomMembership;

/// Everything the relay knows about one live, authenticated socket.
///
/// Owned by the socket's reader task and passed to handlers explicitly.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub id: ConnectionId,
    pub ip: Option<String>,
    pub identity: Identity,
    pub handshake: Handshake,
    pub membership: RoomMembership,
}

impl ConnectionContext {
    pub fn new(id: ConnectionId, ip: Option<String>, identity: Identity, handshake: Handshake) -> Self {
        Self {
            id,
            ip,
            identity,
            handshake,
            membership: RoomMembership::new(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.identity.user_id
    }

    /// `requested` when set, otherwise the best name the handshake gave us.
    pub fn display_name(&self, requested: &str) -> String {
        if !requested.trim().is_empty() {
            return requested.to_string();
        }
        self.identity
            .user_name
            .clone()
            .or_else(|| self.handshake.user_name.clone())
            .unwrap_or_else(|| self.identity.user_id.to_string())
    }

    /// Headers forwarded to collaborators on behalf of this socket.
    pub fn request_context(&self) -> RequestContext {
        RequestContext {
            token: Some(self.identity.token.clone()),
            user_id: self.identity.user_id.clone(),
            locale: self.handshake.locale(),
            brand_variation: self.handshake.brand_variation.clone(),
            platform: self.handshake.platform.clone(),
        }
    }
}
