//! Sockets connected to this relay process.
//!
//! The hub owns the outbound queue of every local connection and the
//! physical room membership used to resolve room routes. It knows nothing
//! about other relays: fleet-wide delivery happens by every relay running
//! [`Hub::deliver`] on the same dispatch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use murmur_shared::protocol::RoomSummary;
use murmur_shared::{ConnectionId, Dispatch, Envelope, RoomId, Route};

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, mpsc::UnboundedSender<Envelope>>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

#[derive(Clone, Default)]
pub struct Hub {
    state: Arc<RwLock<HubState>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a local socket. The returned receiver feeds its writer task.
    pub async fn register(&self, id: ConnectionId) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.write().await;
        state.connections.insert(id.clone(), tx);
        info!(
            connection = %id.short(),
            connections = state.connections.len(),
            "Connection registered"
        );
        rx
    }

    /// Drop a socket and every room membership it still holds.
    pub async fn unregister(&self, id: &ConnectionId) {
        let mut state = self.state.write().await;
        state.connections.remove(id);
        state.rooms.retain(|_, members| {
            members.remove(id);
            !members.is_empty()
        });
        info!(
            connection = %id.short(),
            connections = state.connections.len(),
            "Connection unregistered"
        );
    }

    pub async fn join(&self, id: &ConnectionId, room: &RoomId) {
        let mut state = self.state.write().await;
        let members = state.rooms.entry(room.clone()).or_default();
        members.insert(id.clone());
        debug!(
            connection = %id.short(),
            room = %room,
            members = members.len(),
            "Joined room"
        );
    }

    pub async fn leave(&self, id: &ConnectionId, room: &RoomId) {
        let mut state = self.state.write().await;
        if let Some(members) = state.rooms.get_mut(room) {
            members.remove(id);
            if members.is_empty() {
                state.rooms.remove(room);
            }
        }
        debug!(connection = %id.short(), room = %room, "Left room");
    }

    /// Queue an envelope for one local socket. Returns `false` when the
    /// socket is not connected here.
    pub async fn send_to(&self, id: &ConnectionId, envelope: Envelope) -> bool {
        let state = self.state.read().await;
        match state.connections.get(id) {
            Some(tx) => tx.send(envelope).is_ok(),
            None => false,
        }
    }

    /// Queue an envelope for every local socket.
    pub async fn send_all(&self, envelope: &Envelope) -> usize {
        let state = self.state.read().await;
        state
            .connections
            .values()
            .filter(|tx| tx.send(envelope.clone()).is_ok())
            .count()
    }

    /// Deliver a dispatch to the local sockets its route matches. Returns
    /// how many sockets were reached.
    pub async fn deliver(&self, dispatch: &Dispatch) -> usize {
        let state = self.state.read().await;
        let send = |id: &ConnectionId| {
            state
                .connections
                .get(id)
                .map(|tx| tx.send(dispatch.envelope.clone()).is_ok())
                .unwrap_or(false)
        };

        let delivered = match &dispatch.route {
            Route::Connection { id } => usize::from(send(id)),
            Route::Room { room, except } => state
                .rooms
                .get(room)
                .map(|members| {
                    members
                        .iter()
                        .filter(|id| Some(*id) != except.as_ref())
                        .filter(|id| send(*id))
                        .count()
                })
                .unwrap_or(0),
            Route::Everyone { except } => state
                .connections
                .keys()
                .filter(|id| Some(*id) != except.as_ref())
                .filter(|id| send(*id))
                .count(),
        };

        debug!(
            action = ?dispatch.envelope.action,
            delivered,
            "Dispatch delivered locally"
        );
        delivered
    }

    /// Active forum rooms on this relay, sorted by room id.
    pub async fn rooms_list(&self) -> Vec<RoomSummary> {
        let state = self.state.read().await;
        let mut rooms: Vec<RoomSummary> = state
            .rooms
            .iter()
            .map(|(room, members)| RoomSummary {
                room_key: room.clone(),
                number_of_users: members.len(),
            })
            .collect();
        rooms.sort_by(|a, b| a.room_key.cmp(&b.room_key));
        rooms
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    #[cfg(test)]
    pub async fn is_member(&self, id: &ConnectionId, room: &RoomId) -> bool {
        self.state
            .read()
            .await
            .rooms
            .get(room)
            .map(|members| members.contains(id))
            .unwrap_or(false)
    }
}
