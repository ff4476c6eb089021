//! The per-process relay: authenticates sockets, routes decoded client
//! actions to their handlers and applies the resulting effects.
//!
//! Frames of one socket are handled sequentially by its reader task, so the
//! effects of one action are fully applied before the next action starts.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use murmur_shared::{ClientAction, ConnectionId, Dispatch, Envelope, ProtocolError};

use crate::auth::{AuthError, Authenticator, Handshake, Identity};
use crate::backplane::Backplane;
use crate::context::ConnectionContext;
use crate::dispatch::{Effect, Recipient};
use crate::error::RelayError;
use crate::fanout;
use crate::handlers::{self, Services};
use crate::hub::Hub;

#[derive(Clone)]
pub struct Relay {
    pub services: Services,
    pub hub: Hub,
    pub backplane: Arc<dyn Backplane>,
    authenticator: Authenticator,
    instance_name: String,
}

impl Relay {
    pub fn new(
        services: Services,
        hub: Hub,
        backplane: Arc<dyn Backplane>,
        authenticator: Authenticator,
        instance_name: impl Into<String>,
    ) -> Self {
        Self {
            services,
            hub,
            backplane,
            authenticator,
            instance_name: instance_name.into(),
        }
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn authenticate(
        &self,
        handshake: &Handshake,
        header: Option<&str>,
    ) -> Result<Identity, AuthError> {
        self.authenticator.authenticate(handshake, header)
    }

    /// Register an authenticated socket and greet it with the rooms list.
    pub async fn open(
        &self,
        id: ConnectionId,
        ip: Option<String>,
        identity: Identity,
        handshake: Handshake,
    ) -> (ConnectionContext, mpsc::UnboundedReceiver<Envelope>) {
        let rx = self.hub.register(id.clone()).await;
        let ctx = ConnectionContext::new(id, ip, identity, handshake);

        info!(
            connection = %ctx.id.short(),
            user = %ctx.user_id(),
            instance = %self.instance_name,
            "Socket connected"
        );

        let rooms = self.hub.rooms_list().await;
        self.hub.send_to(&ctx.id, fanout::rooms_list(&rooms)).await;
        (ctx, rx)
    }

    /// Decode and handle one text frame.
    pub async fn handle_frame(&self, ctx: &mut ConnectionContext, frame: &str) {
        match ClientAction::decode(frame) {
            Ok(action) => self.handle(ctx, action).await,
            Err(ProtocolError::Malformed { action, reason }) => {
                warn!(connection = %ctx.id.short(), action = %action, reason = %reason, "Malformed payload");
                let envelope = fanout::error(&action, format!("Malformed payload: {}", reason));
                self.hub.send_to(&ctx.id, envelope).await;
            }
            Err(e) => {
                debug!(connection = %ctx.id.short(), error = %e, "Ignoring frame");
            }
        }
    }

    pub async fn handle(&self, ctx: &mut ConnectionContext, action: ClientAction) {
        let kind = action.kind();
        let services = &self.services;
        let at = Utc::now();

        debug!(connection = %ctx.id.short(), action = kind, "Handling action");

        let result = match action {
            ClientAction::JoinRoom(req) => handlers::rooms::join_room(ctx, req, at),
            ClientAction::ExitRoom(req) => handlers::rooms::exit_room(ctx, req, at),
            ClientAction::SendMessage(req) => {
                handlers::messages::send_forum_message(services, ctx, req).await
            }
            ClientAction::SendDirectMessage(req) => {
                handlers::messages::send_direct_message(services, ctx, req).await
            }
            ClientAction::Login(req) => handlers::session::login(services, ctx, req, at).await,
            ClientAction::UpdateSession(req) => {
                handlers::session::update_session(services, ctx, req).await
            }
            ClientAction::Logout(req) => handlers::session::logout(services, ctx, req, at).await,
            ClientAction::CreateOrUpdateReaction(req) => {
                handlers::reactions::send_reaction_notification(services, ctx, req).await
            }
            ClientAction::CreateUserConnection(req) => {
                handlers::connections::create_connection(services, ctx, req).await
            }
            ClientAction::UpdateUserConnection(req) => {
                handlers::connections::update_connection(services, ctx, req).await
            }
            ClientAction::LoadActiveConnections(req) => {
                handlers::connections::load_active_connections(services, ctx, req).await
            }
            ClientAction::UpdateNotification(req) => {
                handlers::notifications::update_notification(services, ctx, req).await
            }
        };

        match result {
            Ok(effects) => self.apply(ctx, effects).await,
            Err(e) => self.reject(ctx, kind, e).await,
        }
    }

    /// The socket is gone: leave rooms, mark the session away, unregister.
    pub async fn close(&self, mut ctx: ConnectionContext) {
        debug!(
            connection = %ctx.id.short(),
            room = ?ctx.membership.current(),
            "Closing socket"
        );
        let effects = handlers::session::disconnect(&self.services, &mut ctx, Utc::now()).await;
        self.apply(&ctx, effects).await;
        self.hub.unregister(&ctx.id).await;
        info!(connection = %ctx.id.short(), user = %ctx.user_id(), "Socket disconnected");
    }

    async fn reject(&self, ctx: &ConnectionContext, kind: &str, error: RelayError) {
        match &error {
            RelayError::BadRequest(_) | RelayError::Protocol(_) => {
                debug!(connection = %ctx.id.short(), action = kind, error = %error, "Rejected action")
            }
            _ => warn!(connection = %ctx.id.short(), action = kind, error = %error, "Action failed"),
        }
        self.hub
            .send_to(&ctx.id, fanout::error(kind, error.client_message()))
            .await;
    }

    pub async fn apply(&self, ctx: &ConnectionContext, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::JoinRoom(room) => self.hub.join(&ctx.id, &room).await,
                Effect::LeaveRoom(room) => self.hub.leave(&ctx.id, &room).await,
                Effect::BroadcastRoomsList => {
                    let rooms = self.hub.rooms_list().await;
                    self.hub.send_all(&fanout::rooms_list(&rooms)).await;
                }
                Effect::NotifyGroup(notice) => {
                    if let Err(e) = self
                        .services
                        .collaborators
                        .notify_group_members(&ctx.request_context(), &notice)
                        .await
                    {
                        error!(error = %e, group = %notice.group_id, "Failed to notify group members");
                    }
                }
                Effect::Emit(outbound) => match outbound.to {
                    Recipient::Origin => {
                        self.hub.send_to(&ctx.id, outbound.envelope).await;
                    }
                    Recipient::Fleet(route) => {
                        let dispatch = Dispatch {
                            route,
                            envelope: outbound.envelope,
                        };
                        if let Err(e) = self.backplane.publish(&dispatch).await {
                            warn!(
                                error = %e,
                                backplane = self.backplane.kind(),
                                "Publish failed, delivering locally only"
                            );
                            self.hub.deliver(&dispatch).await;
                        }
                    }
                },
            }
        }
    }
}
