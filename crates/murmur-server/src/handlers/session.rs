//! Session lifecycle: login, page-refresh migration, logout, disconnect.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use murmur_shared::protocol::{LoginRequest, SessionUpdateRequest};
use murmur_shared::{ServerAction, UserId, UserStatus};
use murmur_store::SessionRecord;

use crate::context::ConnectionContext;
use crate::dispatch::Effect;
use crate::error::RelayError;
use crate::fanout::{self, Presence, Speaker};

use super::{notify_connections, Services};

/// The user a session payload refers to. It must be the token's user.
fn session_user(ctx: &ConnectionContext, requested: &UserId) -> Result<UserId, RelayError> {
    if requested.is_empty() {
        return Ok(ctx.user_id().clone());
    }
    if requested != ctx.user_id() {
        return Err(RelayError::BadRequest(
            "session user does not match the authenticated user".into(),
        ));
    }
    Ok(requested.clone())
}

fn session_record(
    services: &Services,
    ctx: &ConnectionContext,
    user: UserId,
    details: &LoginRequest,
) -> SessionRecord {
    let token = if details.id_token.is_empty() {
        ctx.identity.token.clone()
    } else {
        details.id_token.clone()
    };

    SessionRecord {
        id: user,
        socket_id: ctx.id.clone(),
        previous_socket_id: None,
        user_name: ctx.display_name(&details.user_name),
        first_name: details.first_name.clone(),
        last_name: details.last_name.clone(),
        id_token: Some(token),
        status: UserStatus::Active,
        ip: ctx.ip.clone(),
        app: Some(services.app_name.clone()),
    }
}

pub async fn login(
    services: &Services,
    ctx: &ConnectionContext,
    req: LoginRequest,
    at: DateTime<Utc>,
) -> Result<Vec<Effect>, RelayError> {
    let user = session_user(ctx, &req.id)?;
    let record = session_record(services, ctx, user.clone(), &req);

    let mut effects = vec![Effect::to_origin(fanout::login_success(
        Some(record.user_name.clone()),
        at,
    ))];

    match services
        .store
        .create(&ctx.id, services.session_ttl, record)
        .await
    {
        Ok(stored) => {
            info!(
                user = %user,
                connection = %ctx.id.short(),
                app = %services.app_name,
                "User logged in"
            );
            effects.push(Effect::to_origin(fanout::payload(
                ServerAction::SessionCreated,
                &stored.without_token(),
            )));
            effects.extend(
                notify_connections(
                    services,
                    ctx,
                    &user,
                    ServerAction::ActiveConnectionLoggedIn,
                    &Presence::from(&stored),
                )
                .await,
            );
        }
        Err(e) => {
            error!(error = %e, user = %user, connection = %ctx.id.short(), "Failed to create session");
            effects.push(Effect::to_origin(fanout::error(
                "CLIENT:LOGIN",
                "Session store unavailable",
            )));
        }
    }

    Ok(effects)
}

pub async fn update_session(
    services: &Services,
    ctx: &ConnectionContext,
    req: SessionUpdateRequest,
) -> Result<Vec<Effect>, RelayError> {
    if !req.is_authenticated {
        return Ok(Vec::new());
    }

    let user = session_user(ctx, &req.details.id)?;
    let mut record = session_record(services, ctx, user.clone(), &req.details);
    record.previous_socket_id = req
        .socket_details
        .session
        .id
        .filter(|previous| previous != &ctx.id);

    let stored = services
        .store
        .create(&ctx.id, services.session_ttl, record)
        .await?;

    info!(
        user = %user,
        connection = %ctx.id.short(),
        previous = ?stored.previous_socket_id,
        "Session migrated"
    );

    let mut effects = vec![Effect::to_origin(fanout::payload(
        ServerAction::SessionUpdated,
        &stored.without_token(),
    ))];
    effects.extend(
        notify_connections(
            services,
            ctx,
            &user,
            ServerAction::ActiveConnectionRefreshed,
            &Presence::from(&stored),
        )
        .await,
    );
    Ok(effects)
}

pub async fn logout(
    services: &Services,
    ctx: &ConnectionContext,
    req: LoginRequest,
    at: DateTime<Utc>,
) -> Result<Vec<Effect>, RelayError> {
    let user = session_user(ctx, &req.id)?;
    let mut effects = Vec::new();

    if !req.id.is_empty() {
        effects.extend(
            notify_connections(
                services,
                ctx,
                &user,
                ServerAction::ActiveConnectionLoggedOut,
                &Presence::from_login(&req, UserStatus::Away),
            )
            .await,
        );
    }

    let user_name = (!req.user_name.is_empty()).then(|| req.user_name.clone());
    effects.push(Effect::to_origin(fanout::logout_success(user_name, at)));

    if let Err(e) = services.store.remove(&ctx.id).await {
        error!(error = %e, connection = %ctx.id.short(), "Failed to remove session");
        effects.push(Effect::to_origin(fanout::error(
            "CLIENT:LOGOUT",
            "Session store unavailable",
        )));
    }
    effects.push(Effect::to_origin(fanout::payload(
        ServerAction::SessionClosed,
        &serde_json::json!({}),
    )));

    info!(
        user = %user,
        connection = %ctx.id.short(),
        "User logged out"
    );
    Ok(effects)
}

/// The socket dropped: leave rooms, mark the session away and tell the
/// user's connections.
pub async fn disconnect(
    services: &Services,
    ctx: &mut ConnectionContext,
    at: DateTime<Utc>,
) -> Vec<Effect> {
    let session = match services.store.get(&ctx.id).await {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, connection = %ctx.id.short(), "Session lookup failed on disconnect");
            None
        }
    };

    let name = session
        .as_ref()
        .map(|s| s.user_name.clone())
        .unwrap_or_else(|| ctx.display_name(""));
    let speaker = Speaker::new(name, None);

    let mut effects = ctx
        .membership
        .leave_all_on_disconnect(&ctx.id, &speaker, at);
    if !effects.is_empty() {
        effects.push(Effect::BroadcastRoomsList);
    }

    if let Some(session) = session {
        if let Err(e) = services
            .store
            .update_status(&session, UserStatus::Away, services.session_ttl)
            .await
        {
            warn!(error = %e, user = %session.id, "Failed to mark session away");
        }

        let away = SessionRecord {
            status: UserStatus::Away,
            ..session
        };
        effects.extend(
            notify_connections(
                services,
                ctx,
                &away.id,
                ServerAction::ActiveConnectionDisconnected,
                &Presence::from(&away),
            )
            .await,
        );
    }

    effects
}

#[cfg(test)]
mod tests {
    use murmur_shared::protocol::{
        DirectMessageRequest, DirectMessageTarget, SessionReference, SocketDetails,
    };
    use murmur_shared::{ClientAction, ConnectionId};

    use crate::testing::TestRelay;

    use super::*;

    fn login_as(user: &str, name: &str) -> ClientAction {
        ClientAction::Login(LoginRequest {
            id: UserId::new(user),
            user_name: name.into(),
            first_name: Some("Ada".into()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_login_creates_session() {
        let t = TestRelay::new();
        let mut a = t.connect("ca", "ua", "A").await;
        a.drain();

        t.send(&mut a, login_as("ua", "A")).await;

        let envelopes = a.drain();
        let actions: Vec<_> = envelopes.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![ServerAction::UserLoginSuccess, ServerAction::SessionCreated]
        );
        assert_eq!(envelopes[0].data["userName"], "A");
        assert_eq!(envelopes[1].data["socketId"], "ca");
        assert!(envelopes[1].data.get("idToken").is_none());

        let stored = t.store.get(&ConnectionId::from("ca")).await.unwrap().unwrap();
        assert_eq!(stored.id, UserId::new("ua"));
        assert_eq!(stored.id_token.as_deref(), Some("token-ua"));
        assert_eq!(stored.app.as_deref(), Some("murmur"));
        assert_eq!(stored.ip.as_deref(), Some("127.0.0.1"));
    }

    #[tokio::test]
    async fn test_login_for_other_user_rejected() {
        let t = TestRelay::new();
        let mut a = t.connect("ca", "ua", "A").await;
        a.drain();

        t.send(&mut a, login_as("someone-else", "A")).await;

        assert_eq!(a.take(ServerAction::Error).len(), 1);
        assert!(t.store.get(&ConnectionId::from("ca")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_login_tells_online_contacts() {
        let t = TestRelay::new();
        t.collaborators.connect("ua", "ub");
        let mut a = t.connect("ca", "ua", "A").await;
        let mut b = t.connect("cb", "ub", "B").await;
        let mut c = t.connect("cc", "uc", "C").await;
        t.login(&mut b).await;
        t.login(&mut c).await;
        b.drain();
        c.drain();

        t.send(&mut a, login_as("ua", "A")).await;

        let seen = b.take(ServerAction::ActiveConnectionLoggedIn);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].data["id"], "ua");
        assert_eq!(seen[0].data["status"], "active");
        assert!(seen[0].data.get("idToken").is_none());
        assert!(c.drain().is_empty());
    }

    #[tokio::test]
    async fn test_page_refresh_migrates_session() {
        let t = TestRelay::new();
        t.collaborators.connect("ua", "ub");
        let mut b = t.connect("cb", "ub", "B").await;
        t.login(&mut b).await;

        let mut first = t.connect("c1", "ua", "A").await;
        t.send(&mut first, login_as("ua", "A")).await;
        t.relay.hub.unregister(&first.ctx.id).await;
        b.drain();

        let mut second = t.connect("c2", "ua", "A").await;
        second.drain();
        t.send(
            &mut second,
            ClientAction::UpdateSession(SessionUpdateRequest {
                details: LoginRequest {
                    id: UserId::new("ua"),
                    user_name: "A".into(),
                    ..Default::default()
                },
                socket_details: SocketDetails {
                    session: SessionReference {
                        id: Some(ConnectionId::from("c1")),
                    },
                },
                is_authenticated: true,
            }),
        )
        .await;

        let updated = second.take(ServerAction::SessionUpdated);
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].data["socketId"], "c2");
        assert_eq!(updated[0].data["previousSocketId"], "c1");

        assert!(t.store.get(&ConnectionId::from("c1")).await.unwrap().is_none());
        let by_user = t.store.get_by_user(&UserId::new("ua")).await.unwrap().unwrap();
        assert_eq!(by_user.socket_id, ConnectionId::from("c2"));
        assert_eq!(by_user.previous_socket_id, Some(ConnectionId::from("c1")));

        assert_eq!(b.take(ServerAction::ActiveConnectionRefreshed).len(), 1);
    }

    #[tokio::test]
    async fn test_unauthenticated_update_is_ignored() {
        let t = TestRelay::new();
        let mut a = t.connect("ca", "ua", "A").await;
        a.drain();

        t.send(&mut a, ClientAction::UpdateSession(SessionUpdateRequest::default()))
            .await;
        assert!(a.drain().is_empty());
        assert!(t.store.get(&ConnectionId::from("ca")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_logout_clears_session() {
        let t = TestRelay::new();
        t.collaborators.connect("ua", "ub");
        let mut a = t.connect("ca", "ua", "A").await;
        let mut b = t.connect("cb", "ub", "B").await;
        t.login(&mut a).await;
        t.login(&mut b).await;
        a.drain();
        b.drain();

        t.send(
            &mut a,
            ClientAction::Logout(LoginRequest {
                id: UserId::new("ua"),
                user_name: "A".into(),
                ..Default::default()
            }),
        )
        .await;

        let actions: Vec<_> = a.drain().into_iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![ServerAction::UserLogoutSuccess, ServerAction::SessionClosed]
        );
        let gone = b.take(ServerAction::ActiveConnectionLoggedOut);
        assert_eq!(gone.len(), 1);
        assert_eq!(gone[0].data["status"], "away");
        assert!(t.store.get(&ConnectionId::from("ca")).await.unwrap().is_none());

        // A direct message to the logged out user falls back to a notification
        t.send(
            &mut b,
            ClientAction::SendDirectMessage(DirectMessageRequest {
                message: "still there?".into(),
                to: DirectMessageTarget {
                    id: UserId::new("ua"),
                    socket_id: Some(ConnectionId::from("ca")),
                },
                ..Default::default()
            }),
        )
        .await;
        assert!(a.take(ServerAction::SendDirectMessage).is_empty());
        assert!(t.collaborators.direct_messages()[0].is_unread);
        assert_eq!(t.collaborators.notifications().len(), 1);
    }

    #[tokio::test]
    async fn test_logout_for_other_user_rejected() {
        let t = TestRelay::new();
        t.collaborators.connect("ub", "uc");
        let mut a = t.connect("ca", "ua", "A").await;
        let mut b = t.connect("cb", "ub", "B").await;
        let mut c = t.connect("cc", "uc", "C").await;
        t.login(&mut a).await;
        t.login(&mut b).await;
        t.login(&mut c).await;
        a.drain();
        c.drain();

        t.send(
            &mut a,
            ClientAction::Logout(LoginRequest {
                id: UserId::new("ub"),
                user_name: "B".into(),
                ..Default::default()
            }),
        )
        .await;

        let envelopes = a.drain();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].action, ServerAction::Error);
        assert_eq!(envelopes[0].data["source"], "CLIENT:LOGOUT");
        assert!(c.take(ServerAction::ActiveConnectionLoggedOut).is_empty());
        assert!(t.store.get(&ConnectionId::from("ca")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_disconnect_marks_session_away() {
        let t = TestRelay::new();
        t.collaborators.connect("ua", "ub");
        let mut a = t.connect("ca", "ua", "A").await;
        let mut b = t.connect("cb", "ub", "B").await;
        t.login(&mut a).await;
        t.login(&mut b).await;
        b.drain();

        t.relay.close(a.ctx.clone()).await;

        let stored = t.store.get_by_user(&UserId::new("ua")).await.unwrap().unwrap();
        assert_eq!(stored.status, UserStatus::Away);
        let seen = b.take(ServerAction::ActiveConnectionDisconnected);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].data["status"], "away");
    }
}
