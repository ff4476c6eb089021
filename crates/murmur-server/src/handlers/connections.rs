//! User connection (contact request) events.

use serde_json::{json, Map, Value};
use tracing::{error, info};

use murmur_shared::protocol::{
    ConnectionCreatedRequest, ConnectionUser, LoadActiveConnectionsRequest, RequestStatus,
    UpdateConnectionRequest,
};
use murmur_shared::{ProtocolError, ServerAction, UserId};

use crate::collaborators::{NewNotification, NotificationKind};
use crate::context::ConnectionContext;
use crate::dispatch::Effect;
use crate::error::RelayError;
use crate::fanout;

use super::Services;

/// Someone asked to connect: tell the addressee if they are online.
pub async fn create_connection(
    services: &Services,
    ctx: &ConnectionContext,
    req: ConnectionCreatedRequest,
) -> Result<Vec<Effect>, RelayError> {
    let mut connection = req.connection;
    if connection.accepting_user_id.is_empty() {
        return Err(RelayError::BadRequest("acceptingUserId is required".into()));
    }

    info!(
        connection = %ctx.id.short(),
        user = ?req.user.user_name,
        to = %connection.accepting_user_id,
        "User connection requested"
    );

    let Some(addressee) = services
        .live_session(&connection.accepting_user_id)
        .await?
    else {
        return Ok(Vec::new());
    };

    let mut payload = match connection.notification.take() {
        Some(Value::Object(fields)) => fields,
        _ => Map::new(),
    };
    let mut user_connection =
        serde_json::to_value(&connection).map_err(ProtocolError::from)?;
    if let Value::Object(fields) = &mut user_connection {
        fields.remove("notification");
    }
    payload.insert("userConnection".into(), user_connection);

    Ok(vec![Effect::to_connection(
        addressee.socket_id,
        fanout::payload(ServerAction::NotificationCreated, &payload),
    )])
}

pub async fn update_connection(
    services: &Services,
    ctx: &ConnectionContext,
    req: UpdateConnectionRequest,
) -> Result<Vec<Effect>, RelayError> {
    let request = ctx.request_context();
    let connection = services
        .collaborators
        .update_user_connection(&request, &req.connection)
        .await?;

    info!(
        connection = %ctx.id.short(),
        user = ?req.user.user_name,
        status = ?connection.request_status,
        broken = connection.is_connection_broken,
        "User connection updated"
    );

    let requester = services
        .live_session(&connection.requesting_user_id)
        .await?;
    let accepted =
        !connection.is_connection_broken && connection.request_status == Some(RequestStatus::Complete);

    let mut effects = Vec::new();
    if let Some(requester) = &requester {
        let updated = fanout::payload(ServerAction::UserConnectionUpdated, &connection);
        if connection.is_connection_broken {
            effects.push(Effect::to_connection(requester.socket_id.clone(), updated));
        } else if accepted {
            effects.push(Effect::to_connection(requester.socket_id.clone(), updated.clone()));
            if let Some(acceptor) = services
                .store
                .get_by_user(&connection.accepting_user_id)
                .await?
            {
                effects.push(Effect::to_connection(
                    requester.socket_id.clone(),
                    fanout::payload(ServerAction::ActiveConnectionsAdded, &acceptor.without_token()),
                ));
            }

            effects.push(Effect::to_origin(updated));
            effects.push(Effect::to_origin(fanout::payload(
                ServerAction::ActiveConnectionsAdded,
                &requester.without_token(),
            )));
        }
    }

    if accepted {
        let notification = NewNotification::new(
            connection.requesting_user_id.clone(),
            NotificationKind::ConnectionRequestAccepted,
            json!({
                "userId": connection.accepting_user_id,
                "firstName": req.user.first_name,
                "lastName": req.user.last_name,
            }),
        )
        .associated_with(connection.id.clone().unwrap_or(Value::Null));

        match services
            .collaborators
            .create_notification(&request, &notification)
            .await
        {
            Ok(created) => {
                if let Some(requester) = requester {
                    effects.push(Effect::to_connection(
                        requester.socket_id,
                        fanout::payload(ServerAction::NotificationCreated, &created),
                    ));
                }
            }
            Err(e) => {
                error!(error = %e, user = %connection.requesting_user_id, "Failed to create connection notification");
            }
        }
    }

    Ok(effects)
}

/// The member of `pair` that is not `me`.
fn other_user<'a>(users: &'a [ConnectionUser], me: &UserId) -> Option<&'a ConnectionUser> {
    match users {
        [first, second, ..] if &first.id == me => Some(second),
        [first, ..] => Some(first),
        [] => None,
    }
}

pub async fn load_active_connections(
    services: &Services,
    ctx: &ConnectionContext,
    req: LoadActiveConnectionsRequest,
) -> Result<Vec<Effect>, RelayError> {
    let me = if req.user_id.is_empty() {
        ctx.user_id().clone()
    } else {
        req.user_id.clone()
    };

    let others: Vec<&ConnectionUser> = req
        .connections
        .iter()
        .filter_map(|pair| other_user(&pair.users, &me))
        .collect();
    let ids: Vec<UserId> = others.iter().map(|user| user.id.clone()).collect();
    let live = services.store.get_many_by_user(&ids).await?;

    let mut active_users = Vec::new();
    for user in others {
        let Some(session) = live.iter().find(|session| session.id == user.id) else {
            continue;
        };
        let mut merged = user.extra.clone();
        merged.insert("id".into(), json!(user.id));
        let live_fields =
            serde_json::to_value(session.without_token()).map_err(ProtocolError::from)?;
        if let Value::Object(fields) = live_fields {
            merged.extend(fields);
        }
        active_users.push(Value::Object(merged));
    }

    Ok(vec![Effect::to_origin(fanout::payload(
        ServerAction::ActiveConnectionsLoaded,
        &json!({ "activeUsers": active_users }),
    ))])
}
