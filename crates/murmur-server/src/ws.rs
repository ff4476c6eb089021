//! WebSocket transport.
//!
//! The handshake token is checked as soon as the socket opens. A socket
//! that fails the check receives one `UNAUTHORIZED` frame and is closed
//! without ever being registered with the hub.

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use serde_json::json;
use tracing::{debug, warn};

use murmur_shared::{ConnectionId, Envelope, ServerAction};

use crate::api::AppState;
use crate::auth::Handshake;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(handshake): Query<Handshake>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let ip = forwarded_for(&headers).unwrap_or_else(|| addr.ip().to_string());

    ws.on_upgrade(move |socket| handle_socket(socket, state, handshake, authorization, ip))
}

/// First hop of `x-forwarded-for`, when the relay sits behind a proxy.
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

async fn send_envelope(socket: &mut WebSocket, envelope: &Envelope) -> bool {
    match envelope.encode() {
        Ok(frame) => socket.send(Message::Text(frame)).await.is_ok(),
        Err(e) => {
            warn!(error = %e, action = ?envelope.action, "Failed to encode envelope");
            true
        }
    }
}

async fn handle_socket(
    mut socket: WebSocket,
    state: AppState,
    handshake: Handshake,
    authorization: Option<String>,
    ip: String,
) {
    let relay = state.relay;

    let identity = match relay.authenticate(&handshake, authorization.as_deref()) {
        Ok(identity) => identity,
        Err(e) => {
            warn!(ip = %ip, error = %e, "Rejected socket");
            let envelope =
                Envelope::new(ServerAction::Unauthorized, &json!({ "message": e.to_string() }));
            send_envelope(&mut socket, &envelope).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let (mut ctx, mut rx) = relay
        .open(ConnectionId::generate(), Some(ip), identity, handshake)
        .await;

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(envelope) => {
                        if !send_envelope(&mut socket, &envelope).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => relay.handle_frame(&mut ctx, &text).await,
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(connection = %ctx.id.short(), error = %e, "Socket read failed");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    relay.close(ctx).await;
}
