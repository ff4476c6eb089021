use std::sync::Arc;

use axum::{extract::State, http::Method, routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use murmur_shared::protocol::RoomSummary;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::relay::Relay;
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub config: Arc<RelayConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_check))
        .route("/info", get(relay_info))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct RelayInfoResponse {
    name: String,
    version: &'static str,
    app: String,
    backplane: &'static str,
    connections: usize,
    rooms: Vec<RoomSummary>,
}

/// Healthy only while the session store answers.
async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, RelayError> {
    state.relay.services.store.ping().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

async fn relay_info(State(state): State<AppState>) -> Json<RelayInfoResponse> {
    let relay = &state.relay;
    Json(RelayInfoResponse {
        name: relay.instance_name().to_string(),
        version: env!("CARGO_PKG_VERSION"),
        app: state.config.app_name.clone(),
        backplane: relay.backplane.kind(),
        connections: relay.hub.connection_count().await,
        rooms: relay.hub.rooms_list().await,
    })
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP and WebSocket server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
