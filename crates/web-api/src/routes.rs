use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::StatusCode,
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use application::RouterStats;
use domain::{Participant, SessionId, UserId};

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new().route("/router/stats", get(router_stats))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn router_stats(State(state): State<AppState>) -> Json<RouterStats> {
    Json(state.router.get_stats())
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    session_id: String,
    user_id: Uuid,
    username: Option<String>,
}

async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let session_id =
        SessionId::parse(query.session_id).map_err(|err| ApiError::bad_request(err.to_string()))?;
    let user_id = UserId::from(query.user_id);
    let username = query
        .username
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| user_id.to_string());

    if !state.router.is_running() {
        return Err(ApiError::service_unavailable("message router is not running"));
    }

    state.rate_limiter.add_connection(user_id).map_err(|err| {
        tracing::warn!(user_id = %user_id, "Connection refused: {}", err);
        ApiError::too_many_requests(err.to_string())
    })?;

    let participant = Participant::new(user_id, username);
    let limiter = state.rate_limiter.clone();
    Ok(ws
        .on_failed_upgrade(move |err| {
            tracing::warn!(user_id = %user_id, error = %err, "WebSocket upgrade failed");
            limiter.remove_connection(user_id);
        })
        .on_upgrade(move |socket| async move {
            WebSocketConnection::new(socket, state, participant, session_id)
                .run()
                .await
        }))
}
