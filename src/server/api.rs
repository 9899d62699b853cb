use std::sync::Arc;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::State,
    extract::ws::WebSocketUpgrade,
    http::StatusCode,
    routing::get,
};
use colored::*;
use serde_json::{json, Value};
use tracing::warn;

use crate::polls::PollClient;
use crate::relay::Relay;
use crate::storage::ChangeLog;

use super::session;

#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    pub changelog: Arc<ChangeLog>,
    pub polls: PollClient,
}

pub async fn serve(addr: &str, state: AppState) -> Result<()> {
    let app = router(state);

    println!(
        "{} Relay listening at {}",
        "✓".green(),
        format!("http://{}", addr).bright_blue()
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "Pollcast Relay Server" }))
        .route("/health", get(|| async { Json("OK") }))
        .route("/state", get(get_state))
        .route("/subscribe", get(subscribe_handler))
        .with_state(state)
}

async fn subscribe_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| session::run(socket, state.relay.clone()))
}

/// Initial snapshot for a newly-loaded page: the current poll list plus the
/// recent-changes window. Live updates arrive over `/subscribe`.
async fn get_state(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let changes = state.changelog.recent().map_err(|e| {
        warn!("changelog read failed: {e:#}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let polls = state.polls.fetch_polls().await.map_err(|e| {
        warn!("poll snapshot fetch failed: {e:#}");
        StatusCode::BAD_GATEWAY
    })?;

    Ok(Json(json!({ "polls": polls, "changes": changes })))
}
