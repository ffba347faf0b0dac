use crate::interface_adapters::protocol::ArenaStatusDto;
use crate::interface_adapters::state::AppState;

use axum::extract::{Json, State};
use std::sync::Arc;

/// Current match state and alive count, read from the status watch channel.
pub async fn arena_status_handler(State(state): State<Arc<AppState>>) -> Json<ArenaStatusDto> {
    Json(ArenaStatusDto::from(state.relay.status()))
}
