use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use watch_core::{ChannelState, SweepReport};

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/channels", get(list_channels))
        .route("/channels/{id}", get(get_channel))
        .route("/sweep", get(last_sweep))
}

/// GET /api/v1/channels
async fn list_channels(State(state): State<AppState>) -> Json<Vec<ChannelState>> {
    Json(state.store.snapshot())
}

/// GET /api/v1/channels/:id
async fn get_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ChannelState>, ApiError> {
    state
        .store
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Channel {} has not been polled", id)))
}

/// GET /api/v1/sweep
async fn last_sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, ApiError> {
    state
        .reports
        .read()
        .await
        .clone()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No sweep has completed yet".into()))
}
