//! Persisted settings endpoints

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};

use super::{ApiError, ApiState};
use crate::settings::{Settings, SettingsPatch};

/// Build settings router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(get_settings).put(update_settings))
        .with_state(state)
}

async fn get_settings(State(state): State<Arc<ApiState>>) -> Json<Settings> {
    Json(state.settings.get().await)
}

async fn update_settings(
    State(state): State<Arc<ApiState>>,
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<Settings>, ApiError> {
    Ok(Json(state.settings.update(patch).await?))
}
