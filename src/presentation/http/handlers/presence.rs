//! Presence Handler

use axum::{extract::State, Json};

use crate::application::dto::PresenceEntryDto;
use crate::startup::AppState;

/// Online users first, then offline users with their last-seen time
pub async fn get_presence(State(state): State<AppState>) -> Json<Vec<PresenceEntryDto>> {
    Json(state.engine.queries().presence())
}
