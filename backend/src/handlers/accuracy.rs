//! HTTP handlers for accuracy reporting

use axum::{extract::State, Json};
use shared::AccuracyRecord;

use crate::AppState;

/// Current rolling accuracy per method and field
pub async fn get_accuracy(State(state): State<AppState>) -> Json<Vec<AccuracyRecord>> {
    Json(state.engine.accuracy_records())
}
