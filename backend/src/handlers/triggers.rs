//! HTTP handlers for the trigger decision log

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use shared::TriggerDecision;

use crate::AppState;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

/// Query parameters for the decision log
#[derive(Debug, Deserialize)]
pub struct DecisionQuery {
    pub limit: Option<usize>,
}

/// Recent trigger decisions, newest first
pub async fn list_trigger_decisions(
    State(state): State<AppState>,
    Query(query): Query<DecisionQuery>,
) -> Json<Vec<TriggerDecision>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    Json(state.engine.recent_decisions(limit))
}
