use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use crate::leaderboard::models::{
    HealthResponse, SubmitScoreRequest, TimeWindow, TopLeadersResponse,
};
use crate::shared::{AppError, AppState};

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<i64>,
    pub window: Option<String>,
}

/// HTTP handler for submitting a score
///
/// POST /api/leaderboard/score
/// Accepts the score, updates the cache and enqueues durable persistence.
#[instrument(name = "submit_score", skip(state, request))]
pub async fn submit_score(
    State(state): State<AppState>,
    Json(request): Json<SubmitScoreRequest>,
) -> Result<StatusCode, AppError> {
    state.service.submit_score(request).await?;
    Ok(StatusCode::OK)
}

/// HTTP handler for the top leaders of a game
///
/// GET /api/leaderboard/top/{game_id}?limit=N&window=W
#[instrument(name = "top_leaders", skip(state))]
pub async fn top_leaders(
    State(state): State<AppState>,
    Path(game_id): Path<i64>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<TopLeadersResponse>, AppError> {
    let limit = query.limit.unwrap_or(10);
    if limit <= 0 {
        return Err(AppError::Validation("Invalid limit".to_string()));
    }
    let window = TimeWindow::from_query_param(query.window.as_deref().unwrap_or(""));

    let response = state
        .service
        .top_leaders(game_id, limit as usize, window)
        .await;
    Ok(Json(response))
}

/// HTTP handler for a player's rank and percentile
///
/// GET /api/leaderboard/rank/{game_id}/{user_id}?window=W
/// An unknown player answers 200 with an error field rather than 404.
#[instrument(name = "player_rank", skip(state))]
pub async fn player_rank(
    State(state): State<AppState>,
    Path((game_id, user_id)): Path<(i64, i64)>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Response, AppError> {
    let window = TimeWindow::from_query_param(query.window.as_deref().unwrap_or(""));

    match state.service.player_rank(game_id, user_id, window).await {
        Some(rank) => Ok(Json(rank).into_response()),
        None => Ok(Json(json!({ "error": "Player not found" })).into_response()),
    }
}

/// HTTP handler for the health endpoint
///
/// GET /api/health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}
