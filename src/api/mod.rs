pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};

use crate::shared::AppState;

/// Builds the service router. Middleware layers (trace, CORS) are applied
/// by the binary on top of this.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/leaderboard/score", post(handlers::submit_score))
        .route("/api/leaderboard/top/:game_id", get(handlers::top_leaders))
        .route(
            "/api/leaderboard/rank/:game_id/:user_id",
            get(handlers::player_rank),
        )
        .route("/api/health", get(handlers::health))
        .with_state(state)
}
