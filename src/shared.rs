use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::leaderboard::service::LeaderboardService;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LeaderboardService>,
}

impl AppState {
    pub fn new(service: Arc<LeaderboardService>) -> Self {
        Self { service }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Service overloaded: {0}")]
    Backpressure(String),

    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Database(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Database error: {}", msg),
            ),
            AppError::Broker(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Broker error: {}", msg),
            ),
            AppError::Backpressure(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::*;
    use crate::leaderboard::store::LeaderboardStore;
    use crate::repository::{InMemoryScoreRepository, ScoreRepository};

    /// Builds an `AppState` over in-memory components, with optional
    /// overrides for tests that need to share a store or repository.
    pub struct AppStateBuilder {
        store: Option<Arc<LeaderboardStore>>,
        repository: Option<Arc<dyn ScoreRepository>>,
    }

    impl AppStateBuilder {
        pub fn new() -> Self {
            Self {
                store: None,
                repository: None,
            }
        }

        pub fn with_store(mut self, store: Arc<LeaderboardStore>) -> Self {
            self.store = Some(store);
            self
        }

        pub fn with_repository(mut self, repository: Arc<dyn ScoreRepository>) -> Self {
            self.repository = Some(repository);
            self
        }

        pub fn build(self) -> AppState {
            let store = self.store.unwrap_or_else(|| Arc::new(LeaderboardStore::new()));
            let repository = self
                .repository
                .unwrap_or_else(|| Arc::new(InMemoryScoreRepository::new()));
            let service = Arc::new(LeaderboardService::new(store, repository, None));
            AppState::new(service)
        }
    }

    impl Default for AppStateBuilder {
        fn default() -> Self {
            Self::new()
        }
    }
}
