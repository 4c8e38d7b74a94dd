// Library crate for the leaderboard service
// This file exposes the public API for integration tests

pub mod api;
pub mod config;
pub mod leaderboard;
pub mod pipeline;
pub mod ranking;
pub mod repository;
pub mod shared;

// Re-export commonly used types for easier access in the binary and tests
pub use leaderboard::compaction_task;
pub use leaderboard::models::{Score, SubmitScoreRequest, TimeWindow};
pub use leaderboard::{GameLeaderboard, LeaderboardService, LeaderboardStore};
pub use pipeline::{InMemoryBroker, MessageBroker, ScoreProducer};
pub use repository::{InMemoryScoreRepository, PostgresScoreRepository, ScoreRepository};
pub use shared::{AppError, AppState};
