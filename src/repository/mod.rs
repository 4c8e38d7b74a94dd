pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::leaderboard::models::{LeaderboardEntry, RankSummary, Score, TimeWindow};
use crate::shared::AppError;

/// Append-only persistence for raw score events.
///
/// The `scores` table is the authoritative replay source; the in-memory
/// leaderboard cache is a projection of it and may lag. Batches are not
/// deduplicated here — duplicates are absorbed by the cache's best-score
/// upsert.
#[async_trait]
pub trait ScoreRepository: Send + Sync {
    /// Persists a single score event.
    async fn save_score(&self, score: &Score) -> Result<(), AppError>;

    /// Persists a batch of score events in one transaction.
    async fn save_score_batch(&self, scores: &[Score]) -> Result<(), AppError>;

    /// Distinct game ids present in the store.
    async fn all_game_ids(&self) -> Result<Vec<i64>, AppError>;

    /// Every score event for a game, newest first, for cache warm-up.
    async fn all_scores_for_game(&self, game_id: i64) -> Result<Vec<Score>, AppError>;

    /// SQL-level top-k, for validation and fallback; not on the hot path.
    async fn top_leaders_authoritative(
        &self,
        game_id: i64,
        limit: i64,
        window: TimeWindow,
    ) -> Result<Vec<LeaderboardEntry>, AppError>;

    /// SQL-level rank and percentile, for validation and fallback.
    async fn player_rank_authoritative(
        &self,
        game_id: i64,
        user_id: i64,
        window: TimeWindow,
    ) -> Result<Option<RankSummary>, AppError>;
}

pub use memory::InMemoryScoreRepository;
pub use postgres::PostgresScoreRepository;
