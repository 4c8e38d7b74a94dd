use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::RwLock;
use tracing::{error, info, instrument};

use super::models::{LeaderboardEntry, RankSummary, Score, TimeWindow};
use super::window_board::GameLeaderboard;
use crate::repository::ScoreRepository;
use crate::shared::AppError;

/// Registry of per-game leaderboards. Boards are created lazily on the
/// first score or query that references a game and live for the process
/// lifetime.
pub struct LeaderboardStore {
    games: RwLock<HashMap<i64, Arc<GameLeaderboard>>>,
}

impl Default for LeaderboardStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaderboardStore {
    pub fn new() -> Self {
        Self {
            games: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the leaderboard for `game_id`, creating it when absent.
    pub async fn get_or_create(&self, game_id: i64) -> Arc<GameLeaderboard> {
        {
            let games = self.games.read().await;
            if let Some(board) = games.get(&game_id) {
                return Arc::clone(board);
            }
        }

        let mut games = self.games.write().await;
        Arc::clone(
            games
                .entry(game_id)
                .or_insert_with(|| Arc::new(GameLeaderboard::new())),
        )
    }

    /// Read-path lookup. An unknown game is not an error; callers translate
    /// the absence into an empty top list or "player not found".
    pub async fn get(&self, game_id: i64) -> Option<Arc<GameLeaderboard>> {
        let games = self.games.read().await;
        games.get(&game_id).map(Arc::clone)
    }

    /// Applies a score to the cache only; durable persistence is the
    /// facade's responsibility.
    pub async fn add_score(&self, score: &Score) {
        let board = self.get_or_create(score.game_id).await;
        board.add_score(score.user_id, score.score, score.timestamp);
    }

    /// Cache application for a batch of scores.
    pub async fn add_score_batch(&self, scores: &[Score]) {
        for score in scores {
            self.add_score(score).await;
        }
    }

    /// Top `limit` entries for a game and window; empty when the game is
    /// unknown.
    pub async fn top_leaders(
        &self,
        game_id: i64,
        limit: usize,
        window: TimeWindow,
    ) -> Vec<LeaderboardEntry> {
        match self.get(game_id).await {
            Some(board) => board.top_k(limit, window),
            None => Vec::new(),
        }
    }

    /// A player's standing for a game and window.
    pub async fn player_rank(
        &self,
        game_id: i64,
        user_id: i64,
        window: TimeWindow,
    ) -> Option<RankSummary> {
        let board = self.get(game_id).await?;
        board.rank_and_percentile(user_id, window)
    }

    /// Distinct players a game holds in the given window.
    pub async fn total_players(&self, game_id: i64, window: TimeWindow) -> u64 {
        match self.get(game_id).await {
            Some(board) => board.total_players(window),
            None => 0,
        }
    }

    /// Ids of every game currently cached.
    pub async fn game_ids(&self) -> Vec<i64> {
        let games = self.games.read().await;
        games.keys().copied().collect()
    }

    /// Runs window compaction on every cached game. Returns the number of
    /// entries dropped.
    pub async fn compact_all(&self) -> usize {
        let boards: Vec<Arc<GameLeaderboard>> = {
            let games = self.games.read().await;
            games.values().map(Arc::clone).collect()
        };

        boards.iter().map(|board| board.compact_expired()).sum()
    }

    /// Rebuilds the cache from the durable repository: every game's scores
    /// are fetched and replayed through the best-score upsert. Replay is
    /// parallel across games, bounded by `max_concurrency`.
    #[instrument(skip(self, repository))]
    pub async fn initialize_from_repository(
        &self,
        repository: Arc<dyn ScoreRepository>,
        max_concurrency: usize,
    ) -> Result<(), AppError> {
        let game_ids = repository.all_game_ids().await?;
        info!(games = game_ids.len(), "Warming leaderboard cache from repository");

        futures::stream::iter(game_ids)
            .for_each_concurrent(max_concurrency.max(1), |game_id| {
                let repository = Arc::clone(&repository);
                async move {
                    if let Err(e) = self.replay_game(repository.as_ref(), game_id).await {
                        error!(game_id, error = %e, "Failed to replay game scores");
                    }
                }
            })
            .await;

        info!("Leaderboard cache warm-up complete");
        Ok(())
    }

    async fn replay_game(
        &self,
        repository: &dyn ScoreRepository,
        game_id: i64,
    ) -> Result<(), AppError> {
        let scores = repository.all_scores_for_game(game_id).await?;
        let board = self.get_or_create(game_id).await;
        board.add_score_batch(&scores);
        info!(game_id, scores = scores.len(), "Replayed game into cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryScoreRepository;
    use chrono::Utc;

    fn score(game_id: i64, user_id: i64, value: u64) -> Score {
        Score {
            game_id,
            user_id,
            score: value,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn games_are_isolated() {
        let store = LeaderboardStore::new();
        store.add_score(&score(1, 1, 100)).await;
        store.add_score(&score(1, 2, 200)).await;
        store.add_score(&score(2, 1, 300)).await;

        assert_eq!(store.total_players(1, TimeWindow::AllTime).await, 2);
        assert_eq!(store.total_players(2, TimeWindow::AllTime).await, 1);
        assert_eq!(store.total_players(99, TimeWindow::AllTime).await, 0);

        let leaders = store.top_leaders(1, 10, TimeWindow::AllTime).await;
        assert_eq!(leaders.len(), 2);
        assert_eq!(leaders[0].user_id, 2);

        let leaders = store.top_leaders(2, 10, TimeWindow::AllTime).await;
        assert_eq!(leaders.len(), 1);
        assert_eq!(leaders[0].score, 300);
    }

    #[tokio::test]
    async fn unknown_game_reads_are_empty() {
        let store = LeaderboardStore::new();
        assert!(store.top_leaders(42, 10, TimeWindow::AllTime).await.is_empty());
        assert!(store.player_rank(42, 1, TimeWindow::AllTime).await.is_none());
        assert!(store.get(42).await.is_none());
    }

    #[tokio::test]
    async fn get_or_create_reuses_the_board() {
        let store = LeaderboardStore::new();
        let first = store.get_or_create(7).await;
        let second = store.get_or_create(7).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.game_ids().await, vec![7]);
    }

    #[tokio::test]
    async fn warm_up_replays_every_game() {
        let repository = Arc::new(InMemoryScoreRepository::new());
        repository
            .save_score_batch(&[score(1, 1, 100), score(1, 2, 200), score(2, 1, 300)])
            .await
            .unwrap();

        let store = Arc::new(LeaderboardStore::new());
        store
            .initialize_from_repository(repository.clone(), 4)
            .await
            .unwrap();

        assert_eq!(store.total_players(1, TimeWindow::AllTime).await, 2);
        assert_eq!(store.total_players(2, TimeWindow::AllTime).await, 1);

        let rank = store.player_rank(1, 1, TimeWindow::AllTime).await.unwrap();
        assert_eq!(rank.rank, 2);
        assert_eq!(rank.score, 100);
    }

    #[tokio::test]
    async fn warm_up_tolerates_duplicate_events() {
        let repository = Arc::new(InMemoryScoreRepository::new());
        let event = score(1, 1, 100);
        repository
            .save_score_batch(&[event, event, score(1, 1, 250)])
            .await
            .unwrap();

        let store = Arc::new(LeaderboardStore::new());
        store
            .initialize_from_repository(repository.clone(), 2)
            .await
            .unwrap();

        assert_eq!(store.total_players(1, TimeWindow::AllTime).await, 1);
        let rank = store.player_rank(1, 1, TimeWindow::AllTime).await.unwrap();
        assert_eq!(rank.score, 250);
    }

    #[tokio::test]
    async fn compact_all_covers_every_game() {
        let store = LeaderboardStore::new();
        store.add_score(&score(1, 1, 100)).await;
        store.add_score(&score(2, 1, 200)).await;

        // Fresh entries are never compacted away.
        assert_eq!(store.compact_all().await, 0);
        assert_eq!(store.total_players(1, TimeWindow::Last24Hours).await, 1);
        assert_eq!(store.total_players(2, TimeWindow::Last24Hours).await, 1);
    }
}
