use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use super::models::{
    PlayerRankResponse, Score, SubmitScoreRequest, TimeWindow, TopLeadersResponse,
};
use super::store::LeaderboardStore;
use crate::pipeline::ScoreProducer;
use crate::repository::ScoreRepository;
use crate::shared::AppError;

/// Facade over the cache, the durable repository and the async producer.
/// Transport-agnostic: the HTTP handlers and the batch consumer both go
/// through it.
pub struct LeaderboardService {
    store: Arc<LeaderboardStore>,
    repository: Arc<dyn ScoreRepository>,
    producer: Option<Arc<ScoreProducer>>,
}

impl LeaderboardService {
    pub fn new(
        store: Arc<LeaderboardStore>,
        repository: Arc<dyn ScoreRepository>,
        producer: Option<Arc<ScoreProducer>>,
    ) -> Self {
        Self {
            store,
            repository,
            producer,
        }
    }

    pub fn store(&self) -> &Arc<LeaderboardStore> {
        &self.store
    }

    pub fn repository(&self) -> &Arc<dyn ScoreRepository> {
        &self.repository
    }

    /// Accepts a score submission: validates, stamps a missing timestamp,
    /// updates the cache, then enqueues for durable persistence.
    ///
    /// Cache-first, so a read issued right after the submit sees it. A full
    /// or closed producer queue is logged and the request still succeeds;
    /// that event is then absent from the durable pipeline.
    #[instrument(skip(self, request), fields(game_id = request.game_id, user_id = request.user_id))]
    pub async fn submit_score(&self, request: SubmitScoreRequest) -> Result<(), AppError> {
        if request.game_id <= 0 || request.user_id <= 0 {
            return Err(AppError::Validation(
                "Invalid game ID or user ID".to_string(),
            ));
        }

        let score = request.into_score(Utc::now());
        self.store.add_score(&score).await;

        if let Some(producer) = &self.producer {
            if let Err(e) = producer.submit(score) {
                warn!(
                    game_id = score.game_id,
                    user_id = score.user_id,
                    error = %e,
                    "Score accepted but not enqueued for durable persistence"
                );
            }
        }

        Ok(())
    }

    /// The consumer's entry point: persists the batch, then applies every
    /// score to the cache. Re-deliveries are harmless because the cache
    /// upsert is idempotent.
    #[instrument(skip(self, scores), fields(batch_size = scores.len()))]
    pub async fn save_batch(&self, scores: &[Score]) -> Result<(), AppError> {
        if scores.is_empty() {
            return Ok(());
        }

        self.repository.save_score_batch(scores).await?;
        self.store.add_score_batch(scores).await;

        info!(batch_size = scores.len(), "Score batch persisted and cached");
        Ok(())
    }

    /// Top `limit` players of a game in the window, with the window's
    /// player count.
    #[instrument(skip(self))]
    pub async fn top_leaders(
        &self,
        game_id: i64,
        limit: usize,
        window: TimeWindow,
    ) -> TopLeadersResponse {
        let leaders = self.store.top_leaders(game_id, limit, window).await;
        let total_players = self.store.total_players(game_id, window).await;
        debug!(
            game_id,
            leaders = leaders.len(),
            total_players,
            "Served top leaders"
        );

        TopLeadersResponse {
            game_id,
            leaders,
            total_players,
            window: window.display().to_string(),
        }
    }

    /// Rank, percentile and best score of a player, or `None` when the
    /// game or player is unknown.
    #[instrument(skip(self))]
    pub async fn player_rank(
        &self,
        game_id: i64,
        user_id: i64,
        window: TimeWindow,
    ) -> Option<PlayerRankResponse> {
        let summary = self.store.player_rank(game_id, user_id, window).await?;

        Some(PlayerRankResponse {
            game_id,
            user_id,
            score: summary.score,
            rank: summary.rank,
            percentile: summary.percentile,
            total_players: summary.total_players,
            window: window.display().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryScoreRepository;

    fn service() -> (Arc<LeaderboardStore>, Arc<InMemoryScoreRepository>, LeaderboardService) {
        let store = Arc::new(LeaderboardStore::new());
        let repository = Arc::new(InMemoryScoreRepository::new());
        let service = LeaderboardService::new(store.clone(), repository.clone(), None);
        (store, repository, service)
    }

    fn request(game_id: i64, user_id: i64, score: u64) -> SubmitScoreRequest {
        SubmitScoreRequest {
            game_id,
            user_id,
            score,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn submit_rejects_non_positive_ids() {
        let (_, _, service) = service();

        let result = service.submit_score(request(0, 1, 100)).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let result = service.submit_score(request(1, -5, 100)).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn submit_updates_the_cache_immediately() {
        let (store, _, service) = service();

        service.submit_score(request(1, 1, 100)).await.unwrap();
        service.submit_score(request(1, 2, 300)).await.unwrap();

        let leaders = store.top_leaders(1, 10, TimeWindow::AllTime).await;
        assert_eq!(leaders.len(), 2);
        assert_eq!(leaders[0].user_id, 2);
    }

    #[tokio::test]
    async fn submit_without_producer_still_succeeds() {
        let (_, repository, service) = service();

        service.submit_score(request(1, 1, 100)).await.unwrap();
        // Durable persistence flows through the pipeline, not the submit.
        assert_eq!(repository.event_count(), 0);
    }

    #[tokio::test]
    async fn save_batch_persists_then_caches() {
        let (store, repository, service) = service();
        let now = Utc::now();
        let scores = [
            Score { game_id: 1, user_id: 1, score: 100, timestamp: now },
            Score { game_id: 1, user_id: 2, score: 200, timestamp: now },
        ];

        service.save_batch(&scores).await.unwrap();

        assert_eq!(repository.event_count(), 2);
        assert_eq!(store.total_players(1, TimeWindow::AllTime).await, 2);
    }

    #[tokio::test]
    async fn responses_carry_the_window_tag() {
        let (_, _, service) = service();
        service.submit_score(request(1, 1, 100)).await.unwrap();

        let top = service.top_leaders(1, 10, TimeWindow::Last24Hours).await;
        assert_eq!(top.window, "24h");
        assert_eq!(top.total_players, 1);

        let rank = service
            .player_rank(1, 1, TimeWindow::AllTime)
            .await
            .unwrap();
        assert_eq!(rank.window, "all");
        assert_eq!(rank.rank, 1);
        assert!((rank.percentile - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unknown_player_or_game_is_none() {
        let (_, _, service) = service();
        assert!(service.player_rank(1, 1, TimeWindow::AllTime).await.is_none());

        service.submit_score(request(1, 1, 100)).await.unwrap();
        assert!(service.player_rank(1, 99, TimeWindow::AllTime).await.is_none());
    }
}
