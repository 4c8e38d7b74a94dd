use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument};

use super::ScoreRepository;
use crate::leaderboard::models::{percentile, LeaderboardEntry, RankSummary, Score, TimeWindow};
use crate::shared::AppError;

/// In-memory implementation of `ScoreRepository` for development and tests.
///
/// Mirrors the SQL semantics of the Postgres implementation (best score per
/// user, `RANK()`-style shared ranks on score ties) so it can stand in for
/// it in integration tests. Data is lost when the process exits.
pub struct InMemoryScoreRepository {
    scores: Mutex<Vec<Score>>,
}

impl Default for InMemoryScoreRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryScoreRepository {
    pub fn new() -> Self {
        Self {
            scores: Mutex::new(Vec::new()),
        }
    }

    /// Number of stored score events, duplicates included.
    pub fn event_count(&self) -> usize {
        self.scores.lock().unwrap().len()
    }

    /// Best score per user for a game within the window, sorted best first.
    fn best_scores(&self, game_id: i64, window: TimeWindow) -> Vec<(i64, u64)> {
        let now = Utc::now();
        let cutoff = window.cutoff(now);
        let scores = self.scores.lock().unwrap();

        let mut best: HashMap<i64, u64> = HashMap::new();
        for score in scores.iter() {
            if score.game_id != game_id {
                continue;
            }
            if let Some(cutoff) = cutoff {
                if score.timestamp < cutoff || score.timestamp > now {
                    continue;
                }
            }
            let entry = best.entry(score.user_id).or_insert(score.score);
            if score.score > *entry {
                *entry = score.score;
            }
        }

        let mut ordered: Vec<(i64, u64)> = best.into_iter().collect();
        ordered.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ordered
    }
}

#[async_trait]
impl ScoreRepository for InMemoryScoreRepository {
    #[instrument(skip(self, score))]
    async fn save_score(&self, score: &Score) -> Result<(), AppError> {
        self.scores.lock().unwrap().push(*score);
        Ok(())
    }

    #[instrument(skip(self, scores), fields(batch_size = scores.len()))]
    async fn save_score_batch(&self, scores: &[Score]) -> Result<(), AppError> {
        self.scores.lock().unwrap().extend_from_slice(scores);
        debug!(batch_size = scores.len(), "Score batch stored in memory");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn all_game_ids(&self) -> Result<Vec<i64>, AppError> {
        let scores = self.scores.lock().unwrap();
        let mut ids: Vec<i64> = scores.iter().map(|s| s.game_id).collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn all_scores_for_game(&self, game_id: i64) -> Result<Vec<Score>, AppError> {
        let scores = self.scores.lock().unwrap();
        let mut game_scores: Vec<Score> = scores
            .iter()
            .filter(|s| s.game_id == game_id)
            .copied()
            .collect();
        game_scores.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(game_scores)
    }

    #[instrument(skip(self))]
    async fn top_leaders_authoritative(
        &self,
        game_id: i64,
        limit: i64,
        window: TimeWindow,
    ) -> Result<Vec<LeaderboardEntry>, AppError> {
        let ordered = self.best_scores(game_id, window);

        let mut entries = Vec::new();
        let mut previous: Option<(u64, u64)> = None;
        for (position, (user_id, score)) in ordered.into_iter().enumerate() {
            let rank = match previous {
                Some((prev_score, prev_rank)) if prev_score == score => prev_rank,
                _ => position as u64 + 1,
            };
            if rank > limit.max(0) as u64 {
                break;
            }
            previous = Some((score, rank));
            entries.push(LeaderboardEntry {
                user_id,
                score,
                rank,
            });
        }

        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn player_rank_authoritative(
        &self,
        game_id: i64,
        user_id: i64,
        window: TimeWindow,
    ) -> Result<Option<RankSummary>, AppError> {
        let ordered = self.best_scores(game_id, window);
        let Some(&(_, best)) = ordered.iter().find(|(uid, _)| *uid == user_id) else {
            return Ok(None);
        };

        let better = ordered.iter().filter(|(_, score)| *score > best).count() as u64;
        let rank = better + 1;
        let total = ordered.len() as u64;

        Ok(Some(RankSummary {
            rank,
            percentile: percentile(rank, total),
            score: best,
            total_players: total,
        }))
    }
}
