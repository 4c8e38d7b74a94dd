use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::models::{
    best_first, percentile, LeaderboardEntry, RankSummary, Score, ScoreRecord, TimeWindow,
    ALL_WINDOWS, WINDOW_COUNT,
};
use crate::ranking::SkipList;

/// Per-game leaderboard: one ranked index per time window.
///
/// Writes and reads both take the window's write lock. The critical
/// sections are short (single index operations), and holding the write
/// lock on reads guarantees a walker never observes a half-relinked index.
pub struct GameLeaderboard {
    boards: [RwLock<SkipList<ScoreRecord>>; WINDOW_COUNT],
}

impl Default for GameLeaderboard {
    fn default() -> Self {
        Self::new()
    }
}

impl GameLeaderboard {
    pub fn new() -> Self {
        Self {
            boards: std::array::from_fn(|_| RwLock::new(SkipList::new(best_first))),
        }
    }

    /// Applies a score to every window the timestamp still belongs to.
    /// Each window keeps only the best record per user.
    pub fn add_score(&self, user_id: i64, score: u64, timestamp: DateTime<Utc>) {
        let now = Utc::now();
        let record = ScoreRecord { score, timestamp };

        for window in ALL_WINDOWS {
            if !window.contains(timestamp, now) {
                continue;
            }
            let mut board = self.boards[window.index()].write();
            board.upsert(user_id, record);
        }
    }

    /// Top `k` entries of the window, best first, ranks starting at 1.
    pub fn top_k(&self, k: usize, window: TimeWindow) -> Vec<LeaderboardEntry> {
        let board = self.boards[window.index()].write();
        board
            .top_k(k)
            .into_iter()
            .map(|(user_id, record, rank)| LeaderboardEntry {
                user_id,
                score: record.score,
                rank,
            })
            .collect()
    }

    /// Rank, percentile and best score for a user, or `None` when the user
    /// has no entry in the window.
    pub fn rank_and_percentile(&self, user_id: i64, window: TimeWindow) -> Option<RankSummary> {
        let board = self.boards[window.index()].write();
        let record = *board.lookup(user_id)?;
        let rank = board.rank(user_id)? as u64;
        let total = board.len() as u64;

        Some(RankSummary {
            rank,
            percentile: percentile(rank, total),
            score: record.score,
            total_players: total,
        })
    }

    /// Number of distinct users in the window.
    pub fn total_players(&self, window: TimeWindow) -> u64 {
        self.boards[window.index()].write().len() as u64
    }

    /// Drops entries that have aged out of their window. The all-time index
    /// is never compacted. Entries that expired since the last pass remain
    /// visible until this runs; callers schedule it explicitly.
    pub fn compact_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;

        for window in ALL_WINDOWS {
            let Some(cutoff) = window.cutoff(now) else {
                continue;
            };
            let mut board = self.boards[window.index()].write();
            let expired = board.scan_expired(|record| record.timestamp <= cutoff);
            for (user_id, _) in &expired {
                board.delete(*user_id);
            }
            if !expired.is_empty() {
                debug!(
                    window = window.display(),
                    removed = expired.len(),
                    "Compacted expired leaderboard entries"
                );
            }
            removed += expired.len();
        }

        removed
    }

    /// Batch variant of `add_score` used during replay warm-up.
    pub fn add_score_batch(&self, scores: &[Score]) {
        for score in scores {
            self.add_score(score.user_id, score.score, score.timestamp);
        }
    }
}
