use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{info, instrument};

use super::store::LeaderboardStore;

/// Configuration for the window compaction task.
///
/// Compaction is off by default: entries that age out of the 24h/3d/7d
/// windows then stay visible to `top_k` and `rank` until a pass runs.
/// Enabling it trades a periodic O(n) walk per window for fresh membership.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// How often to sweep the windowed indexes.
    pub interval: Duration,
    /// Whether the background task should run at all.
    pub enabled: bool,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            enabled: false,
        }
    }
}

/// Periodically drops entries that have fallen out of their time window
/// across every cached game.
#[instrument(skip(store, config))]
pub async fn start_compaction_task(store: Arc<LeaderboardStore>, config: CompactionConfig) {
    info!(
        interval_secs = config.interval.as_secs(),
        "Starting leaderboard compaction background task"
    );

    let mut ticker = interval(config.interval);

    loop {
        ticker.tick().await;

        let removed = store.compact_all().await;
        info!(removed, "Leaderboard compaction completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaderboard::models::{Score, TimeWindow};
    use chrono::Utc;

    #[test]
    fn compaction_is_disabled_by_default() {
        let config = CompactionConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.interval, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn compact_all_leaves_fresh_entries_alone() {
        let store = Arc::new(LeaderboardStore::new());
        store
            .add_score(&Score {
                game_id: 1,
                user_id: 1,
                score: 100,
                timestamp: Utc::now(),
            })
            .await;

        assert_eq!(store.compact_all().await, 0);
        assert_eq!(store.total_players(1, TimeWindow::Last24Hours).await, 1);
    }
}
