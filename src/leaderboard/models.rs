use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A raw score event as submitted by a client and carried through the
/// ingestion pipeline and the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub game_id: i64,
    pub user_id: i64,
    pub score: u64,
    pub timestamp: DateTime<Utc>,
}

/// Request body for score submission. The timestamp is optional; the
/// service stamps the current time when it is missing.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitScoreRequest {
    pub game_id: i64,
    pub user_id: i64,
    pub score: u64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl SubmitScoreRequest {
    /// Materializes the event, stamping `now` when no timestamp was given.
    pub fn into_score(self, now: DateTime<Utc>) -> Score {
        Score {
            game_id: self.game_id,
            user_id: self.user_id,
            score: self.score,
            timestamp: self.timestamp.unwrap_or(now),
        }
    }
}

/// The best record retained for a user inside one window index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreRecord {
    pub score: u64,
    pub timestamp: DateTime<Utc>,
}

/// Best-first ordering: higher score wins, ties go to the earlier
/// timestamp (first to reach the score keeps the spot).
pub fn best_first(a: &ScoreRecord, b: &ScoreRecord) -> Ordering {
    b.score.cmp(&a.score).then(a.timestamp.cmp(&b.timestamp))
}

/// The four predefined leaderboard time windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeWindow {
    AllTime,
    Last24Hours,
    Last3Days,
    Last7Days,
}

/// Number of window indexes each game leaderboard holds.
pub const WINDOW_COUNT: usize = 4;

/// All windows in index order.
pub const ALL_WINDOWS: [TimeWindow; WINDOW_COUNT] = [
    TimeWindow::AllTime,
    TimeWindow::Last24Hours,
    TimeWindow::Last3Days,
    TimeWindow::Last7Days,
];

impl TimeWindow {
    /// Window length in hours; 0 means unbounded.
    pub fn hours(&self) -> i64 {
        match self {
            TimeWindow::AllTime => 0,
            TimeWindow::Last24Hours => 24,
            TimeWindow::Last3Days => 72,
            TimeWindow::Last7Days => 168,
        }
    }

    /// Tag used in query parameters and responses.
    pub fn display(&self) -> &'static str {
        match self {
            TimeWindow::AllTime => "all",
            TimeWindow::Last24Hours => "24h",
            TimeWindow::Last3Days => "3d",
            TimeWindow::Last7Days => "7d",
        }
    }

    /// Array index of this window inside a game leaderboard.
    pub fn index(&self) -> usize {
        match self {
            TimeWindow::AllTime => 0,
            TimeWindow::Last24Hours => 1,
            TimeWindow::Last3Days => 2,
            TimeWindow::Last7Days => 3,
        }
    }

    /// Parses the `window` query parameter. Unknown values fall back to
    /// all-time rather than erroring.
    pub fn from_query_param(window: &str) -> TimeWindow {
        match window {
            "24h" => TimeWindow::Last24Hours,
            "3d" => TimeWindow::Last3Days,
            "7d" => TimeWindow::Last7Days,
            _ => TimeWindow::AllTime,
        }
    }

    /// Oldest timestamp still inside the window, or `None` for all-time.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let hours = self.hours();
        if hours <= 0 {
            return None;
        }
        Some(now - Duration::hours(hours))
    }

    /// Whether a score with `timestamp` belongs to this window at `now`.
    pub fn contains(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.cutoff(now) {
            Some(cutoff) => timestamp > cutoff,
            None => true,
        }
    }
}

/// A player's standing within one window: cache reads and the
/// authoritative SQL path both produce this shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankSummary {
    pub rank: u64,
    pub percentile: f64,
    pub score: u64,
    pub total_players: u64,
}

/// Percentile of a rank among `total` players: the top rank maps to 100,
/// the last rank to `100/total`. Clamped to `[0, 100]`.
pub fn percentile(rank: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let value = 100.0 * (total - rank + 1) as f64 / total as f64;
    value.clamp(0.0, 100.0)
}

/// A player's position on a leaderboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: i64,
    pub score: u64,
    pub rank: u64,
}

/// Response for the top leaders endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopLeadersResponse {
    pub game_id: i64,
    pub leaders: Vec<LeaderboardEntry>,
    pub total_players: u64,
    pub window: String,
}

/// Response for the player rank endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRankResponse {
    pub game_id: i64,
    pub user_id: i64,
    pub score: u64,
    pub rank: u64,
    pub percentile: f64,
    pub total_players: u64,
    pub window: String,
}

/// Response for the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_query_param_parsing() {
        assert_eq!(TimeWindow::from_query_param(""), TimeWindow::AllTime);
        assert_eq!(TimeWindow::from_query_param("24h"), TimeWindow::Last24Hours);
        assert_eq!(TimeWindow::from_query_param("3d"), TimeWindow::Last3Days);
        assert_eq!(TimeWindow::from_query_param("7d"), TimeWindow::Last7Days);
        assert_eq!(TimeWindow::from_query_param("48h"), TimeWindow::AllTime);
        assert_eq!(TimeWindow::from_query_param("bogus"), TimeWindow::AllTime);
    }

    #[test]
    fn window_membership_uses_cutoff() {
        let now = Utc::now();
        let w = TimeWindow::Last24Hours;
        assert!(w.contains(now, now));
        assert!(w.contains(now - Duration::hours(23), now));
        assert!(!w.contains(now - Duration::hours(25), now));
        assert!(TimeWindow::AllTime.contains(now - Duration::days(400), now));
    }

    #[test]
    fn comparator_prefers_higher_score_then_earlier_time() {
        let now = Utc::now();
        let high = ScoreRecord { score: 200, timestamp: now };
        let low = ScoreRecord { score: 100, timestamp: now };
        assert_eq!(best_first(&high, &low), Ordering::Less);
        assert_eq!(best_first(&low, &high), Ordering::Greater);

        let early = ScoreRecord { score: 100, timestamp: now - Duration::seconds(5) };
        let late = ScoreRecord { score: 100, timestamp: now };
        assert_eq!(best_first(&early, &late), Ordering::Less);
        assert_eq!(best_first(&early, &early), Ordering::Equal);
    }

    #[test]
    fn submit_request_defaults_timestamp() {
        let now = Utc::now();
        let req = SubmitScoreRequest {
            game_id: 1,
            user_id: 2,
            score: 30,
            timestamp: None,
        };
        assert_eq!(req.into_score(now).timestamp, now);

        let fixed = now - Duration::hours(1);
        let req = SubmitScoreRequest {
            game_id: 1,
            user_id: 2,
            score: 30,
            timestamp: Some(fixed),
        };
        assert_eq!(req.into_score(now).timestamp, fixed);
    }

    #[test]
    fn percentile_rewards_the_top_rank() {
        assert!((percentile(1, 4) - 100.0).abs() < 1e-9);
        assert!((percentile(3, 4) - 50.0).abs() < 1e-9);
        assert!((percentile(4, 4) - 25.0).abs() < 1e-9);
        assert_eq!(percentile(1, 0), 0.0);
    }

    #[test]
    fn score_json_round_trip() {
        let score = Score {
            game_id: 7,
            user_id: 42,
            score: 9000,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&score).unwrap();
        let back: Score = serde_json::from_str(&json).unwrap();
        assert_eq!(back, score);
    }
}
