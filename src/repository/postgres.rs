use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{Executor, PgPool, Row};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::ScoreRepository;
use crate::config::DatabaseConfig;
use crate::leaderboard::models::{percentile, LeaderboardEntry, RankSummary, Score, TimeWindow};
use crate::shared::AppError;

const SINGLE_WRITE_DEADLINE: Duration = Duration::from_secs(5);
const BATCH_WRITE_DEADLINE: Duration = Duration::from_secs(10);
const READ_DEADLINE: Duration = Duration::from_secs(5);
const REPLAY_READ_DEADLINE: Duration = Duration::from_secs(15);

const CONNECT_ATTEMPTS: u32 = 5;

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS scores (
    id BIGSERIAL PRIMARY KEY,
    game_id BIGINT NOT NULL,
    user_id BIGINT NOT NULL,
    score BIGINT NOT NULL,
    timestamp TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_scores_game_user ON scores (game_id, user_id);
CREATE INDEX IF NOT EXISTS idx_scores_game_score ON scores (game_id, score DESC);
CREATE INDEX IF NOT EXISTS idx_scores_timestamp ON scores (timestamp);
"#;

const INSERT_SCORE: &str =
    "INSERT INTO scores (game_id, user_id, score, timestamp) VALUES ($1, $2, $3, $4)";

const TOP_LEADERS: &str = r#"
SELECT user_id, score, rank
FROM (
    SELECT user_id, score, RANK() OVER (ORDER BY score DESC) AS rank
    FROM (
        SELECT DISTINCT ON (user_id) user_id, score
        FROM scores
        WHERE game_id = $1
        ORDER BY user_id, score DESC
    ) AS best_scores
) ranked_scores
WHERE rank <= $2
ORDER BY rank
"#;

const TOP_LEADERS_WINDOWED: &str = r#"
SELECT user_id, score, rank
FROM (
    SELECT user_id, score, RANK() OVER (ORDER BY score DESC) AS rank
    FROM (
        SELECT DISTINCT ON (user_id) user_id, score
        FROM scores
        WHERE game_id = $1 AND timestamp BETWEEN $3 AND $4
        ORDER BY user_id, score DESC
    ) AS best_scores
) ranked_scores
WHERE rank <= $2
ORDER BY rank
"#;

const BEST_SCORE: &str = "SELECT MAX(score) FROM scores WHERE game_id = $1 AND user_id = $2";

const BEST_SCORE_WINDOWED: &str = "SELECT MAX(score) FROM scores WHERE game_id = $1 AND user_id = $2 AND timestamp BETWEEN $3 AND $4";

const RANK_AND_TOTAL: &str = r#"
WITH player_scores AS (
    SELECT DISTINCT ON (user_id) user_id, score
    FROM scores
    WHERE game_id = $1
    ORDER BY user_id, score DESC
)
SELECT
    (SELECT COUNT(*) FROM player_scores WHERE score > $2) + 1 AS rank,
    (SELECT COUNT(*) FROM player_scores) AS total
"#;

const RANK_AND_TOTAL_WINDOWED: &str = r#"
WITH player_scores AS (
    SELECT DISTINCT ON (user_id) user_id, score
    FROM scores
    WHERE game_id = $1 AND timestamp BETWEEN $3 AND $4
    ORDER BY user_id, score DESC
)
SELECT
    (SELECT COUNT(*) FROM player_scores WHERE score > $2) + 1 AS rank,
    (SELECT COUNT(*) FROM player_scores) AS total
"#;

/// PostgreSQL-backed score repository over a bounded connection pool.
pub struct PostgresScoreRepository {
    pool: PgPool,
}

impl PostgresScoreRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects with retry and bootstraps the schema.
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self, AppError> {
        let options = PgConnectOptions::new()
            .host(&cfg.host)
            .port(cfg.port)
            .username(&cfg.user)
            .password(&cfg.password)
            .database(&cfg.name)
            .ssl_mode(cfg.sslmode.parse().unwrap_or(PgSslMode::Prefer));

        let mut last_error = String::new();
        for attempt in 1..=CONNECT_ATTEMPTS {
            match PgPoolOptions::new()
                .max_connections(25)
                .min_connections(5)
                .max_lifetime(Duration::from_secs(5 * 60))
                .connect_with(options.clone())
                .await
            {
                Ok(pool) => {
                    info!(host = %cfg.host, database = %cfg.name, "Connected to PostgreSQL");
                    let repo = Self::new(pool);
                    repo.init_schema().await?;
                    return Ok(repo);
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = CONNECT_ATTEMPTS,
                        error = %e,
                        "Failed to connect to PostgreSQL"
                    );
                    last_error = e.to_string();
                    tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                }
            }
        }

        Err(AppError::Database(format!(
            "failed to connect after {} attempts: {}",
            CONNECT_ATTEMPTS, last_error
        )))
    }

    /// Creates the `scores` table and its indexes when missing.
    pub async fn init_schema(&self) -> Result<(), AppError> {
        self.pool
            .execute(INIT_SQL)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        debug!("Schema initialized");
        Ok(())
    }
}

#[async_trait]
impl ScoreRepository for PostgresScoreRepository {
    #[instrument(skip(self, score))]
    async fn save_score(&self, score: &Score) -> Result<(), AppError> {
        let insert = sqlx::query(INSERT_SCORE)
            .bind(score.game_id)
            .bind(score.user_id)
            .bind(score.score as i64)
            .bind(score.timestamp)
            .execute(&self.pool);

        timeout(SINGLE_WRITE_DEADLINE, insert)
            .await
            .map_err(|_| AppError::Database("score insert timed out".to_string()))?
            .map_err(|e| {
                warn!(error = %e, "Failed to insert score");
                AppError::Database(e.to_string())
            })?;

        Ok(())
    }

    #[instrument(skip(self, scores), fields(batch_size = scores.len()))]
    async fn save_score_batch(&self, scores: &[Score]) -> Result<(), AppError> {
        if scores.is_empty() {
            return Ok(());
        }

        let batch = async {
            let mut tx = self.pool.begin().await?;
            for score in scores {
                sqlx::query(INSERT_SCORE)
                    .bind(score.game_id)
                    .bind(score.user_id)
                    .bind(score.score as i64)
                    .bind(score.timestamp)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await
        };

        timeout(BATCH_WRITE_DEADLINE, batch)
            .await
            .map_err(|_| AppError::Database("batch insert timed out".to_string()))?
            .map_err(|e: sqlx::Error| {
                warn!(error = %e, "Failed to insert score batch");
                AppError::Database(e.to_string())
            })?;

        debug!(batch_size = scores.len(), "Score batch persisted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn all_game_ids(&self) -> Result<Vec<i64>, AppError> {
        let query =
            sqlx::query("SELECT DISTINCT game_id FROM scores ORDER BY game_id").fetch_all(&self.pool);

        let rows = timeout(REPLAY_READ_DEADLINE, query)
            .await
            .map_err(|_| AppError::Database("game id listing timed out".to_string()))?
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(rows.iter().map(|row| row.get("game_id")).collect())
    }

    #[instrument(skip(self))]
    async fn all_scores_for_game(&self, game_id: i64) -> Result<Vec<Score>, AppError> {
        let query = sqlx::query(
            "SELECT game_id, user_id, score, timestamp FROM scores WHERE game_id = $1 ORDER BY timestamp DESC",
        )
        .bind(game_id)
        .fetch_all(&self.pool);

        let rows = timeout(REPLAY_READ_DEADLINE, query)
            .await
            .map_err(|_| AppError::Database("score replay fetch timed out".to_string()))?
            .map_err(|e| AppError::Database(e.to_string()))?;

        let scores = rows
            .iter()
            .map(|row| Score {
                game_id: row.get("game_id"),
                user_id: row.get("user_id"),
                score: row.get::<i64, _>("score") as u64,
                timestamp: row.get("timestamp"),
            })
            .collect();

        Ok(scores)
    }

    #[instrument(skip(self))]
    async fn top_leaders_authoritative(
        &self,
        game_id: i64,
        limit: i64,
        window: TimeWindow,
    ) -> Result<Vec<LeaderboardEntry>, AppError> {
        let now = Utc::now();
        let query = match window.cutoff(now) {
            Some(start) => sqlx::query(TOP_LEADERS_WINDOWED)
                .bind(game_id)
                .bind(limit)
                .bind(start)
                .bind(now),
            None => sqlx::query(TOP_LEADERS).bind(game_id).bind(limit),
        };

        let rows = timeout(READ_DEADLINE, query.fetch_all(&self.pool))
            .await
            .map_err(|_| AppError::Database("top leaders query timed out".to_string()))?
            .map_err(|e| AppError::Database(e.to_string()))?;

        let entries = rows
            .iter()
            .map(|row| LeaderboardEntry {
                user_id: row.get("user_id"),
                score: row.get::<i64, _>("score") as u64,
                rank: row.get::<i64, _>("rank") as u64,
            })
            .collect();

        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn player_rank_authoritative(
        &self,
        game_id: i64,
        user_id: i64,
        window: TimeWindow,
    ) -> Result<Option<RankSummary>, AppError> {
        let now = Utc::now();

        let best_query = match window.cutoff(now) {
            Some(start) => sqlx::query(BEST_SCORE_WINDOWED)
                .bind(game_id)
                .bind(user_id)
                .bind(start)
                .bind(now),
            None => sqlx::query(BEST_SCORE).bind(game_id).bind(user_id),
        };

        let best_row = timeout(READ_DEADLINE, best_query.fetch_one(&self.pool))
            .await
            .map_err(|_| AppError::Database("best score query timed out".to_string()))?
            .map_err(|e| AppError::Database(e.to_string()))?;

        let Some(best) = best_row.get::<Option<i64>, _>(0) else {
            return Ok(None);
        };

        let rank_query = match window.cutoff(now) {
            Some(start) => sqlx::query(RANK_AND_TOTAL_WINDOWED)
                .bind(game_id)
                .bind(best)
                .bind(start)
                .bind(now),
            None => sqlx::query(RANK_AND_TOTAL).bind(game_id).bind(best),
        };

        let row = timeout(READ_DEADLINE, rank_query.fetch_one(&self.pool))
            .await
            .map_err(|_| AppError::Database("rank query timed out".to_string()))?
            .map_err(|e| AppError::Database(e.to_string()))?;

        let rank = row.get::<i64, _>("rank") as u64;
        let total = row.get::<i64, _>("total") as u64;

        Ok(Some(RankSummary {
            rank,
            percentile: percentile(rank, total),
            score: best as u64,
            total_players: total,
        }))
    }
}
