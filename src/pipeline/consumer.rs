use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use super::broker::MessageBroker;
use crate::leaderboard::models::Score;
use crate::leaderboard::service::LeaderboardService;
use crate::shared::AppError;

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Topic to consume score events from.
    pub topic: String,
    /// Consumer group id, already combined as `{base}-{instance}` so every
    /// process receives the full stream for its own cache.
    pub group: String,
    /// Maximum messages per processed batch.
    pub batch_size: usize,
    /// How long to wait for messages before processing a partial batch.
    pub batch_timeout: Duration,
    /// Backoff after a failed batch.
    pub retry_delay: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: "leaderboard-scores".to_string(),
            group: "score-processor".to_string(),
            batch_size: 5_000,
            batch_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Pulls score events from the broker in batches and hands them to the
/// facade, which persists them and updates the cache. Offsets are committed
/// before the save, so delivery is at-least-once and duplicates are
/// absorbed by the cache's idempotent upsert.
#[instrument(skip(broker, service, shutdown), fields(topic = %config.topic, group = %config.group))]
pub async fn run_consumer(
    broker: Arc<dyn MessageBroker>,
    service: Arc<LeaderboardService>,
    config: ConsumerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Starting score consumer");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("Score consumer shutting down");
                return;
            }
            result = process_batch(broker.as_ref(), service.as_ref(), &config) => {
                if let Err(e) = result {
                    error!(error = %e, "Error processing score batch");
                    tokio::time::sleep(config.retry_delay).await;
                }
            }
        }
    }
}

/// One consume cycle: fetch, decode (skipping poison records), commit,
/// batch-save. Returns the number of scores applied.
pub async fn process_batch(
    broker: &dyn MessageBroker,
    service: &LeaderboardService,
    config: &ConsumerConfig,
) -> Result<usize, AppError> {
    let messages = broker
        .fetch(
            &config.topic,
            &config.group,
            config.batch_size,
            config.batch_timeout,
        )
        .await
        .map_err(|e| AppError::Broker(e.to_string()))?;

    if messages.is_empty() {
        return Ok(0);
    }

    let mut batch = Vec::with_capacity(messages.len());
    let mut offsets = Vec::with_capacity(messages.len());
    for message in &messages {
        // Poison records are committed like any other so the group does
        // not wedge on them.
        offsets.push(message.offset);
        match serde_json::from_slice::<Score>(&message.payload) {
            Ok(score) => batch.push(score),
            Err(e) => {
                warn!(offset = message.offset, error = %e, "Skipping undecodable score message");
            }
        }
    }

    broker
        .commit(&config.topic, &config.group, &offsets)
        .await
        .map_err(|e| AppError::Broker(e.to_string()))?;

    if !batch.is_empty() {
        service.save_batch(&batch).await?;
    }

    Ok(batch.len())
}
