use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::broker::{BrokerRecord, MessageBroker};
use crate::leaderboard::models::Score;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProducerError {
    /// The hand-off queue is at capacity; the caller sees backpressure
    /// instead of unbounded latency.
    #[error("producer queue is full")]
    QueueFull,
    /// The background worker has shut down.
    #[error("producer is closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Topic the score events are published to.
    pub topic: String,
    /// Capacity of the request-thread hand-off queue.
    pub queue_capacity: usize,
    /// Flush once this many events have accumulated.
    pub batch_size: usize,
    /// Flush a partial batch after this long.
    pub flush_interval: Duration,
    /// Deadline for one publish call to the broker.
    pub write_timeout: Duration,
    /// Publish attempts per batch before the batch is dropped.
    pub max_attempts: u32,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            topic: "leaderboard-scores".to_string(),
            queue_capacity: 20_000,
            batch_size: 5_000,
            flush_interval: Duration::from_secs(1),
            write_timeout: Duration::from_secs(15),
            max_attempts: 3,
        }
    }
}

/// Buffered, batched hand-off from request handlers to the broker.
///
/// `submit` never blocks: a full queue surfaces as `QueueFull` and the
/// event is lost from the durable pipeline (the cache was already updated
/// by the facade). One background worker drains the queue, batches, and
/// publishes keyed records.
pub struct ScoreProducer {
    tx: mpsc::Sender<Score>,
}

impl ScoreProducer {
    /// Spawns the background worker and returns the submit handle together
    /// with the worker's join handle.
    pub fn start(
        broker: Arc<dyn MessageBroker>,
        config: ProducerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let handle = tokio::spawn(run_worker(rx, broker, config, shutdown));
        (Self { tx }, handle)
    }

    /// Non-blocking enqueue of a score event.
    pub fn submit(&self, score: Score) -> Result<(), ProducerError> {
        self.tx.try_send(score).map_err(|e| match e {
            TrySendError::Full(_) => ProducerError::QueueFull,
            TrySendError::Closed(_) => ProducerError::Closed,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_channel(capacity: usize) -> (Self, mpsc::Receiver<Score>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[instrument(skip_all, fields(topic = %config.topic))]
async fn run_worker(
    mut rx: mpsc::Receiver<Score>,
    broker: Arc<dyn MessageBroker>,
    config: ProducerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        queue_capacity = config.queue_capacity,
        batch_size = config.batch_size,
        flush_interval_ms = config.flush_interval.as_millis() as u64,
        "Score producer worker started"
    );

    let mut batch: Vec<Score> = Vec::with_capacity(config.batch_size);
    let mut ticker = interval(config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(score) => {
                    batch.push(score);
                    if batch.len() >= config.batch_size {
                        flush(broker.as_ref(), &config, &mut batch).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    flush(broker.as_ref(), &config, &mut batch).await;
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    // Drain whatever is still queued, then flush the final batch.
    while let Ok(score) = rx.try_recv() {
        batch.push(score);
        if batch.len() >= config.batch_size {
            flush(broker.as_ref(), &config, &mut batch).await;
        }
    }
    flush(broker.as_ref(), &config, &mut batch).await;

    info!("Score producer worker stopped");
}

async fn flush(broker: &dyn MessageBroker, config: &ProducerConfig, batch: &mut Vec<Score>) {
    if batch.is_empty() {
        return;
    }

    let records: Vec<BrokerRecord> = batch
        .iter()
        .filter_map(|score| match serde_json::to_vec(score) {
            Ok(payload) => Some(BrokerRecord {
                key: format!("game-{}", score.game_id),
                payload,
            }),
            Err(e) => {
                error!(error = %e, "Failed to serialize score event");
                None
            }
        })
        .collect();
    let count = records.len();

    for attempt in 1..=config.max_attempts {
        match timeout(
            config.write_timeout,
            broker.publish(&config.topic, records.clone()),
        )
        .await
        {
            Ok(Ok(())) => {
                debug!(count, "Published score batch");
                batch.clear();
                return;
            }
            Ok(Err(e)) => {
                warn!(attempt, max_attempts = config.max_attempts, error = %e, "Failed to publish score batch");
            }
            Err(_) => {
                warn!(attempt, max_attempts = config.max_attempts, "Score batch publish timed out");
            }
        }
        tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
    }

    error!(
        count,
        attempts = config.max_attempts,
        "Dropping score batch after exhausting publish attempts"
    );
    batch.clear();
}
