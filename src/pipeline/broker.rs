use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// A record headed for the broker. The key routes all events of one game
/// to the same partition so per-game ordering survives the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRecord {
    pub key: String,
    pub payload: Vec<u8>,
}

/// A record as delivered to a consumer, tagged with its log offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
}

/// Durable-log transport between the score producer and the batch
/// consumer. Offsets are tracked per consumer group: each process derives
/// its own group id, so every instance sees the full stream.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Appends a batch of records to the topic.
    async fn publish(&self, topic: &str, records: Vec<BrokerRecord>) -> Result<(), BrokerError>;

    /// Fetches up to `max` records past the group's position, waiting up to
    /// `wait` for the first one. An empty result means the wait elapsed.
    async fn fetch(
        &self,
        topic: &str,
        group: &str,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<BrokerMessage>, BrokerError>;

    /// Marks offsets as processed for the group. At-least-once: anything
    /// past the committed offset is re-delivered after a group reset.
    async fn commit(&self, topic: &str, group: &str, offsets: &[u64]) -> Result<(), BrokerError>;
}

#[derive(Default)]
struct GroupCursor {
    position: usize,
    committed: Option<u64>,
}

#[derive(Default)]
struct TopicLog {
    records: Vec<BrokerRecord>,
    groups: HashMap<String, GroupCursor>,
}

/// In-process broker: one ordered append-only log per topic with per-group
/// positions and committed offsets. Backs the single-process deployment
/// and the tests; a networked broker client slots in behind the same trait.
#[derive(Default)]
pub struct InMemoryBroker {
    topics: Mutex<HashMap<String, TopicLog>>,
    notify: Notify,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last committed offset for a group, if any.
    pub fn committed_offset(&self, topic: &str, group: &str) -> Option<u64> {
        let topics = self.topics.lock().unwrap();
        topics
            .get(topic)
            .and_then(|log| log.groups.get(group))
            .and_then(|cursor| cursor.committed)
    }

    /// Total records appended to a topic.
    pub fn topic_len(&self, topic: &str) -> usize {
        let topics = self.topics.lock().unwrap();
        topics.get(topic).map(|log| log.records.len()).unwrap_or(0)
    }

    /// Rewinds a group to just past its committed offset, the way a
    /// restarted consumer resumes. Uncommitted records get re-delivered.
    pub fn reset_group(&self, topic: &str, group: &str) {
        let mut topics = self.topics.lock().unwrap();
        if let Some(log) = topics.get_mut(topic) {
            if let Some(cursor) = log.groups.get_mut(group) {
                cursor.position = cursor.committed.map(|o| o as usize + 1).unwrap_or(0);
            }
        }
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, topic: &str, records: Vec<BrokerRecord>) -> Result<(), BrokerError> {
        if records.is_empty() {
            return Ok(());
        }
        {
            let mut topics = self.topics.lock().unwrap();
            let log = topics.entry(topic.to_string()).or_default();
            log.records.extend(records);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn fetch(
        &self,
        topic: &str,
        group: &str,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<BrokerMessage>, BrokerError> {
        let deadline = Instant::now() + wait;

        loop {
            // Arm the notification before checking the log so a publish
            // between the check and the wait is not missed.
            let notified = self.notify.notified();

            {
                let mut topics = self.topics.lock().unwrap();
                let log = topics.entry(topic.to_string()).or_default();
                let cursor = log.groups.entry(group.to_string()).or_default();

                if cursor.position < log.records.len() {
                    let end = (cursor.position + max.max(1)).min(log.records.len());
                    let messages = (cursor.position..end)
                        .map(|i| BrokerMessage {
                            offset: i as u64,
                            key: log.records[i].key.clone(),
                            payload: log.records[i].payload.clone(),
                        })
                        .collect();
                    cursor.position = end;
                    return Ok(messages);
                }
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
            }
        }
    }

    async fn commit(&self, topic: &str, group: &str, offsets: &[u64]) -> Result<(), BrokerError> {
        let Some(&highest) = offsets.iter().max() else {
            return Ok(());
        };
        let mut topics = self.topics.lock().unwrap();
        let log = topics.entry(topic.to_string()).or_default();
        let cursor = log.groups.entry(group.to_string()).or_default();
        cursor.committed = Some(cursor.committed.map_or(highest, |c| c.max(highest)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, payload: &str) -> BrokerRecord {
        BrokerRecord {
            key: key.to_string(),
            payload: payload.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn fetch_preserves_publish_order() {
        let broker = InMemoryBroker::new();
        broker
            .publish("scores", vec![record("game-1", "a"), record("game-1", "b")])
            .await
            .unwrap();
        broker
            .publish("scores", vec![record("game-2", "c")])
            .await
            .unwrap();

        let messages = broker
            .fetch("scores", "g", 10, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].payload, b"a");
        assert_eq!(messages[1].payload, b"b");
        assert_eq!(messages[2].payload, b"c");
        assert_eq!(messages[2].offset, 2);
    }

    #[tokio::test]
    async fn fetch_honors_max_and_advances_position() {
        let broker = InMemoryBroker::new();
        broker
            .publish(
                "scores",
                vec![record("k", "a"), record("k", "b"), record("k", "c")],
            )
            .await
            .unwrap();

        let first = broker
            .fetch("scores", "g", 2, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(first.len(), 2);

        let second = broker
            .fetch("scores", "g", 2, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].offset, 2);
    }

    #[tokio::test]
    async fn fetch_times_out_empty() {
        let broker = InMemoryBroker::new();
        let messages = broker
            .fetch("scores", "g", 10, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn groups_consume_independently() {
        let broker = InMemoryBroker::new();
        broker
            .publish("scores", vec![record("k", "a")])
            .await
            .unwrap();

        let g1 = broker
            .fetch("scores", "group-one", 10, Duration::from_millis(50))
            .await
            .unwrap();
        let g2 = broker
            .fetch("scores", "group-two", 10, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(g1.len(), 1);
        assert_eq!(g2.len(), 1);
    }

    #[tokio::test]
    async fn reset_redelivers_uncommitted_records() {
        let broker = InMemoryBroker::new();
        broker
            .publish("scores", vec![record("k", "a"), record("k", "b")])
            .await
            .unwrap();

        let messages = broker
            .fetch("scores", "g", 10, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        broker.commit("scores", "g", &[0]).await.unwrap();
        assert_eq!(broker.committed_offset("scores", "g"), Some(0));

        // Restart: only the uncommitted record comes back.
        broker.reset_group("scores", "g");
        let replayed = broker
            .fetch("scores", "g", 10, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].payload, b"b");
    }

    #[tokio::test]
    async fn fetch_wakes_on_publish() {
        let broker = std::sync::Arc::new(InMemoryBroker::new());

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move {
                broker
                    .fetch("scores", "g", 10, Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        broker
            .publish("scores", vec![record("k", "a")])
            .await
            .unwrap();

        let messages = waiter.await.unwrap();
        assert_eq!(messages.len(), 1);
    }
}
