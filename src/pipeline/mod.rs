pub mod broker;
pub mod consumer;
pub mod producer;

pub use broker::{BrokerError, BrokerMessage, BrokerRecord, InMemoryBroker, MessageBroker};
pub use consumer::{run_consumer, ConsumerConfig};
pub use producer::{ProducerConfig, ProducerError, ScoreProducer};
