use std::time::Duration;

use derive_builder::Builder;

use crate::config::AckLevel;
use crate::producer::partitioning::{Partitioner, SiphashRoundRobinPartitioner};

const DEFAULT_LINGER_MS: u64 = 100;
const DEFAULT_BATCH_SIZE_BYTES: usize = 16_384;
const DEFAULT_SEND_TIMEOUT_MS: u64 = 1500;
const DEFAULT_SEND_RETRIES: u32 = 3;

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE_BYTES
}

fn default_linger_duration() -> Duration {
    Duration::from_millis(DEFAULT_LINGER_MS)
}

fn default_send_timeout() -> Duration {
    Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS)
}

fn default_send_retries() -> u32 {
    DEFAULT_SEND_RETRIES
}

fn default_partitioner() -> Box<dyn Partitioner + Send + Sync> {
    Box::new(SiphashRoundRobinPartitioner::new())
}

/// Options used to adjust the behavior of the Producer.
/// Create this struct with [`ProducerConfigBuilder`].
///
/// Create a producer with a custom config with [`crate::Shoal::producer_with_config`].
#[derive(Builder)]
#[builder(pattern = "owned")]
pub struct ProducerConfig {
    /// Maximum amount of bytes accumulated by the records before sending the batch.
    #[builder(default = "default_batch_size()")]
    pub(crate) batch_size: usize,
    /// Time to wait before sending buffered records to the cluster.
    #[builder(default = "default_linger_duration()")]
    pub(crate) linger: Duration,
    /// Durability level each batch waits for.
    #[builder(default)]
    pub(crate) ack_level: AckLevel,
    /// How long a single produce request may take before the batch fails.
    #[builder(default = "default_send_timeout()")]
    pub(crate) send_timeout: Duration,
    /// How many times a batch is re-sent after a leadership move.
    #[builder(default = "default_send_retries()")]
    pub(crate) send_retries: u32,
    /// Partitioner assigns the partition to each record that needs to be sent
    #[builder(default = "default_partitioner()")]
    pub(crate) partitioner: Box<dyn Partitioner + Send + Sync>,
}

impl ProducerConfig {
    pub fn builder() -> ProducerConfigBuilder {
        ProducerConfigBuilder::default()
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            linger: default_linger_duration(),
            ack_level: AckLevel::default(),
            send_timeout: default_send_timeout(),
            send_retries: default_send_retries(),
            partitioner: default_partitioner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = ProducerConfig::builder()
            .linger(Duration::from_millis(5))
            .build()
            .expect("config should build");
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE_BYTES);
        assert_eq!(config.linger, Duration::from_millis(5));
        assert_eq!(config.ack_level, AckLevel::Leader);
    }
}
