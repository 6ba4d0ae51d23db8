use std::time::Duration;

use derive_builder::Builder;

use crate::config::OffsetReset;
use crate::error::{Result, ShoalError};

const DEFAULT_MAX_POLL_RECORDS: u32 = 500;
const DEFAULT_FETCH_BACKOFF: Duration = Duration::from_millis(10);

/// Options used to adjust the behavior of the Consumer.
/// Create this struct with [`ConsumerConfigBuilder`].
#[derive(Debug, Clone, Builder)]
#[builder(build_fn(private, name = "build_impl"))]
pub struct ConsumerConfig {
    /// Where to start reading when the group has no committed offset.
    #[builder(default)]
    pub(crate) offset_reset: OffsetReset,
    /// Commit delivered offsets automatically at the end of each poll.
    #[builder(default)]
    pub(crate) auto_commit: bool,
    /// Upper bound on records returned from a single poll.
    #[builder(default = "DEFAULT_MAX_POLL_RECORDS")]
    pub(crate) max_poll_records: u32,
    /// Pause between empty fetch rounds while a poll is waiting for data.
    #[builder(default = "DEFAULT_FETCH_BACKOFF")]
    pub(crate) fetch_backoff: Duration,
}

impl ConsumerConfig {
    pub fn builder() -> ConsumerConfigBuilder {
        ConsumerConfigBuilder::default()
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            offset_reset: OffsetReset::default(),
            auto_commit: false,
            max_poll_records: DEFAULT_MAX_POLL_RECORDS,
            fetch_backoff: DEFAULT_FETCH_BACKOFF,
        }
    }
}

impl ConsumerConfigBuilder {
    pub fn build(&self) -> Result<ConsumerConfig> {
        let config = self
            .build_impl()
            .map_err(|e| ShoalError::ConsumerConfig(e.to_string()))?;
        if config.max_poll_records == 0 {
            return Err(ShoalError::ConsumerConfig(
                "max_poll_records must be at least 1".to_owned(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = ConsumerConfig::builder()
            .auto_commit(true)
            .build()
            .expect("config should build");
        assert!(config.auto_commit);
        assert_eq!(config.max_poll_records, DEFAULT_MAX_POLL_RECORDS);
        assert_eq!(config.offset_reset, OffsetReset::Earliest);
    }

    #[test]
    fn test_zero_poll_budget_rejected() {
        let result = ConsumerConfig::builder().max_poll_records(0u32).build();
        assert!(result.is_err());
    }
}
