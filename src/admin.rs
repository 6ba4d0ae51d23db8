//! Topic administration.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::directory::ClusterDirectory;
use crate::error::{Result, ShoalError};
use crate::metadata::TopicMetadata;
use crate::transport::{CreateTopicRequest, ErrorCode};

/// An interface for managing topics and inspecting consumer groups.
///
/// Create this object with [`crate::Shoal::admin`].
pub struct TopicAdmin {
    directory: Arc<ClusterDirectory>,
}

impl TopicAdmin {
    pub(crate) fn new(directory: Arc<ClusterDirectory>) -> Self {
        Self { directory }
    }

    /// Create a topic, succeeding quietly if it already exists.
    ///
    /// When the topic exists with a different partition count or replication
    /// factor, creation still succeeds but the mismatch is logged.
    #[instrument(skip(self))]
    pub async fn create_topic(
        &self,
        name: &str,
        partitions: u32,
        replication: u32,
    ) -> Result<()> {
        self.validate_spec(name, partitions, replication).await?;

        let metadata = self.directory.refresh_metadata().await?;
        if let Some(existing) = metadata.topic(name) {
            self.report_existing(existing, partitions, replication);
            return Ok(());
        }

        let connection = self.directory.any_connection().await?;
        let response = connection
            .create_topic(CreateTopicRequest {
                name: name.to_owned(),
                partitions,
                replication,
            })
            .await?;

        match response.error {
            ErrorCode::None => {
                debug!(name, partitions, replication, "topic created");
                self.directory.refresh_metadata().await?;
                Ok(())
            }
            // another client won the race, same idempotent outcome
            ErrorCode::TopicAlreadyExists => {
                let metadata = self.directory.refresh_metadata().await?;
                if let Some(existing) = metadata.topic(name) {
                    self.report_existing(existing, partitions, replication);
                }
                Ok(())
            }
            ErrorCode::InvalidSpec(msg) => Err(ShoalError::InvalidTopicSpec(msg)),
            other => Err(ShoalError::TopicCreate(other.to_string())),
        }
    }

    fn report_existing(&self, existing: &TopicMetadata, partitions: u32, replication: u32) {
        if existing.partition_count() != partitions || existing.replication != replication {
            warn!(
                topic = %existing.name,
                requested_partitions = partitions,
                actual_partitions = existing.partition_count(),
                requested_replication = replication,
                actual_replication = existing.replication,
                "topic already exists with a different spec"
            );
        } else {
            debug!(topic = %existing.name, "topic already exists");
        }
    }

    async fn validate_spec(&self, name: &str, partitions: u32, replication: u32) -> Result<()> {
        if name.is_empty() {
            return Err(ShoalError::InvalidTopicSpec(
                "topic name must not be empty".to_owned(),
            ));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(ShoalError::InvalidTopicSpec(format!(
                "topic name `{name}` contains invalid characters"
            )));
        }
        if partitions == 0 {
            return Err(ShoalError::InvalidTopicSpec(
                "partition count must be at least 1".to_owned(),
            ));
        }
        if replication == 0 {
            return Err(ShoalError::InvalidTopicSpec(
                "replication factor must be at least 1".to_owned(),
            ));
        }
        let metadata = self.directory.current_metadata().await;
        let broker_count = metadata.brokers.len() as u32;
        if broker_count > 0 && replication > broker_count {
            return Err(ShoalError::InvalidTopicSpec(format!(
                "replication factor {replication} exceeds broker count {broker_count}"
            )));
        }
        Ok(())
    }

    /// Application topics of the cluster. Internal bookkeeping topics are
    /// filtered out.
    pub async fn list_topics(&self) -> Result<Vec<TopicMetadata>> {
        let metadata = self.directory.refresh_metadata().await?;
        Ok(metadata
            .topics
            .iter()
            .filter(|topic| !topic.is_internal())
            .cloned()
            .collect())
    }

    pub async fn topic_exists(&self, name: &str) -> Result<bool> {
        let metadata = self.directory.refresh_metadata().await?;
        Ok(metadata.topic(name).is_some())
    }

    /// Known consumer groups as (group id, group type) pairs.
    pub async fn list_consumer_groups(&self) -> Result<Vec<(String, String)>> {
        let connection = self.directory.any_connection().await?;
        let response = connection.list_groups().await?;
        Ok(response.groups)
    }
}
