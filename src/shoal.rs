use std::sync::Arc;

use tracing::{info, instrument};

use crate::admin::TopicAdmin;
use crate::config::ClientConfig;
use crate::consumer::{Consumer, ConsumerConfig};
use crate::directory::ClusterDirectory;
use crate::error::Result;
use crate::metadata::ClusterSummary;
use crate::producer::{Producer, ProducerConfig};
use crate::transport::BrokerConnector;

/// An interface for interacting with the cluster.
///
/// All producers, consumers and admin handles created from one `Shoal`
/// share the same topology cache and broker connections.
pub struct Shoal {
    directory: Arc<ClusterDirectory>,
    config: Arc<ClientConfig>,
}

impl Shoal {
    /// Connect with the given transport connector and configuration.
    ///
    /// The bootstrap endpoints are tried in order; the first broker that
    /// answers supplies the initial topology snapshot.
    #[instrument(skip(connector, config))]
    pub async fn connect(connector: Arc<dyn BrokerConnector>, config: ClientConfig) -> Result<Self> {
        let config = Arc::new(config);
        info!(
            client_id = config.client_id.as_deref().unwrap_or("-"),
            endpoints = config.bootstrap.len(),
            "connecting to cluster"
        );
        let directory = ClusterDirectory::connect(connector, config.clone()).await?;
        Ok(Self { directory, config })
    }

    /// Topic administration handle.
    pub fn admin(&self) -> TopicAdmin {
        TopicAdmin::new(self.directory.clone())
    }

    /// Producer with defaults taken from the client configuration.
    pub fn producer(&self) -> Producer {
        let config = ProducerConfig {
            ack_level: self.config.ack_level,
            send_timeout: self.config.send_timeout,
            ..Default::default()
        };
        Producer::new(self.directory.clone(), config)
    }

    /// Producer with an explicit [`ProducerConfig`].
    pub fn producer_with_config(&self, config: ProducerConfig) -> Producer {
        Producer::new(self.directory.clone(), config)
    }

    /// Subscribe a consumer to `topics` as a member of `group_id`,
    /// with defaults taken from the client configuration.
    pub async fn consumer(
        &self,
        group_id: impl Into<String>,
        topics: Vec<String>,
    ) -> Result<Consumer> {
        let config = ConsumerConfig {
            offset_reset: self.config.offset_reset,
            auto_commit: self.config.auto_commit,
            ..Default::default()
        };
        self.consumer_with_config(group_id, topics, config).await
    }

    /// Subscribe a consumer with an explicit [`ConsumerConfig`].
    pub async fn consumer_with_config(
        &self,
        group_id: impl Into<String>,
        topics: Vec<String>,
        config: ConsumerConfig,
    ) -> Result<Consumer> {
        Consumer::subscribe(self.directory.clone(), config, group_id.into(), topics).await
    }

    /// Force a metadata refresh and return the condensed topology.
    pub async fn cluster_summary(&self) -> Result<ClusterSummary> {
        let metadata = self.directory.refresh_metadata().await?;
        Ok(ClusterSummary {
            cluster_id: metadata.cluster_id.clone(),
            brokers: metadata.brokers.clone(),
            topics: metadata
                .topics
                .iter()
                .filter(|topic| !topic.is_internal())
                .map(|topic| topic.name.clone())
                .collect(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}
