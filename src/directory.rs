//! Cluster directory: topology discovery and broker connection pooling.
//!
//! One directory is shared by every producer, consumer and admin handle of a
//! client. It owns the current [`ClusterMetadata`] snapshot and a pool of
//! per-broker connections, and is the only place that dials brokers.

use std::collections::HashMap;
use std::sync::Arc;

use adaptive_backoff::prelude::{
    Backoff, BackoffBuilder, ExponentialBackoff, ExponentialBackoffBuilder,
};
use async_lock::{Mutex, RwLock};
use tracing::{debug, instrument, warn};

use crate::config::{parse_endpoint, ClientConfig};
use crate::error::{Result, ShoalError};
use crate::metadata::ClusterMetadata;
use crate::transport::{BrokerConnector, SharedConnection};
use crate::types::{NodeId, ReplicaKey};

const BACKOFF_FACTOR: f64 = 1.5;
const BACKOFF_MIN: std::time::Duration = std::time::Duration::from_millis(50);
const BACKOFF_MAX: std::time::Duration = std::time::Duration::from_secs(2);

pub(crate) struct ClusterDirectory {
    connector: Arc<dyn BrokerConnector>,
    config: Arc<ClientConfig>,
    metadata: RwLock<Arc<ClusterMetadata>>,
    pool: Mutex<HashMap<NodeId, SharedConnection>>,
    seed: RwLock<Option<SharedConnection>>,
}

impl ClusterDirectory {
    /// Dial the bootstrap list in order and load the first topology snapshot.
    #[instrument(skip(connector, config))]
    pub(crate) async fn connect(
        connector: Arc<dyn BrokerConnector>,
        config: Arc<ClientConfig>,
    ) -> Result<Arc<Self>> {
        let directory = Arc::new(Self {
            connector,
            config,
            metadata: RwLock::new(Arc::new(ClusterMetadata::default())),
            pool: Mutex::new(HashMap::new()),
            seed: RwLock::new(None),
        });

        directory.dial_bootstrap().await?;
        directory.refresh_metadata().await?;
        Ok(directory)
    }

    /// The current snapshot. Cheap to call, never blocks on the network.
    pub(crate) async fn current_metadata(&self) -> Arc<ClusterMetadata> {
        self.metadata.read().await.clone()
    }

    /// Fetch a fresh snapshot and replace the current one wholesale.
    ///
    /// Retries up to the configured limit with exponential backoff before
    /// giving up.
    #[instrument(skip(self))]
    pub(crate) async fn refresh_metadata(&self) -> Result<Arc<ClusterMetadata>> {
        let mut backoff = create_backoff()?;
        let mut attempts = 0;

        loop {
            match self.try_fetch_metadata().await {
                Ok(snapshot) => {
                    let snapshot = Arc::new(snapshot);
                    let mut guard = self.metadata.write().await;
                    *guard = snapshot.clone();
                    debug!(
                        brokers = snapshot.brokers.len(),
                        topics = snapshot.topics.len(),
                        "metadata snapshot replaced"
                    );
                    return Ok(snapshot);
                }
                Err(err) => {
                    attempts += 1;
                    if attempts >= self.config.metadata_retries.max(1) {
                        return Err(err);
                    }
                    warn!(%err, attempts, "metadata refresh failed, backing off");
                    backoff_and_wait(&mut backoff).await;
                }
            }
        }
    }

    async fn try_fetch_metadata(&self) -> Result<ClusterMetadata> {
        let mut candidates: Vec<SharedConnection> =
            { self.pool.lock().await.values().cloned().collect() };
        if let Some(seed) = self.seed.read().await.clone() {
            candidates.push(seed);
        }

        for connection in candidates {
            match connection.metadata().await {
                Ok(response) => {
                    return ClusterMetadata {
                        cluster_id: response.cluster_id,
                        brokers: response.brokers,
                        topics: response.topics,
                    }
                    .validated();
                }
                Err(err) => {
                    if let Some(node_id) = connection.node_id() {
                        debug!(node_id, %err, "dropping stale connection");
                        self.invalidate(node_id).await;
                    }
                }
            }
        }

        // every live connection failed, start over from the bootstrap list
        let seed = self.dial_bootstrap().await?;
        let response = seed.metadata().await?;
        ClusterMetadata {
            cluster_id: response.cluster_id,
            brokers: response.brokers,
            topics: response.topics,
        }
        .validated()
    }

    /// Try each bootstrap endpoint in order, keeping the first that answers.
    async fn dial_bootstrap(&self) -> Result<SharedConnection> {
        for addr in &self.config.bootstrap {
            let (host, port) = parse_endpoint(addr)?;
            match self.connector.connect(&host, port).await {
                Ok(connection) => {
                    debug!(%addr, "bootstrap endpoint answered");
                    let mut seed = self.seed.write().await;
                    *seed = Some(connection.clone());
                    return Ok(connection);
                }
                Err(err) => {
                    warn!(%addr, %err, "bootstrap endpoint unreachable, trying next");
                }
            }
        }
        Err(ShoalError::ClusterUnreachable {
            attempted: self.config.bootstrap.len(),
        })
    }

    /// Connection to a specific broker, dialed on first use and pooled after.
    pub(crate) async fn connection_for(&self, node_id: NodeId) -> Result<SharedConnection> {
        let mut pool = self.pool.lock().await;
        if let Some(connection) = pool.get(&node_id) {
            return Ok(connection.clone());
        }

        let metadata = self.current_metadata().await;
        let endpoint = metadata
            .broker(node_id)
            .ok_or(ShoalError::BrokerNotFound(node_id))?;
        let connection = self.connector.connect(&endpoint.host, endpoint.port).await?;
        pool.insert(node_id, connection.clone());
        Ok(connection)
    }

    /// Drop a pooled connection so the next use re-dials.
    pub(crate) async fn invalidate(&self, node_id: NodeId) {
        self.pool.lock().await.remove(&node_id);
    }

    /// Current leader of a partition, refreshing the snapshot when the
    /// partition is not in the cached topology.
    pub(crate) async fn leader_for(&self, replica: &ReplicaKey) -> Result<NodeId> {
        let metadata = self.current_metadata().await;
        match metadata.leader_for(&replica.topic, replica.partition) {
            Ok(leader) => Ok(leader),
            Err(_) => {
                let metadata = self.refresh_metadata().await?;
                metadata.leader_for(&replica.topic, replica.partition)
            }
        }
    }

    /// Any live connection, for requests that are not partition-addressed.
    pub(crate) async fn any_connection(&self) -> Result<SharedConnection> {
        if let Some(connection) = self.pool.lock().await.values().next().cloned() {
            return Ok(connection);
        }
        if let Some(seed) = self.seed.read().await.clone() {
            return Ok(seed);
        }
        self.dial_bootstrap().await
    }

    pub(crate) fn config(&self) -> &Arc<ClientConfig> {
        &self.config
    }
}

/// Backoff used for metadata refreshes and group rejoin attempts.
pub(crate) fn create_backoff() -> Result<ExponentialBackoff> {
    ExponentialBackoffBuilder::default()
        .factor(BACKOFF_FACTOR)
        .min(BACKOFF_MIN)
        .max(BACKOFF_MAX)
        .build()
        .map_err(|err| ShoalError::Other(format!("failed to build backoff: {err}")))
}

pub(crate) async fn backoff_and_wait(backoff: &mut ExponentialBackoff) {
    let wait_duration = backoff.wait();
    debug!(ms = wait_duration.as_millis() as u64, "backing off");
    tokio::time::sleep(wait_duration).await;
}
