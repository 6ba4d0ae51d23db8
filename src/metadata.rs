//! Client-side view of cluster topology.
//!
//! A [`ClusterMetadata`] snapshot is immutable once built. Refreshes replace
//! the whole snapshot instead of patching it in place, so readers always see
//! a self-consistent topology.

use std::collections::HashSet;

use serde::Serialize;

use crate::error::{Result, ShoalError};
use crate::types::{NodeId, PartitionId};

/// Topics whose name starts with this prefix are cluster-internal
/// bookkeeping and are hidden from listings.
pub(crate) const INTERNAL_TOPIC_PREFIX: &str = "__";

/// Network location of a single broker node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerEndpoint {
    pub node_id: NodeId,
    pub host: String,
    pub port: u16,
}

impl BrokerEndpoint {
    pub fn new(node_id: NodeId, host: impl Into<String>, port: u16) -> Self {
        Self {
            node_id,
            host: host.into(),
            port,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Placement of one partition: its leader and the full replica set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionMetadata {
    pub id: PartitionId,
    pub leader: NodeId,
    pub replicas: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicMetadata {
    pub name: String,
    pub partitions: Vec<PartitionMetadata>,
    pub replication: u32,
}

impl TopicMetadata {
    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    pub fn partition(&self, id: PartitionId) -> Option<&PartitionMetadata> {
        self.partitions.iter().find(|p| p.id == id)
    }

    pub(crate) fn is_internal(&self) -> bool {
        self.name.starts_with(INTERNAL_TOPIC_PREFIX)
    }
}

/// A complete, validated snapshot of the cluster topology.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterMetadata {
    pub cluster_id: Option<String>,
    pub brokers: Vec<BrokerEndpoint>,
    pub topics: Vec<TopicMetadata>,
}

impl ClusterMetadata {
    /// Validate a raw topology snapshot before it replaces the current one.
    ///
    /// Every topic must have at least one partition, every partition leader
    /// must be a broker the snapshot knows about, and partition ids within a
    /// topic must be dense starting at zero.
    pub fn validated(self) -> Result<Self> {
        let broker_ids: HashSet<NodeId> = self.brokers.iter().map(|b| b.node_id).collect();
        if broker_ids.len() != self.brokers.len() {
            return Err(ShoalError::MetadataRefresh(
                "duplicate broker node id in snapshot".to_owned(),
            ));
        }

        for topic in &self.topics {
            if topic.partitions.is_empty() {
                return Err(ShoalError::MetadataRefresh(format!(
                    "topic {} has no partitions",
                    topic.name
                )));
            }
            for (index, partition) in topic.partitions.iter().enumerate() {
                if partition.id != index as PartitionId {
                    return Err(ShoalError::MetadataRefresh(format!(
                        "topic {} has non-contiguous partition ids",
                        topic.name
                    )));
                }
                if !broker_ids.contains(&partition.leader) {
                    return Err(ShoalError::MetadataRefresh(format!(
                        "partition {}-{} names unknown leader {}",
                        topic.name, partition.id, partition.leader
                    )));
                }
                if !partition.replicas.contains(&partition.leader) {
                    return Err(ShoalError::MetadataRefresh(format!(
                        "partition {}-{} leader {} is not in the replica set",
                        topic.name, partition.id, partition.leader
                    )));
                }
                for replica in &partition.replicas {
                    if !broker_ids.contains(replica) {
                        return Err(ShoalError::MetadataRefresh(format!(
                            "partition {}-{} names unknown replica {}",
                            topic.name, partition.id, replica
                        )));
                    }
                }
            }
        }

        Ok(self)
    }

    pub fn topic(&self, name: &str) -> Option<&TopicMetadata> {
        self.topics.iter().find(|t| t.name == name)
    }

    pub fn broker(&self, node_id: NodeId) -> Option<&BrokerEndpoint> {
        self.brokers.iter().find(|b| b.node_id == node_id)
    }

    pub fn leader_for(&self, topic: &str, partition: PartitionId) -> Result<NodeId> {
        let topic_meta = self
            .topic(topic)
            .ok_or_else(|| ShoalError::TopicNotFound(topic.to_owned()))?;
        let partition_meta = topic_meta
            .partition(partition)
            .ok_or_else(|| ShoalError::PartitionNotFound(topic.to_owned(), partition))?;
        Ok(partition_meta.leader)
    }
}

/// Condensed topology view returned by [`crate::Shoal::cluster_summary`].
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub cluster_id: Option<String>,
    pub brokers: Vec<BrokerEndpoint>,
    pub topics: Vec<String>,
}
