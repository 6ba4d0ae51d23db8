use std::io::Error as IoError;

use crate::config::ConfigError;
use crate::producer::ProducerError;
use crate::transport::{ErrorCode, TransportError};
use crate::types::{NodeId, PartitionId};

pub type Result<T, E = ShoalError> = core::result::Result<T, E>;

/// Possible errors that may arise when using the client
#[derive(thiserror::Error, Debug)]
pub enum ShoalError {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error("Cluster unreachable after contacting {attempted} bootstrap endpoint(s)")]
    ClusterUnreachable { attempted: usize },
    #[error("Metadata refresh failed: {0}")]
    MetadataRefresh(String),
    #[error("Topic not found: {0}")]
    TopicNotFound(String),
    #[error("Partition not found: {0}-{1}")]
    PartitionNotFound(String, PartitionId),
    #[error("Broker not found: {0}")]
    BrokerNotFound(NodeId),
    #[error("Invalid topic spec: {0}")]
    InvalidTopicSpec(String),
    #[error("Topic creation failed: {0}")]
    TopicCreate(String),
    #[error("Group membership error: {0}")]
    GroupJoin(String),
    #[error("Offset commit rejected: {0}")]
    OffsetCommit(ErrorCode),
    #[error("Consumer is closed")]
    ConsumerClosed,
    #[error("Client config error: {0}")]
    ClientConfig(#[from] ConfigError),
    #[error("Consumer config error: {0}")]
    ConsumerConfig(String),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Producer error: {0}")]
    Producer(#[from] ProducerError),
    #[error("Unknown error: {0}")]
    Other(String),
}
