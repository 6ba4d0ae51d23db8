//! Client core for a partitioned, replicated, append-only log cluster.
//!
//! The crate provides four cooperating surfaces over one shared topology
//! cache:
//!
//! - [`TopicAdmin`] creates topics idempotently and lists groups
//! - [`Producer`] batches keyed records and resolves acknowledged offsets
//! - [`Consumer`] polls records as a coordinated member of a consumer group
//! - [`Shoal`] is the connected client handle that hands out the others
//!
//! Wire framing is injected through the traits in [`transport`], so the
//! core carries no socket code of its own.

mod admin;
mod directory;
mod error;
mod group;
mod shoal;

pub mod codec;
pub mod config;
pub mod consumer;
pub mod metadata;
pub mod producer;
pub mod transport;
pub mod types;

pub use crate::admin::TopicAdmin;
pub use crate::config::{AckLevel, ClientConfig, ClientConfigBuilder, CommitMode, ConfigError, OffsetReset};
pub use crate::consumer::{ConsumedRecord, Consumer, ConsumerConfig};
pub use crate::error::{Result, ShoalError};
pub use crate::group::GroupState;
pub use crate::metadata::{
    BrokerEndpoint, ClusterMetadata, ClusterSummary, PartitionMetadata, TopicMetadata,
};
pub use crate::producer::{
    FutureRecordMetadata, Producer, ProducerConfig, ProducerError, Record, RecordData, RecordKey,
    RecordMetadata,
};
pub use crate::shoal::Shoal;
pub use crate::types::{NodeId, Offset, PartitionId, ReplicaKey};
