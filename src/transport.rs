//! The wire seam.
//!
//! The client core never frames bytes itself. It talks to brokers through
//! [`BrokerConnection`], a typed request/response surface, and obtains
//! connections through an injected [`BrokerConnector`]. Production builds
//! plug a real socket transport in here; tests plug an in-memory cluster.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::metadata::{BrokerEndpoint, TopicMetadata};
use crate::types::{NodeId, Offset, PartitionId};

/// Failure at the transport layer, before any broker-level response exists.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("request timed out")]
    Timeout,
    #[error("connection closed")]
    Closed,
}

/// Broker-level response code carried inside otherwise successful replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    None,
    NotLeader,
    UnknownTopic,
    TopicAlreadyExists,
    InvalidSpec(String),
    OffsetOutOfRange,
    UnknownMember,
    IllegalGeneration,
    RebalanceInProgress,
    Other(String),
}

impl ErrorCode {
    pub fn is_error(&self) -> bool {
        !matches!(self, ErrorCode::None)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::None => write!(f, "none"),
            ErrorCode::NotLeader => write!(f, "not the partition leader"),
            ErrorCode::UnknownTopic => write!(f, "unknown topic"),
            ErrorCode::TopicAlreadyExists => write!(f, "topic already exists"),
            ErrorCode::InvalidSpec(msg) => write!(f, "invalid topic spec: {msg}"),
            ErrorCode::OffsetOutOfRange => write!(f, "offset out of range"),
            ErrorCode::UnknownMember => write!(f, "unknown group member"),
            ErrorCode::IllegalGeneration => write!(f, "stale group generation"),
            ErrorCode::RebalanceInProgress => write!(f, "group rebalance in progress"),
            ErrorCode::Other(msg) => write!(f, "{msg}"),
        }
    }
}

/// A single record as it crosses the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRecord {
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl WireRecord {
    /// Size estimate used for batch accounting.
    pub fn write_size(&self) -> usize {
        const RECORD_OVERHEAD: usize = 16;
        let headers: usize = self
            .headers
            .iter()
            .map(|(name, value)| name.len() + value.len())
            .sum();
        self.key.as_ref().map(|k| k.len()).unwrap_or(0) + self.value.len() + headers
            + RECORD_OVERHEAD
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetadataResponse {
    pub cluster_id: Option<String>,
    pub brokers: Vec<BrokerEndpoint>,
    pub topics: Vec<TopicMetadata>,
}

#[derive(Debug, Clone)]
pub struct CreateTopicRequest {
    pub name: String,
    pub partitions: u32,
    pub replication: u32,
}

#[derive(Debug, Clone)]
pub struct CreateTopicResponse {
    pub error: ErrorCode,
}

#[derive(Debug, Clone)]
pub struct ProduceRequest {
    pub topic: String,
    pub partition: PartitionId,
    /// 0 = no ack, 1 = leader ack, -1 = full replica ack
    pub required_acks: i16,
    pub records: Vec<WireRecord>,
}

#[derive(Debug, Clone)]
pub struct ProduceResponse {
    pub base_offset: Offset,
    pub error: ErrorCode,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub topic: String,
    pub partition: PartitionId,
    pub offset: Offset,
    pub max_records: u32,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub records: Vec<(Offset, WireRecord)>,
    pub high_watermark: Offset,
    pub error: ErrorCode,
}

/// Which end of the log a reset policy resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetSpec {
    Earliest,
    Latest,
}

#[derive(Debug, Clone)]
pub struct ListOffsetResponse {
    pub offset: Offset,
    pub error: ErrorCode,
}

#[derive(Debug, Clone)]
pub struct JoinGroupRequest {
    pub group_id: String,
    /// None on first join; the broker assigns an id.
    pub member_id: Option<String>,
    pub topics: Vec<String>,
    pub session_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct GroupMemberInfo {
    pub member_id: String,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct JoinGroupResponse {
    pub error: ErrorCode,
    pub member_id: String,
    pub generation: i32,
    pub leader: String,
    /// Full membership, used by the elected leader to compute assignments.
    pub members: Vec<GroupMemberInfo>,
}

#[derive(Debug, Clone)]
pub struct MemberAssignment {
    pub member_id: String,
    pub partitions: Vec<(String, PartitionId)>,
}

#[derive(Debug, Clone)]
pub struct SyncGroupRequest {
    pub group_id: String,
    pub member_id: String,
    pub generation: i32,
    /// Empty for followers; the leader fills in the whole group's plan.
    pub assignments: Vec<MemberAssignment>,
}

#[derive(Debug, Clone)]
pub struct SyncGroupResponse {
    pub error: ErrorCode,
    pub assignment: Vec<(String, PartitionId)>,
}

#[derive(Debug, Clone)]
pub struct HeartbeatRequest {
    pub group_id: String,
    pub member_id: String,
    pub generation: i32,
}

#[derive(Debug, Clone)]
pub struct HeartbeatResponse {
    pub error: ErrorCode,
}

#[derive(Debug, Clone)]
pub struct LeaveGroupRequest {
    pub group_id: String,
    pub member_id: String,
}

#[derive(Debug, Clone)]
pub struct LeaveGroupResponse {
    pub error: ErrorCode,
}

#[derive(Debug, Clone)]
pub struct OffsetCommitRequest {
    pub group_id: String,
    pub offsets: Vec<(String, PartitionId, Offset)>,
}

#[derive(Debug, Clone)]
pub struct OffsetCommitResponse {
    pub error: ErrorCode,
}

#[derive(Debug, Clone)]
pub struct OffsetFetchRequest {
    pub group_id: String,
    pub partitions: Vec<(String, PartitionId)>,
}

#[derive(Debug, Clone)]
pub struct OffsetFetchResponse {
    pub offsets: Vec<(String, PartitionId, Option<Offset>)>,
    pub error: ErrorCode,
}

#[derive(Debug, Clone, Default)]
pub struct ListGroupsResponse {
    /// (group id, group type)
    pub groups: Vec<(String, String)>,
}

pub type SharedConnection = Arc<dyn BrokerConnection>;

/// An established session with one broker.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Which broker this connection talks to. Bootstrap connections made
    /// before the topology is known report `None`.
    fn node_id(&self) -> Option<NodeId>;

    async fn metadata(&self) -> Result<MetadataResponse, TransportError>;

    async fn create_topic(
        &self,
        request: CreateTopicRequest,
    ) -> Result<CreateTopicResponse, TransportError>;

    async fn produce(&self, request: ProduceRequest) -> Result<ProduceResponse, TransportError>;

    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError>;

    async fn list_offset(
        &self,
        topic: &str,
        partition: PartitionId,
        spec: OffsetSpec,
    ) -> Result<ListOffsetResponse, TransportError>;

    async fn join_group(
        &self,
        request: JoinGroupRequest,
    ) -> Result<JoinGroupResponse, TransportError>;

    async fn sync_group(
        &self,
        request: SyncGroupRequest,
    ) -> Result<SyncGroupResponse, TransportError>;

    async fn heartbeat(
        &self,
        request: HeartbeatRequest,
    ) -> Result<HeartbeatResponse, TransportError>;

    async fn leave_group(
        &self,
        request: LeaveGroupRequest,
    ) -> Result<LeaveGroupResponse, TransportError>;

    async fn commit_offsets(
        &self,
        request: OffsetCommitRequest,
    ) -> Result<OffsetCommitResponse, TransportError>;

    async fn fetch_offsets(
        &self,
        request: OffsetFetchRequest,
    ) -> Result<OffsetFetchResponse, TransportError>;

    async fn list_groups(&self) -> Result<ListGroupsResponse, TransportError>;
}

/// Dials brokers. Injected at connect time so the framing layer stays
/// outside the client core.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<SharedConnection, TransportError>;
}
