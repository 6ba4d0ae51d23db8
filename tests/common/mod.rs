//! In-memory cluster used by the integration tests.
//!
//! Implements the transport traits over shared state so the whole client
//! stack runs without sockets. Brokers can be taken down and partition
//! leadership moved to exercise failover paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_lock::Mutex;
use async_trait::async_trait;

use shoal::metadata::{BrokerEndpoint, PartitionMetadata, TopicMetadata};
use shoal::transport::{
    BrokerConnection, BrokerConnector, CreateTopicRequest, CreateTopicResponse, ErrorCode,
    FetchRequest, FetchResponse, HeartbeatRequest, HeartbeatResponse, JoinGroupRequest,
    JoinGroupResponse, LeaveGroupRequest, LeaveGroupResponse, ListGroupsResponse,
    ListOffsetResponse, MemberAssignment, MetadataResponse, OffsetCommitRequest,
    OffsetCommitResponse, OffsetFetchRequest, OffsetFetchResponse, OffsetSpec, ProduceRequest,
    ProduceResponse, SharedConnection, SyncGroupRequest, SyncGroupResponse, TransportError,
    WireRecord,
};
use shoal::transport::GroupMemberInfo;
use shoal::{NodeId, Offset, PartitionId};

const MOCK_PORT: u16 = 9092;

/// Connect a client to the mock cluster with a fast heartbeat so rebalance
/// tests finish quickly. Extra options are applied through `tune`.
#[allow(dead_code)]
pub async fn connect_client<F>(cluster: &MockCluster, tune: F) -> shoal::Shoal
where
    F: FnOnce(&mut shoal::ClientConfigBuilder) -> &mut shoal::ClientConfigBuilder,
{
    let mut builder = shoal::ClientConfig::builder();
    builder.bootstrap(cluster.endpoints().await);
    builder.heartbeat_interval(std::time::Duration::from_millis(50));
    tune(&mut builder);
    let config = builder.build().expect("config should build");
    shoal::Shoal::connect(cluster.connector(), config)
        .await
        .expect("connect should succeed")
}

struct MockPartition {
    leader: NodeId,
    replicas: Vec<NodeId>,
    log: Vec<WireRecord>,
}

struct MockTopic {
    replication: u32,
    partitions: Vec<MockPartition>,
}

#[derive(Default)]
struct MockGroup {
    generation: i32,
    /// member id to subscribed topics, ordered so leader election is stable
    members: BTreeMap<String, Vec<String>>,
    /// plan stored by the group leader, None while a rebalance is pending
    assignments: Option<HashMap<String, Vec<(String, PartitionId)>>>,
}

#[derive(Default)]
struct State {
    brokers: Vec<BrokerEndpoint>,
    down: HashSet<NodeId>,
    topics: HashMap<String, MockTopic>,
    groups: HashMap<String, MockGroup>,
    committed: HashMap<(String, String, PartitionId), Offset>,
    member_counter: u64,
    commits_failing: bool,
    fetch_delay: Option<Duration>,
}

pub struct MockCluster {
    state: Arc<Mutex<State>>,
}

#[allow(dead_code)]
impl MockCluster {
    pub fn new(broker_count: u32) -> Self {
        let brokers = (0..broker_count)
            .map(|n| BrokerEndpoint::new(n as NodeId, format!("broker-{n}"), MOCK_PORT))
            .collect();
        Self {
            state: Arc::new(Mutex::new(State {
                brokers,
                ..State::default()
            })),
        }
    }

    /// Bootstrap endpoint strings in broker id order.
    pub async fn endpoints(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .brokers
            .iter()
            .map(|broker| format!("{}:{}", broker.host, broker.port))
            .collect()
    }

    pub fn connector(&self) -> Arc<dyn BrokerConnector> {
        Arc::new(MockConnector {
            state: self.state.clone(),
        })
    }

    /// Seed a topic directly, bypassing the admin path.
    pub async fn add_topic(&self, name: &str, partitions: u32, replication: u32) {
        let mut state = self.state.lock().await;
        let topic = make_topic(&state.brokers, partitions, replication);
        state.topics.insert(name.to_owned(), topic);
    }

    pub async fn set_down(&self, node_id: NodeId) {
        self.state.lock().await.down.insert(node_id);
    }

    pub async fn set_up(&self, node_id: NodeId) {
        self.state.lock().await.down.remove(&node_id);
    }

    pub async fn move_leader(&self, topic: &str, partition: PartitionId, node_id: NodeId) {
        let mut state = self.state.lock().await;
        let partition = state
            .topics
            .get_mut(topic)
            .and_then(|t| t.partitions.get_mut(partition as usize))
            .expect("unknown topic or partition");
        partition.leader = node_id;
        if !partition.replicas.contains(&node_id) {
            partition.replicas.push(node_id);
        }
    }

    pub async fn partition_log(&self, topic: &str, partition: PartitionId) -> Vec<WireRecord> {
        let state = self.state.lock().await;
        state
            .topics
            .get(topic)
            .and_then(|t| t.partitions.get(partition as usize))
            .map(|p| p.log.clone())
            .expect("unknown topic or partition")
    }

    pub async fn committed_offset(
        &self,
        group: &str,
        topic: &str,
        partition: PartitionId,
    ) -> Option<Offset> {
        let state = self.state.lock().await;
        state
            .committed
            .get(&(group.to_owned(), topic.to_owned(), partition))
            .copied()
    }

    pub async fn group_generation(&self, group: &str) -> Option<i32> {
        let state = self.state.lock().await;
        state.groups.get(group).map(|g| g.generation)
    }

    pub async fn group_member_count(&self, group: &str) -> usize {
        let state = self.state.lock().await;
        state.groups.get(group).map_or(0, |g| g.members.len())
    }

    /// Make every offset commit fail at the transport, or restore them.
    pub async fn fail_commits(&self, failing: bool) {
        self.state.lock().await.commits_failing = failing;
    }

    /// Stall every fetch for the given duration. `None` restores instant
    /// fetches.
    pub async fn set_fetch_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.fetch_delay = delay;
    }

    /// Drop every member of a group, as a coordinator would after session
    /// timeouts. Members learn about it through heartbeat responses.
    pub async fn evict_group(&self, group: &str) {
        let mut state = self.state.lock().await;
        if let Some(group) = state.groups.get_mut(group) {
            group.members.clear();
            group.generation += 1;
            group.assignments = None;
        }
    }
}

fn make_topic(brokers: &[BrokerEndpoint], partitions: u32, replication: u32) -> MockTopic {
    let broker_count = brokers.len() as u32;
    let partitions = (0..partitions)
        .map(|id| {
            let leader = (id % broker_count) as NodeId;
            let replicas = (0..replication.min(broker_count))
                .map(|offset| (((id + offset) % broker_count) as NodeId))
                .collect();
            MockPartition {
                leader,
                replicas,
                log: Vec::new(),
            }
        })
        .collect();
    MockTopic {
        replication,
        partitions,
    }
}

struct MockConnector {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl BrokerConnector for MockConnector {
    async fn connect(&self, host: &str, _port: u16) -> Result<SharedConnection, TransportError> {
        let node_id: NodeId = host
            .strip_prefix("broker-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| TransportError::Unreachable(host.to_owned()))?;

        let state = self.state.lock().await;
        if !state.brokers.iter().any(|b| b.node_id == node_id) {
            return Err(TransportError::Unreachable(host.to_owned()));
        }
        if state.down.contains(&node_id) {
            return Err(TransportError::Unreachable(host.to_owned()));
        }
        drop(state);

        Ok(Arc::new(MockConnection {
            node_id,
            state: self.state.clone(),
        }))
    }
}

struct MockConnection {
    node_id: NodeId,
    state: Arc<Mutex<State>>,
}

impl MockConnection {
    /// Every request fails once the broker was taken down.
    async fn guard(&self) -> Result<(), TransportError> {
        let state = self.state.lock().await;
        if state.down.contains(&self.node_id) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerConnection for MockConnection {
    fn node_id(&self) -> Option<NodeId> {
        Some(self.node_id)
    }

    async fn metadata(&self) -> Result<MetadataResponse, TransportError> {
        self.guard().await?;
        let state = self.state.lock().await;
        Ok(MetadataResponse {
            cluster_id: Some("mock-cluster".to_owned()),
            brokers: state.brokers.clone(),
            topics: state
                .topics
                .iter()
                .map(|(name, topic)| TopicMetadata {
                    name: name.clone(),
                    partitions: topic
                        .partitions
                        .iter()
                        .enumerate()
                        .map(|(id, partition)| PartitionMetadata {
                            id: id as PartitionId,
                            leader: partition.leader,
                            replicas: partition.replicas.clone(),
                        })
                        .collect(),
                    replication: topic.replication,
                })
                .collect(),
        })
    }

    async fn create_topic(
        &self,
        request: CreateTopicRequest,
    ) -> Result<CreateTopicResponse, TransportError> {
        self.guard().await?;
        let mut state = self.state.lock().await;
        if state.topics.contains_key(&request.name) {
            return Ok(CreateTopicResponse {
                error: ErrorCode::TopicAlreadyExists,
            });
        }
        if request.replication as usize > state.brokers.len() {
            return Ok(CreateTopicResponse {
                error: ErrorCode::InvalidSpec(
                    "replication exceeds broker count".to_owned(),
                ),
            });
        }
        let topic = make_topic(&state.brokers, request.partitions, request.replication);
        state.topics.insert(request.name, topic);
        Ok(CreateTopicResponse {
            error: ErrorCode::None,
        })
    }

    async fn produce(&self, request: ProduceRequest) -> Result<ProduceResponse, TransportError> {
        self.guard().await?;
        let mut state = self.state.lock().await;
        let Some(partition) = state
            .topics
            .get_mut(&request.topic)
            .and_then(|t| t.partitions.get_mut(request.partition as usize))
        else {
            return Ok(ProduceResponse {
                base_offset: -1,
                error: ErrorCode::UnknownTopic,
            });
        };
        if partition.leader != self.node_id {
            return Ok(ProduceResponse {
                base_offset: -1,
                error: ErrorCode::NotLeader,
            });
        }
        let base_offset = partition.log.len() as Offset;
        partition.log.extend(request.records);
        Ok(ProduceResponse {
            base_offset,
            error: ErrorCode::None,
        })
    }

    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError> {
        self.guard().await?;
        // sleep outside the state lock so other requests keep flowing
        let delay = self.state.lock().await.fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock().await;
        let Some(partition) = state
            .topics
            .get(&request.topic)
            .and_then(|t| t.partitions.get(request.partition as usize))
        else {
            return Ok(FetchResponse {
                records: Vec::new(),
                high_watermark: -1,
                error: ErrorCode::UnknownTopic,
            });
        };
        let end = partition.log.len() as Offset;
        if request.offset < 0 || request.offset > end {
            return Ok(FetchResponse {
                records: Vec::new(),
                high_watermark: end,
                error: ErrorCode::OffsetOutOfRange,
            });
        }
        let from = request.offset as usize;
        let to = (from + request.max_records as usize).min(partition.log.len());
        let records = partition.log[from..to]
            .iter()
            .enumerate()
            .map(|(i, record)| ((from + i) as Offset, record.clone()))
            .collect();
        Ok(FetchResponse {
            records,
            high_watermark: end,
            error: ErrorCode::None,
        })
    }

    async fn list_offset(
        &self,
        topic: &str,
        partition: PartitionId,
        spec: OffsetSpec,
    ) -> Result<ListOffsetResponse, TransportError> {
        self.guard().await?;
        let state = self.state.lock().await;
        let Some(partition) = state
            .topics
            .get(topic)
            .and_then(|t| t.partitions.get(partition as usize))
        else {
            return Ok(ListOffsetResponse {
                offset: -1,
                error: ErrorCode::UnknownTopic,
            });
        };
        let offset = match spec {
            OffsetSpec::Earliest => 0,
            OffsetSpec::Latest => partition.log.len() as Offset,
        };
        Ok(ListOffsetResponse {
            offset,
            error: ErrorCode::None,
        })
    }

    async fn join_group(
        &self,
        request: JoinGroupRequest,
    ) -> Result<JoinGroupResponse, TransportError> {
        self.guard().await?;
        let mut state = self.state.lock().await;

        let member_id = match request.member_id {
            Some(member_id) => member_id,
            None => {
                state.member_counter += 1;
                format!("member-{}", state.member_counter)
            }
        };

        let group = state.groups.entry(request.group_id).or_default();
        let is_new = !group.members.contains_key(&member_id);
        group.members.insert(member_id.clone(), request.topics);
        if is_new {
            // membership changed, everyone must sync against a new generation
            group.generation += 1;
            group.assignments = None;
        }

        let leader = group
            .members
            .keys()
            .next()
            .cloned()
            .unwrap_or_default();
        let members = group
            .members
            .iter()
            .map(|(member_id, topics)| GroupMemberInfo {
                member_id: member_id.clone(),
                topics: topics.clone(),
            })
            .collect();

        Ok(JoinGroupResponse {
            error: ErrorCode::None,
            member_id,
            generation: group.generation,
            leader,
            members,
        })
    }

    async fn sync_group(
        &self,
        request: SyncGroupRequest,
    ) -> Result<SyncGroupResponse, TransportError> {
        self.guard().await?;
        let mut state = self.state.lock().await;
        let Some(group) = state.groups.get_mut(&request.group_id) else {
            return Ok(SyncGroupResponse {
                error: ErrorCode::UnknownMember,
                assignment: Vec::new(),
            });
        };
        if !group.members.contains_key(&request.member_id) {
            return Ok(SyncGroupResponse {
                error: ErrorCode::UnknownMember,
                assignment: Vec::new(),
            });
        }
        if request.generation != group.generation {
            return Ok(SyncGroupResponse {
                error: ErrorCode::IllegalGeneration,
                assignment: Vec::new(),
            });
        }

        if !request.assignments.is_empty() {
            group.assignments = Some(
                request
                    .assignments
                    .into_iter()
                    .map(|MemberAssignment { member_id, partitions }| (member_id, partitions))
                    .collect(),
            );
        }

        match &group.assignments {
            Some(assignments) => Ok(SyncGroupResponse {
                error: ErrorCode::None,
                assignment: assignments
                    .get(&request.member_id)
                    .cloned()
                    .unwrap_or_default(),
            }),
            // followers wait here until the leader has stored the plan
            None => Ok(SyncGroupResponse {
                error: ErrorCode::RebalanceInProgress,
                assignment: Vec::new(),
            }),
        }
    }

    async fn heartbeat(
        &self,
        request: HeartbeatRequest,
    ) -> Result<HeartbeatResponse, TransportError> {
        self.guard().await?;
        let state = self.state.lock().await;
        let Some(group) = state.groups.get(&request.group_id) else {
            return Ok(HeartbeatResponse {
                error: ErrorCode::UnknownMember,
            });
        };
        if !group.members.contains_key(&request.member_id) {
            return Ok(HeartbeatResponse {
                error: ErrorCode::UnknownMember,
            });
        }
        if request.generation != group.generation {
            return Ok(HeartbeatResponse {
                error: ErrorCode::RebalanceInProgress,
            });
        }
        Ok(HeartbeatResponse {
            error: ErrorCode::None,
        })
    }

    async fn leave_group(
        &self,
        request: LeaveGroupRequest,
    ) -> Result<LeaveGroupResponse, TransportError> {
        self.guard().await?;
        let mut state = self.state.lock().await;
        let Some(group) = state.groups.get_mut(&request.group_id) else {
            return Ok(LeaveGroupResponse {
                error: ErrorCode::UnknownMember,
            });
        };
        if group.members.remove(&request.member_id).is_none() {
            return Ok(LeaveGroupResponse {
                error: ErrorCode::UnknownMember,
            });
        }
        group.generation += 1;
        group.assignments = None;
        Ok(LeaveGroupResponse {
            error: ErrorCode::None,
        })
    }

    async fn commit_offsets(
        &self,
        request: OffsetCommitRequest,
    ) -> Result<OffsetCommitResponse, TransportError> {
        self.guard().await?;
        let mut state = self.state.lock().await;
        if state.commits_failing {
            return Err(TransportError::Closed);
        }
        for (topic, partition, offset) in request.offsets {
            state
                .committed
                .insert((request.group_id.clone(), topic, partition), offset);
        }
        Ok(OffsetCommitResponse {
            error: ErrorCode::None,
        })
    }

    async fn fetch_offsets(
        &self,
        request: OffsetFetchRequest,
    ) -> Result<OffsetFetchResponse, TransportError> {
        self.guard().await?;
        let state = self.state.lock().await;
        let offsets = request
            .partitions
            .into_iter()
            .map(|(topic, partition)| {
                let committed = state
                    .committed
                    .get(&(request.group_id.clone(), topic.clone(), partition))
                    .copied();
                (topic, partition, committed)
            })
            .collect();
        Ok(OffsetFetchResponse {
            offsets,
            error: ErrorCode::None,
        })
    }

    async fn list_groups(&self) -> Result<ListGroupsResponse, TransportError> {
        self.guard().await?;
        let state = self.state.lock().await;
        Ok(ListGroupsResponse {
            groups: state
                .groups
                .keys()
                .map(|group_id| (group_id.clone(), "consumer".to_owned()))
                .collect(),
        })
    }
}
