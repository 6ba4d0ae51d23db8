//! Consumer group membership.
//!
//! The coordinator owns one group session: join, sync, heartbeat, leave,
//! and the committed-offset bookkeeping for the member. The consumer reads
//! the current assignment from here and never talks group protocol itself.

mod assignment;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_lock::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::config::CommitMode;
use crate::directory::{backoff_and_wait, create_backoff, ClusterDirectory};
use crate::error::{Result, ShoalError};
use crate::transport::{
    ErrorCode, HeartbeatRequest, JoinGroupRequest, JoinGroupResponse, LeaveGroupRequest,
    OffsetCommitRequest, OffsetFetchRequest, SharedConnection, SyncGroupRequest,
};
use crate::types::{Offset, PartitionId, StickyEvent};

use assignment::range_assign;

const MAX_JOIN_ATTEMPTS: u32 = 10;
const MAX_SYNC_ATTEMPTS: u32 = 50;
const SYNC_RETRY_DELAY: Duration = Duration::from_millis(20);
const MAX_HEARTBEAT_FAILURES: u32 = 3;

/// Where this member stands in the group protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Unjoined,
    Joining,
    Stable,
    Rebalancing,
}

struct Session {
    state: GroupState,
    member_id: Option<String>,
    generation: i32,
    assignment: Vec<(String, PartitionId)>,
}

enum SyncOutcome {
    Assigned(Vec<(String, PartitionId)>),
    Rejoin,
}

pub(crate) struct GroupCoordinator {
    directory: Arc<ClusterDirectory>,
    group_id: String,
    topics: Vec<String>,
    session: RwLock<Session>,
    committed: Mutex<HashMap<(String, PartitionId), Offset>>,
    /// Bumped on every assignment change so pollers can detect stale reads.
    epoch: AtomicU64,
    failed: AtomicBool,
    end_event: Arc<StickyEvent>,
}

impl GroupCoordinator {
    pub(crate) fn new(
        directory: Arc<ClusterDirectory>,
        group_id: String,
        topics: Vec<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            directory,
            group_id,
            topics,
            session: RwLock::new(Session {
                state: GroupState::Unjoined,
                member_id: None,
                generation: -1,
                assignment: Vec::new(),
            }),
            committed: Mutex::new(HashMap::new()),
            epoch: AtomicU64::new(0),
            failed: AtomicBool::new(false),
            end_event: StickyEvent::shared(),
        })
    }

    pub(crate) async fn state(&self) -> GroupState {
        self.session.read().await.state
    }

    pub(crate) async fn assignment(&self) -> Vec<(String, PartitionId)> {
        self.session.read().await.assignment.clone()
    }

    pub(crate) fn assignment_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Join the group and block until an assignment is in hand.
    #[instrument(skip(self), fields(group = %self.group_id))]
    pub(crate) async fn join(&self) -> Result<()> {
        {
            let mut session = self.session.write().await;
            session.state = GroupState::Joining;
        }

        let mut backoff = create_backoff()?;
        let mut attempts = 0;

        loop {
            attempts += 1;
            if attempts > MAX_JOIN_ATTEMPTS {
                return Err(ShoalError::GroupJoin(format!(
                    "gave up after {MAX_JOIN_ATTEMPTS} join attempts"
                )));
            }

            let connection = self.directory.any_connection().await?;
            let member_id = self.session.read().await.member_id.clone();
            let request = JoinGroupRequest {
                group_id: self.group_id.clone(),
                member_id,
                topics: self.topics.clone(),
                session_timeout: self.directory.config().session_timeout,
            };

            let join = match connection.join_group(request).await {
                Ok(join) => join,
                Err(err) => {
                    warn!(%err, attempts, "join request failed, retrying");
                    backoff_and_wait(&mut backoff).await;
                    continue;
                }
            };

            match join.error {
                ErrorCode::None => match self.sync(&connection, &join).await? {
                    SyncOutcome::Assigned(assignment) => {
                        let mut session = self.session.write().await;
                        session.member_id = Some(join.member_id.clone());
                        session.generation = join.generation;
                        session.assignment = assignment;
                        session.state = GroupState::Stable;
                        drop(session);
                        self.epoch.fetch_add(1, Ordering::SeqCst);
                        self.failed.store(false, Ordering::SeqCst);
                        info!(
                            member = %join.member_id,
                            generation = join.generation,
                            "joined group"
                        );
                        return Ok(());
                    }
                    SyncOutcome::Rejoin => {
                        debug!("sync asked for a rejoin");
                        backoff_and_wait(&mut backoff).await;
                    }
                },
                ErrorCode::UnknownMember => {
                    // stale member id, rejoin as a fresh member
                    let mut session = self.session.write().await;
                    session.member_id = None;
                }
                ErrorCode::RebalanceInProgress => {
                    debug!("rebalance in progress, retrying join");
                    backoff_and_wait(&mut backoff).await;
                }
                other => {
                    return Err(ShoalError::GroupJoin(other.to_string()));
                }
            }
        }
    }

    /// Second phase of the join. The elected leader computes the whole
    /// group's plan from the membership the broker reported; followers send
    /// nothing and wait for their share.
    async fn sync(
        &self,
        connection: &SharedConnection,
        join: &JoinGroupResponse,
    ) -> Result<SyncOutcome> {
        let assignments = if join.member_id == join.leader {
            let metadata = self.directory.refresh_metadata().await?;
            range_assign(&join.members, &metadata)
        } else {
            Vec::new()
        };

        let mut attempts = 0;
        loop {
            let request = SyncGroupRequest {
                group_id: self.group_id.clone(),
                member_id: join.member_id.clone(),
                generation: join.generation,
                assignments: assignments.clone(),
            };
            let response = connection.sync_group(request).await?;
            match response.error {
                ErrorCode::None => return Ok(SyncOutcome::Assigned(response.assignment)),
                ErrorCode::RebalanceInProgress => {
                    attempts += 1;
                    if attempts >= MAX_SYNC_ATTEMPTS {
                        return Ok(SyncOutcome::Rejoin);
                    }
                    tokio::time::sleep(SYNC_RETRY_DELAY).await;
                }
                ErrorCode::IllegalGeneration | ErrorCode::UnknownMember => {
                    return Ok(SyncOutcome::Rejoin);
                }
                other => return Err(ShoalError::GroupJoin(other.to_string())),
            }
        }
    }

    /// Spawn the background heartbeat task for this member.
    pub(crate) fn start_heartbeat(self: &Arc<Self>) {
        let coordinator = self.clone();
        let end_event = self.end_event.clone();
        tokio::spawn(async move {
            coordinator.heartbeat_loop(end_event).await;
        });
    }

    async fn heartbeat_loop(&self, end_event: Arc<StickyEvent>) {
        let interval = self.directory.config().heartbeat_interval;
        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                _ = end_event.listen() => {
                    debug!(group = %self.group_id, "heartbeat loop stopped");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    match self.heartbeat_once().await {
                        Ok(()) => failures = 0,
                        Err(err) => {
                            failures += 1;
                            warn!(%err, failures, "heartbeat failed");
                            if failures >= MAX_HEARTBEAT_FAILURES {
                                error!(group = %self.group_id, "group session lost");
                                self.failed.store(true, Ordering::SeqCst);
                                let mut session = self.session.write().await;
                                session.state = GroupState::Unjoined;
                                session.assignment.clear();
                                drop(session);
                                self.epoch.fetch_add(1, Ordering::SeqCst);
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn heartbeat_once(&self) -> Result<()> {
        let (member_id, generation) = {
            let session = self.session.read().await;
            if session.state != GroupState::Stable {
                return Ok(());
            }
            match &session.member_id {
                Some(member_id) => (member_id.clone(), session.generation),
                None => return Ok(()),
            }
        };

        let connection = self.directory.any_connection().await?;
        let response = connection
            .heartbeat(HeartbeatRequest {
                group_id: self.group_id.clone(),
                member_id,
                generation,
            })
            .await?;

        match response.error {
            ErrorCode::None => Ok(()),
            ErrorCode::RebalanceInProgress | ErrorCode::IllegalGeneration => {
                info!(group = %self.group_id, "rebalance signalled, rejoining");
                self.enter_rebalance(false).await;
                self.join().await
            }
            ErrorCode::UnknownMember => {
                info!(group = %self.group_id, "membership dropped, rejoining fresh");
                self.enter_rebalance(true).await;
                self.join().await
            }
            other => Err(ShoalError::GroupJoin(other.to_string())),
        }
    }

    async fn enter_rebalance(&self, forget_member_id: bool) {
        let mut session = self.session.write().await;
        session.state = GroupState::Rebalancing;
        session.assignment.clear();
        if forget_member_id {
            session.member_id = None;
        }
        drop(session);
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Record that everything below `offset` on this partition was consumed,
    /// using the configured commit mode.
    pub(crate) async fn commit_offset(
        self: &Arc<Self>,
        topic: &str,
        partition: PartitionId,
        offset: Offset,
    ) -> Result<()> {
        self.commit_offset_with(topic, partition, offset, self.directory.config().commit_mode)
            .await
    }

    /// Commit one offset. Stale commits (at or below the last confirmed
    /// commit) are dropped; the local cache only advances once the cluster
    /// accepted the commit, so a failed commit can be retried later.
    pub(crate) async fn commit_offset_with(
        self: &Arc<Self>,
        topic: &str,
        partition: PartitionId,
        offset: Offset,
        mode: CommitMode,
    ) -> Result<()> {
        {
            let committed = self.committed.lock().await;
            if let Some(confirmed) = committed.get(&(topic.to_owned(), partition)) {
                if offset <= *confirmed {
                    debug!(topic, partition, offset, "skipping stale commit");
                    return Ok(());
                }
            }
        }

        let request = OffsetCommitRequest {
            group_id: self.group_id.clone(),
            offsets: vec![(topic.to_owned(), partition, offset)],
        };

        match mode {
            CommitMode::Sync => {
                self.send_commit(request).await?;
                self.record_confirmed(topic, partition, offset).await;
                Ok(())
            }
            CommitMode::Async => {
                let coordinator = self.clone();
                let topic = topic.to_owned();
                tokio::spawn(async move {
                    match coordinator.send_commit(request).await {
                        Ok(()) => {
                            coordinator.record_confirmed(&topic, partition, offset).await;
                        }
                        Err(err) => warn!(%err, "async offset commit failed"),
                    }
                });
                Ok(())
            }
        }
    }

    async fn send_commit(&self, request: OffsetCommitRequest) -> Result<()> {
        let connection = self.directory.any_connection().await?;
        let response = connection.commit_offsets(request).await?;
        if response.error.is_error() {
            return Err(ShoalError::OffsetCommit(response.error));
        }
        Ok(())
    }

    async fn record_confirmed(&self, topic: &str, partition: PartitionId, offset: Offset) {
        let mut committed = self.committed.lock().await;
        let entry = committed
            .entry((topic.to_owned(), partition))
            .or_insert(offset);
        *entry = (*entry).max(offset);
    }

    /// Last committed offset for a partition, if the group has one.
    pub(crate) async fn fetch_committed(
        &self,
        topic: &str,
        partition: PartitionId,
    ) -> Result<Option<Offset>> {
        let connection = self.directory.any_connection().await?;
        let response = connection
            .fetch_offsets(OffsetFetchRequest {
                group_id: self.group_id.clone(),
                partitions: vec![(topic.to_owned(), partition)],
            })
            .await?;
        if response.error.is_error() {
            return Err(ShoalError::Other(response.error.to_string()));
        }
        Ok(response
            .offsets
            .into_iter()
            .find(|(t, p, _)| t == topic && *p == partition)
            .and_then(|(_, _, offset)| offset))
    }

    /// Leave the group cleanly, stopping the heartbeat task.
    #[instrument(skip(self), fields(group = %self.group_id))]
    pub(crate) async fn leave(&self) -> Result<()> {
        self.end_event.notify();

        let member_id = {
            let mut session = self.session.write().await;
            session.state = GroupState::Unjoined;
            session.assignment.clear();
            session.member_id.take()
        };
        self.epoch.fetch_add(1, Ordering::SeqCst);

        if let Some(member_id) = member_id {
            let connection = self.directory.any_connection().await?;
            let response = connection
                .leave_group(LeaveGroupRequest {
                    group_id: self.group_id.clone(),
                    member_id,
                })
                .await?;
            if response.error.is_error() {
                warn!(error = %response.error, "leave group rejected");
            }
        }
        Ok(())
    }
}
