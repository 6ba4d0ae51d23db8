//! Group consumer.
//!
//! A consumer is one member of a consumer group. It polls the partitions
//! the group coordinator assigned to it, tracks a cursor per partition, and
//! commits consumed offsets so a restart resumes where the group left off.

mod config;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_lock::Mutex;
use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::codec::Codec;
use crate::config::{CommitMode, OffsetReset};
use crate::directory::ClusterDirectory;
use crate::error::{Result, ShoalError};
use crate::group::{GroupCoordinator, GroupState};
use crate::transport::{ErrorCode, FetchRequest, OffsetSpec};
use crate::types::{Offset, PartitionId, ReplicaKey};

pub use config::{ConsumerConfig, ConsumerConfigBuilder};

/// One record delivered by a poll.
#[derive(Debug, Clone)]
pub struct ConsumedRecord {
    topic: String,
    partition: PartitionId,
    offset: Offset,
    key: Option<Bytes>,
    value: Bytes,
    headers: Vec<(String, Vec<u8>)>,
}

impl ConsumedRecord {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn offset(&self) -> Offset {
        self.offset
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn headers(&self) -> &[(String, Vec<u8>)] {
        &self.headers
    }

    /// Decode the value with the given codec.
    pub fn decode_value<T, C: Codec<T>>(&self, codec: &C) -> anyhow::Result<T> {
        codec.decode(&self.value)
    }

    /// Decode the key with the given codec, if the record has one.
    pub fn decode_key<T, C: Codec<T>>(&self, codec: &C) -> anyhow::Result<Option<T>> {
        self.key.as_deref().map(|key| codec.decode(key)).transpose()
    }
}

/// An interface for consuming records as a member of a consumer group.
pub struct Consumer {
    directory: Arc<ClusterDirectory>,
    config: ConsumerConfig,
    coordinator: Arc<GroupCoordinator>,
    cursors: Mutex<HashMap<(String, PartitionId), Offset>>,
    closed: AtomicBool,
}

impl Consumer {
    pub(crate) async fn subscribe(
        directory: Arc<ClusterDirectory>,
        config: ConsumerConfig,
        group_id: String,
        topics: Vec<String>,
    ) -> Result<Self> {
        let coordinator = GroupCoordinator::new(directory.clone(), group_id, topics);
        coordinator.join().await?;
        coordinator.start_heartbeat();
        Ok(Self {
            directory,
            config,
            coordinator,
            cursors: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Partitions currently assigned to this member.
    pub async fn assignment(&self) -> Vec<(String, PartitionId)> {
        self.coordinator.assignment().await
    }

    pub async fn group_state(&self) -> GroupState {
        self.coordinator.state().await
    }

    /// Fetch the next slice of records from the assigned partitions.
    ///
    /// Blocks until at least one record is available or `timeout` elapses.
    /// An empty result means the timeout passed with nothing to deliver.
    /// If a rebalance lands mid-poll, records from partitions this member
    /// no longer owns are dropped rather than delivered.
    #[instrument(skip(self))]
    pub async fn poll(&self, timeout: Duration) -> Result<Vec<ConsumedRecord>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ShoalError::ConsumerClosed);
        }
        let deadline = Instant::now() + timeout;

        loop {
            if self.coordinator.is_failed() {
                return Err(ShoalError::GroupJoin("group session lost".to_owned()));
            }

            let epoch = self.coordinator.assignment_epoch();
            let assignment = self.coordinator.assignment().await;
            self.sync_cursors(&assignment).await?;

            let mut collected = self.fetch_assigned(&assignment).await?;

            if epoch != self.coordinator.assignment_epoch() {
                let fresh = self.coordinator.assignment().await;
                let before = collected.len();
                collected.retain(|record| {
                    fresh
                        .iter()
                        .any(|(t, p)| t == &record.topic && *p == record.partition)
                });
                debug!(
                    discarded = before - collected.len(),
                    "assignment changed mid-poll, dropped revoked partitions"
                );
            }

            if !collected.is_empty() {
                self.advance_cursors(&collected).await;
                if self.config.auto_commit {
                    self.commit_delivered(&collected).await;
                }
                return Ok(collected);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let remaining = deadline - now;
            tokio::time::sleep(self.config.fetch_backoff.min(remaining)).await;
        }
    }

    /// Commit the cursor positions of every assigned partition.
    pub async fn commit(&self) -> Result<()> {
        let assignment = self.coordinator.assignment().await;
        let cursors = self.cursors.lock().await.clone();
        for (topic, partition) in assignment {
            if let Some(cursor) = cursors.get(&(topic.clone(), partition)) {
                // the cursor is the next offset to read, commit the last read one
                let consumed = cursor - 1;
                if consumed >= 0 {
                    self.coordinator
                        .commit_offset(&topic, partition, consumed)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Leave the group. Polls after close fail with
    /// [`ShoalError::ConsumerClosed`].
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.coordinator.leave().await
    }

    /// Align the cursor map with the current assignment. Revoked partitions
    /// are dropped; freshly assigned ones start at the committed offset plus
    /// one, or at the reset position when the group never committed.
    async fn sync_cursors(&self, assignment: &[(String, PartitionId)]) -> Result<()> {
        let mut cursors = self.cursors.lock().await;
        cursors.retain(|key, _| assignment.iter().any(|(t, p)| t == &key.0 && *p == key.1));

        for (topic, partition) in assignment {
            let key = (topic.clone(), *partition);
            if cursors.contains_key(&key) {
                continue;
            }
            let start = match self.coordinator.fetch_committed(topic, *partition).await? {
                Some(committed) => committed + 1,
                None => self.reset_offset(topic, *partition).await?,
            };
            debug!(topic = %topic, partition = *partition, start, "initialized partition cursor");
            cursors.insert(key, start);
        }
        Ok(())
    }

    async fn reset_offset(&self, topic: &str, partition: PartitionId) -> Result<Offset> {
        let spec = match self.config.offset_reset {
            OffsetReset::Earliest => OffsetSpec::Earliest,
            OffsetReset::Latest => OffsetSpec::Latest,
        };
        let replica = ReplicaKey::new(topic.to_owned(), partition);
        let leader = self.directory.leader_for(&replica).await?;
        let connection = self.directory.connection_for(leader).await?;
        let response = connection.list_offset(topic, partition, spec).await?;
        if response.error.is_error() {
            return Err(ShoalError::Other(response.error.to_string()));
        }
        Ok(response.offset)
    }

    /// One fetch round over the assigned partitions, bounded by the poll
    /// budget. Per-partition transport failures are skipped so one dead
    /// broker does not starve the rest of the assignment.
    async fn fetch_assigned(
        &self,
        assignment: &[(String, PartitionId)],
    ) -> Result<Vec<ConsumedRecord>> {
        let mut budget = self.config.max_poll_records;
        let mut collected = Vec::new();

        for (topic, partition) in assignment {
            if budget == 0 {
                break;
            }
            let cursor = {
                let cursors = self.cursors.lock().await;
                match cursors.get(&(topic.clone(), *partition)) {
                    Some(cursor) => *cursor,
                    None => continue,
                }
            };

            let replica = ReplicaKey::new(topic.clone(), *partition);
            let leader = self.directory.leader_for(&replica).await?;
            let connection = match self.directory.connection_for(leader).await {
                Ok(connection) => connection,
                Err(err) => {
                    warn!(%replica, %err, "skipping partition, leader not reachable");
                    continue;
                }
            };

            let response = match connection
                .fetch(FetchRequest {
                    topic: topic.clone(),
                    partition: *partition,
                    offset: cursor,
                    max_records: budget,
                })
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    warn!(%replica, %err, "fetch transport failure, skipping partition");
                    self.directory.invalidate(leader).await;
                    continue;
                }
            };

            match response.error {
                ErrorCode::None => {
                    for (offset, record) in response.records {
                        collected.push(ConsumedRecord {
                            topic: topic.clone(),
                            partition: *partition,
                            offset,
                            key: record.key,
                            value: record.value,
                            headers: record.headers,
                        });
                        budget = budget.saturating_sub(1);
                    }
                }
                ErrorCode::OffsetOutOfRange => {
                    let reset = self.reset_offset(topic, *partition).await?;
                    warn!(%replica, cursor, reset, "cursor out of range, resetting");
                    self.cursors
                        .lock()
                        .await
                        .insert((topic.clone(), *partition), reset);
                }
                ErrorCode::NotLeader => {
                    self.directory.invalidate(leader).await;
                    self.directory.refresh_metadata().await?;
                }
                other => {
                    return Err(ShoalError::Other(other.to_string()));
                }
            }
        }

        Ok(collected)
    }

    async fn advance_cursors(&self, records: &[ConsumedRecord]) {
        let mut cursors = self.cursors.lock().await;
        for record in records {
            let cursor = cursors
                .entry((record.topic.clone(), record.partition))
                .or_insert(record.offset);
            *cursor = (*cursor).max(record.offset + 1);
        }
    }

    /// Auto-commit after a delivery. Always asynchronous: the records are
    /// already handed to the caller, so a commit failure must not fail the
    /// poll. An unconfirmed commit is simply retried by a later one.
    async fn commit_delivered(&self, records: &[ConsumedRecord]) {
        let mut highest: HashMap<(String, PartitionId), Offset> = HashMap::new();
        for record in records {
            let entry = highest
                .entry((record.topic.clone(), record.partition))
                .or_insert(record.offset);
            *entry = (*entry).max(record.offset);
        }
        for ((topic, partition), offset) in highest {
            if let Err(err) = self
                .coordinator
                .commit_offset_with(&topic, partition, offset, CommitMode::Async)
                .await
            {
                warn!(%topic, partition, offset, %err, "auto-commit failed");
            }
        }
    }
}
