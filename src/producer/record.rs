use std::sync::Arc;

use async_channel::Receiver;
use async_lock::RwLock;
use bytes::Bytes;

use crate::codec::Codec;
use crate::error::Result;
use crate::transport::{ErrorCode, WireRecord};
use crate::types::{Offset, PartitionId};

use super::error::ProducerError;

/// Key of a record, possibly absent.
///
/// Records without a key are spread over partitions round-robin instead of
/// being hashed to one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordKey(RecordKeyInner);

impl RecordKey {
    pub const NULL: Self = Self(RecordKeyInner::Null);

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.0 {
            RecordKeyInner::Null => None,
            RecordKeyInner::Key(data) => Some(data.as_ref()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RecordKeyInner {
    Null,
    Key(RecordData),
}

impl<K: Into<Vec<u8>>> From<K> for RecordKey {
    fn from(key: K) -> Self {
        Self(RecordKeyInner::Key(RecordData::from(key)))
    }
}

/// Owned record payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordData(Bytes);

impl RecordData {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl AsRef<[u8]> for RecordData {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<V: Into<Vec<u8>>> From<V> for RecordData {
    fn from(value: V) -> Self {
        Self(Bytes::from(value.into()))
    }
}

/// A record to be appended to a topic.
#[derive(Debug, Clone)]
pub struct Record {
    pub(crate) topic: String,
    pub(crate) key: RecordKey,
    pub(crate) value: RecordData,
    pub(crate) headers: Vec<(String, Vec<u8>)>,
}

impl Record {
    pub fn new(
        topic: impl Into<String>,
        key: impl Into<RecordKey>,
        value: impl Into<RecordData>,
    ) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            value: value.into(),
            headers: Vec::new(),
        }
    }

    /// A keyless record, partitioned round-robin.
    pub fn keyless(topic: impl Into<String>, value: impl Into<RecordData>) -> Self {
        Self {
            topic: topic.into(),
            key: RecordKey::NULL,
            value: value.into(),
            headers: Vec::new(),
        }
    }

    /// Build a record by running the value through a codec.
    pub fn encode<T, C: Codec<T>>(
        topic: impl Into<String>,
        key: impl Into<RecordKey>,
        value: &T,
        codec: &C,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            topic: topic.into(),
            key: key.into(),
            value: codec.encode(value)?.into(),
            headers: Vec::new(),
        })
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub(crate) fn into_wire(self) -> WireRecord {
        WireRecord {
            key: self.key.as_bytes().map(Bytes::copy_from_slice),
            value: self.value.into_bytes(),
            headers: self.headers,
        }
    }
}

/// Acknowledged position of a produced record.
#[derive(Clone, Debug)]
pub struct RecordMetadata {
    pub(crate) topic: String,
    pub(crate) partition_id: PartitionId,
    pub(crate) offset: Offset,
}

impl RecordMetadata {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Partition index the record was sent to
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// The offset of the record in the topic/partition.
    pub fn offset(&self) -> Offset {
        self.offset
    }
}

/// Possible states of a batch in the accumulator
pub(crate) enum BatchMetadataState {
    /// The batch is buffered, waiting to be flushed to the leader
    Buffered(Receiver<(Offset, ErrorCode)>),
    /// The batch was acknowledged. Base offset is known
    Sent(Offset),
    /// There was an error sending the batch
    Failed(ProducerError),
}

pub(crate) struct BatchMetadata {
    state: RwLock<BatchMetadataState>,
}

impl BatchMetadata {
    pub(crate) fn new(receiver: Receiver<(Offset, ErrorCode)>) -> Self {
        Self {
            state: RwLock::new(BatchMetadataState::Buffered(receiver)),
        }
    }

    /// Wait for the base offset of the batch. This is the offset of the first
    /// record in the batch and it is known once the leader acknowledged it.
    pub(crate) async fn base_offset(&self) -> Result<Offset> {
        let mut state = self.state.write().await;
        match &*state {
            BatchMetadataState::Buffered(receiver) => {
                let msg = receiver
                    .recv()
                    .await
                    .map_err(|_| ProducerError::GetRecordMetadata);

                match msg {
                    Ok((offset, error)) => {
                        if error == ErrorCode::None {
                            *state = BatchMetadataState::Sent(offset);
                            Ok(offset)
                        } else {
                            let error = ProducerError::Rejected(error);
                            *state = BatchMetadataState::Failed(error.clone());
                            Err(error.into())
                        }
                    }
                    Err(err) => {
                        *state = BatchMetadataState::Failed(err.clone());
                        Err(err.into())
                    }
                }
            }
            BatchMetadataState::Sent(offset) => Ok(*offset),
            BatchMetadataState::Failed(error) => Err(error.clone().into()),
        }
    }
}

/// Partial information about record metadata.
/// Used to create FutureRecordMetadata once the replica is known.
pub(crate) struct PartialFutureRecordMetadata {
    /// The offset of the record relative to the start of its batch.
    relative_offset: Offset,
    batch_metadata: Arc<BatchMetadata>,
}

impl PartialFutureRecordMetadata {
    pub(crate) fn new(relative_offset: Offset, batch_metadata: Arc<BatchMetadata>) -> Self {
        Self {
            relative_offset,
            batch_metadata,
        }
    }

    pub(crate) fn into_future_record_metadata(
        self,
        topic: String,
        partition_id: PartitionId,
    ) -> FutureRecordMetadata {
        FutureRecordMetadata {
            topic,
            partition_id,
            relative_offset: self.relative_offset,
            batch_metadata: self.batch_metadata,
        }
    }
}

/// Output of [`crate::producer::Producer::send`].
/// Used to wait for the `RecordMetadata` of the record being sent.
pub struct FutureRecordMetadata {
    pub(crate) topic: String,
    pub(crate) partition_id: PartitionId,
    pub(crate) relative_offset: Offset,
    pub(crate) batch_metadata: Arc<BatchMetadata>,
}

impl FutureRecordMetadata {
    /// wait for the record metadata to be available
    pub async fn wait(self) -> Result<RecordMetadata> {
        let base_offset = self.batch_metadata.base_offset().await?;
        Ok(RecordMetadata {
            topic: self.topic,
            partition_id: self.partition_id,
            offset: base_offset + self.relative_offset,
        })
    }
}
