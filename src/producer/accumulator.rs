use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use async_channel::Sender;
use async_lock::{Mutex, RwLock};
use tracing::trace;

use crate::producer::record::{BatchMetadata, FutureRecordMetadata, PartialFutureRecordMetadata};
use crate::producer::ProducerError;
use crate::transport::{ErrorCode, WireRecord};
use crate::types::{Offset, ReplicaKey};

use super::event::NotifyCounter;

pub(crate) type BatchHandler = (Arc<BatchEvents>, Arc<Mutex<VecDeque<ProducerBatch>>>);

/// Fixed per-batch overhead counted against the size limit.
const BATCH_HEADER_SIZE: usize = 64;

/// This struct acts as a queue that accumulates records into batches.
/// It is used by the producer to buffer records before sending them to the
/// partition leader. The batches are keyed by replica.
pub(crate) struct RecordAccumulator {
    batch_size: usize,
    batches: RwLock<HashMap<ReplicaKey, BatchHandler>>,
}

impl RecordAccumulator {
    pub(crate) fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            batches: RwLock::new(HashMap::default()),
        }
    }

    /// Queue handler for a replica, created lazily on the first record.
    /// The boolean is true when the handler was just created, so the caller
    /// can start the matching background flusher.
    pub(crate) async fn get_or_create(&self, replica: &ReplicaKey) -> (BatchHandler, bool) {
        if let Some(handler) = self.batches.read().await.get(replica) {
            return (handler.clone(), false);
        }

        let mut batches = self.batches.write().await;
        // double-checked, another sender may have won the race
        if let Some(handler) = batches.get(replica) {
            return (handler.clone(), false);
        }
        let handler: BatchHandler = (BatchEvents::shared(), Arc::new(Mutex::new(VecDeque::new())));
        batches.insert(replica.clone(), handler.clone());
        (handler, true)
    }

    /// Add a record to the accumulator.
    pub(crate) async fn push_record(
        &self,
        handler: &BatchHandler,
        replica: &ReplicaKey,
        record: WireRecord,
    ) -> Result<PushRecord, ProducerError> {
        let (batch_events, batches_lock) = handler;

        let mut batches = batches_lock.lock().await;
        if let Some(batch) = batches.back_mut() {
            if let Some(push_record) = batch.push_record(record.clone()) {
                if batch.is_full() {
                    batch_events.notify_batch_full();
                }
                return Ok(PushRecord::new(push_record.into_future_record_metadata(
                    replica.topic.clone(),
                    replica.partition,
                )));
            } else {
                batch_events.notify_batch_full();
            }
        }

        trace!(%replica, "batch is full, creating a new batch");

        let mut batch = ProducerBatch::new(self.batch_size);

        match batch.push_record(record) {
            Some(push_record) => {
                batch_events.notify_new_batch();

                if batch.is_full() {
                    batch_events.notify_batch_full();
                }

                batches.push_back(batch);

                Ok(PushRecord::new(push_record.into_future_record_metadata(
                    replica.topic.clone(),
                    replica.partition,
                )))
            }
            None => Err(ProducerError::RecordTooLarge(self.batch_size)),
        }
    }
}

pub(crate) struct PushRecord {
    pub(crate) future: FutureRecordMetadata,
}

impl PushRecord {
    fn new(future: FutureRecordMetadata) -> Self {
        Self { future }
    }
}

pub(crate) struct ProducerBatch {
    pub(crate) notify: Sender<(Offset, ErrorCode)>,
    batch_metadata: Arc<BatchMetadata>,
    write_limit: usize,
    current_size: usize,
    is_full: bool,
    create_time: Instant,
    pub(crate) records: Vec<WireRecord>,
}

impl ProducerBatch {
    fn new(write_limit: usize) -> Self {
        let now = Instant::now();
        let (sender, receiver) = async_channel::bounded(1);
        let batch_metadata = Arc::new(BatchMetadata::new(receiver));

        Self {
            notify: sender,
            batch_metadata,
            is_full: false,
            write_limit,
            create_time: now,
            current_size: 0,
            records: vec![],
        }
    }

    pub(crate) fn elapsed_ms(&self) -> u128 {
        self.create_time.elapsed().as_millis()
    }

    /// Add a record to the batch.
    /// Return None if the record does not fit in the batch, so
    /// the RecordAccumulator can create more batches if needed.
    fn push_record(&mut self, record: WireRecord) -> Option<PartialFutureRecordMetadata> {
        let relative_offset = self.records.len() as Offset;
        let record_size = record.write_size();

        if self.estimated_size() + record_size > self.write_limit {
            self.is_full = true;
            return None;
        }

        if self.estimated_size() + record_size == self.write_limit {
            self.is_full = true;
        }

        self.current_size += record_size;

        self.records.push(record);

        Some(PartialFutureRecordMetadata::new(
            relative_offset,
            self.batch_metadata.clone(),
        ))
    }

    pub(crate) fn is_full(&self) -> bool {
        self.is_full || self.write_limit <= self.estimated_size()
    }

    fn estimated_size(&self) -> usize {
        self.current_size + BATCH_HEADER_SIZE
    }
}

#[derive(Default)]
pub(crate) struct BatchEvents {
    batch_full: NotifyCounter,
    new_batch: NotifyCounter,
}

impl BatchEvents {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn listen_batch_full(&self) {
        self.batch_full.wait().await
    }

    pub async fn listen_new_batch(&self) {
        self.new_batch.wait().await
    }

    pub fn notify_batch_full(&self) {
        self.batch_full.notify();
    }

    pub fn notify_new_batch(&self) {
        self.new_batch.notify();
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use super::*;

    fn record() -> WireRecord {
        WireRecord {
            key: Some(Bytes::from_static(b"key")),
            value: Bytes::from_static(b"value"),
            headers: vec![],
        }
    }

    #[test]
    fn test_producer_batch_push_and_not_full() {
        let size = record().write_size();

        // Producer batch that can store three records
        let mut pb = ProducerBatch::new(size * 3 + 1 + BATCH_HEADER_SIZE);

        assert!(pb.push_record(record()).is_some());
        assert!(pb.push_record(record()).is_some());
        assert!(pb.push_record(record()).is_some());

        assert!(!pb.is_full());

        assert!(pb.push_record(record()).is_none());
    }

    #[test]
    fn test_producer_batch_push_and_full() {
        let size = record().write_size();

        // Producer batch that can store exactly three records
        let mut pb = ProducerBatch::new(size * 3 + BATCH_HEADER_SIZE);

        assert!(pb.push_record(record()).is_some());
        assert!(pb.push_record(record()).is_some());
        assert!(pb.push_record(record()).is_some());

        assert!(pb.is_full());

        assert!(pb.push_record(record()).is_none());
    }

    #[tokio::test]
    async fn test_record_accumulator() {
        let size = record().write_size();
        let accumulator = RecordAccumulator::new(size * 3 + BATCH_HEADER_SIZE);
        let timeout = std::time::Duration::from_millis(200);

        let replica = ReplicaKey::new("events", 0);
        let (handler, created) = accumulator.get_or_create(&replica).await;
        assert!(created);
        let (_, again_created) = accumulator.get_or_create(&replica).await;
        assert!(!again_created);

        let batch_events = handler.0.clone();

        accumulator
            .push_record(&handler, &replica, record())
            .await
            .expect("failed push");
        assert!(
            tokio::time::timeout(timeout, batch_events.listen_new_batch())
                .await
                .is_ok()
        );

        assert!(
            tokio::time::timeout(timeout, batch_events.listen_batch_full())
                .await
                .is_err()
        );
        accumulator
            .push_record(&handler, &replica, record())
            .await
            .expect("failed push");
        accumulator
            .push_record(&handler, &replica, record())
            .await
            .expect("failed push");
        assert!(
            tokio::time::timeout(timeout, batch_events.listen_batch_full())
                .await
                .is_ok()
        );
    }
}
