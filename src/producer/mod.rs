//! Batching producer.
//!
//! Records are partitioned, buffered into per-replica batches, and flushed
//! by one background task per replica. `send` resolves to a future that
//! yields the acknowledged offset once the batch lands.

mod accumulator;
mod config;
mod error;
mod event;
mod partition_producer;
mod partitioning;
mod record;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_lock::{Mutex, RwLock};
use futures_util::future::join_all;
use tracing::instrument;

use crate::directory::ClusterDirectory;
use crate::error::{Result, ShoalError};
use crate::metadata::TopicMetadata;
use crate::types::{ReplicaKey, StickyEvent};

use accumulator::RecordAccumulator;
use event::NotifyCounter;
use partition_producer::PartitionProducer;

pub use config::{ProducerConfig, ProducerConfigBuilder};
pub use error::ProducerError;
pub use partitioning::{Partitioner, PartitionerConfig, SiphashRoundRobinPartitioner};
pub use record::{FutureRecordMetadata, Record, RecordData, RecordKey, RecordMetadata};

/// An interface for producing records to any topic of the cluster.
///
/// The `send` function does not wait for records to be committed by the
/// cluster, it buffers them. Await the returned future, or call
/// [`Producer::flush`], to make sure records have actually been sent.
pub struct Producer {
    config: Arc<ProducerConfig>,
    directory: Arc<ClusterDirectory>,
    accumulator: RecordAccumulator,
    last_error: Arc<RwLock<Option<ProducerError>>>,
    flush_events: Mutex<Vec<(Arc<NotifyCounter>, Arc<NotifyCounter>)>>,
    end_event: Arc<StickyEvent>,
    closed: AtomicBool,
}

impl Producer {
    pub(crate) fn new(directory: Arc<ClusterDirectory>, config: ProducerConfig) -> Self {
        let accumulator = RecordAccumulator::new(config.batch_size);
        Self {
            config: Arc::new(config),
            directory,
            accumulator,
            last_error: Arc::new(RwLock::new(None)),
            flush_events: Mutex::new(Vec::new()),
            end_event: StickyEvent::shared(),
            closed: AtomicBool::new(false),
        }
    }

    /// Buffer one record for sending.
    ///
    /// The returned [`FutureRecordMetadata`] resolves with the acknowledged
    /// partition and offset once the record's batch has been flushed.
    #[instrument(skip(self, record), fields(topic = %record.topic()))]
    pub async fn send(&self, record: Record) -> Result<FutureRecordMetadata> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProducerError::ProducerClosed.into());
        }
        if let Some(error) = self.last_error.read().await.clone() {
            return Err(error.into());
        }

        let topic_meta = self.topic_metadata(record.topic()).await?;
        let partition_config = PartitionerConfig::new(topic_meta.partition_count());
        let partition = self.config.partitioner.partition(
            &partition_config,
            record.key.as_bytes(),
            record.value.as_ref(),
        );

        let replica = ReplicaKey::new(record.topic().to_owned(), partition);
        let (handler, created) = self.accumulator.get_or_create(&replica).await;
        if created {
            let flush_event = (NotifyCounter::shared(), NotifyCounter::shared());
            self.flush_events.lock().await.push(flush_event.clone());
            PartitionProducer::start(
                self.config.clone(),
                replica.clone(),
                self.directory.clone(),
                handler.1.clone(),
                handler.0.clone(),
                self.last_error.clone(),
                self.end_event.clone(),
                flush_event,
            );
        }

        let push_record = self
            .accumulator
            .push_record(&handler, &replica, record.into_wire())
            .await?;
        Ok(push_record.future)
    }

    /// Convenience for sending one key/value pair.
    pub async fn send_key_value(
        &self,
        topic: impl Into<String>,
        key: impl Into<RecordKey>,
        value: impl Into<RecordData>,
    ) -> Result<FutureRecordMetadata> {
        self.send(Record {
            topic: topic.into(),
            key: key.into(),
            value: value.into(),
            headers: Vec::new(),
        })
        .await
    }

    /// Flush all buffered batches, waiting until every one has been sent.
    /// Fails with [`ProducerError::ProducerClosed`] once the producer is
    /// closed, since the background flushers are gone by then.
    pub async fn flush(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProducerError::ProducerClosed.into());
        }
        self.flush_impl().await
    }

    async fn flush_impl(&self) -> Result<()> {
        let events = self.flush_events.lock().await.clone();
        for (request, _) in &events {
            request.notify();
        }
        join_all(events.iter().map(|(_, done)| done.wait())).await;
        Ok(())
    }

    /// Flush outstanding batches and stop the background tasks.
    /// `send` and `flush` after close fail with
    /// [`ProducerError::ProducerClosed`].
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // final drain happens before the flusher tasks are told to stop
        self.flush_impl().await?;
        self.end_event.notify();
        Ok(())
    }

    async fn topic_metadata(&self, topic: &str) -> Result<TopicMetadata> {
        let metadata = self.directory.current_metadata().await;
        if let Some(topic_meta) = metadata.topic(topic) {
            return Ok(topic_meta.clone());
        }
        // unknown topic, maybe created after our snapshot
        let metadata = self.directory.refresh_metadata().await?;
        metadata
            .topic(topic)
            .cloned()
            .ok_or_else(|| ShoalError::TopicNotFound(topic.to_owned()))
    }
}
