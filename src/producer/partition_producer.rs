use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use async_lock::{Mutex, RwLock};
use tokio::time::Sleep;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::directory::{backoff_and_wait, create_backoff, ClusterDirectory};
use crate::error::{Result, ShoalError};
use crate::transport::{ErrorCode, ProduceRequest, SharedConnection};
use crate::types::{ReplicaKey, StickyEvent};

use super::accumulator::{BatchEvents, ProducerBatch};
use super::config::ProducerConfig;
use super::event::NotifyCounter;
use super::ProducerError;

/// Struct that is responsible for sending produce requests to the leader of
/// a given partition.
pub(crate) struct PartitionProducer {
    config: Arc<ProducerConfig>,
    replica: ReplicaKey,
    directory: Arc<ClusterDirectory>,
    batches_lock: Arc<Mutex<VecDeque<ProducerBatch>>>,
    batch_events: Arc<BatchEvents>,
    last_error: Arc<RwLock<Option<ProducerError>>>,
}

impl PartitionProducer {
    fn shared(
        config: Arc<ProducerConfig>,
        replica: ReplicaKey,
        directory: Arc<ClusterDirectory>,
        batches_lock: Arc<Mutex<VecDeque<ProducerBatch>>>,
        batch_events: Arc<BatchEvents>,
        last_error: Arc<RwLock<Option<ProducerError>>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            replica,
            directory,
            batches_lock,
            batch_events,
            last_error,
        })
    }

    pub(crate) fn start(
        config: Arc<ProducerConfig>,
        replica: ReplicaKey,
        directory: Arc<ClusterDirectory>,
        batches_lock: Arc<Mutex<VecDeque<ProducerBatch>>>,
        batch_events: Arc<BatchEvents>,
        last_error: Arc<RwLock<Option<ProducerError>>>,
        end_event: Arc<StickyEvent>,
        flush_event: (Arc<NotifyCounter>, Arc<NotifyCounter>),
    ) {
        let producer = PartitionProducer::shared(
            config,
            replica,
            directory,
            batches_lock,
            batch_events,
            last_error,
        );
        tokio::spawn(async move {
            producer.run(end_event, flush_event).await;
        });
    }

    #[instrument(skip(self, end_event, flush_event), fields(replica = %self.replica))]
    async fn run(
        &self,
        end_event: Arc<StickyEvent>,
        flush_event: (Arc<NotifyCounter>, Arc<NotifyCounter>),
    ) {
        use tokio::select;

        let mut linger_sleep: Option<Pin<Box<Sleep>>> = None;

        loop {
            select! {
                _ = end_event.listen() => {
                    info!("partition producer end event received");
                    break;
                },
                _ = flush_event.0.wait() => {
                    debug!("flush event received");
                    if let Err(e) = self.flush(true).await {
                        error!("failed to flush producer: {}", e);
                        self.set_error(e).await;
                    }
                    flush_event.1.notify();
                    linger_sleep = None;
                }
                _ = self.batch_events.listen_batch_full() => {
                    debug!("batch full event");
                    if let Err(e) = self.flush(false).await {
                        error!("failed to flush producer: {}", e);
                        self.set_error(e).await;
                    }
                }
                _ = self.batch_events.listen_new_batch() => {
                    debug!("new batch event");
                    linger_sleep = Some(Box::pin(tokio::time::sleep(self.config.linger)));
                }
                _ = async { linger_sleep.as_mut().expect("unexpected failure").await }, if linger_sleep.is_some() => {
                    debug!("flushing because linger time was reached");
                    if let Err(e) = self.flush(false).await {
                        error!("failed to flush producer: {:?}", e);
                        self.set_error(e).await;
                    }
                    linger_sleep = None;
                }
            }
        }
        info!("partition producer end");
    }

    async fn set_error(&self, error: ShoalError) {
        let mut error_handle = self.last_error.write().await;
        *error_handle = Some(ProducerError::Internal(error.to_string()));
    }

    /// Flush all the batches that are full or have reached the linger time.
    /// If force is set to true, flush all batches regardless of linger time.
    pub(crate) async fn flush(&self, force: bool) -> Result<()> {
        let mut batches_ready = vec![];
        {
            let mut batches = self.batches_lock.lock().await;
            while !batches.is_empty() {
                let ready = force
                    || batches.front().map_or(false, |batch| {
                        batch.is_full() || batch.elapsed_ms() >= self.config.linger.as_millis()
                    });
                if ready {
                    if let Some(batch) = batches.pop_front() {
                        batches_ready.push(batch);
                    }
                } else {
                    break;
                }
            }
        }

        // batches are sent serially so same-partition order survives retries
        for batch in batches_ready {
            self.send_batch(batch).await?;
        }

        Ok(())
    }

    /// Send one batch to the current leader, following leadership moves with
    /// a bounded number of retries. The batch notifier is always resolved,
    /// success or failure, so record futures never hang.
    async fn send_batch(&self, batch: ProducerBatch) -> Result<()> {
        let notify = batch.notify.clone();
        let request = ProduceRequest {
            topic: self.replica.topic.clone(),
            partition: self.replica.partition,
            required_acks: self.config.ack_level.required_acks(),
            records: batch.records,
        };

        let mut backoff = create_backoff()?;
        let mut attempts = 0;

        loop {
            let connection = match self.leader_connection().await {
                Ok(connection) => connection,
                Err(err) => {
                    attempts += 1;
                    if attempts > self.config.send_retries {
                        notify_batch(&notify, ErrorCode::Other(err.to_string())).await;
                        return Err(err);
                    }
                    warn!(%err, attempts, "leader not reachable, retrying");
                    backoff_and_wait(&mut backoff).await;
                    let _ = self.directory.refresh_metadata().await;
                    continue;
                }
            };

            let result =
                tokio::time::timeout(self.config.send_timeout, connection.produce(request.clone()))
                    .await;

            match result {
                Err(_elapsed) => {
                    let code = ErrorCode::Other("produce request timed out".to_owned());
                    notify_batch(&notify, code.clone()).await;
                    return Err(ProducerError::Rejected(code).into());
                }
                Ok(Err(transport_err)) => {
                    self.invalidate(&connection).await;
                    attempts += 1;
                    if attempts > self.config.send_retries {
                        let code = ErrorCode::Other(transport_err.to_string());
                        notify_batch(&notify, code.clone()).await;
                        return Err(ProducerError::Rejected(code).into());
                    }
                    warn!(%transport_err, attempts, "produce transport failure, retrying");
                    backoff_and_wait(&mut backoff).await;
                    let _ = self.directory.refresh_metadata().await;
                }
                Ok(Ok(response)) => match response.error {
                    ErrorCode::None => {
                        if let Err(_e) = notify.send((response.base_offset, ErrorCode::None)).await
                        {
                            trace!("failed to notify produce result, receiver was dropped");
                        }
                        return Ok(());
                    }
                    ErrorCode::NotLeader => {
                        self.invalidate(&connection).await;
                        attempts += 1;
                        if attempts > self.config.send_retries {
                            notify_batch(&notify, ErrorCode::NotLeader).await;
                            return Err(ProducerError::Rejected(ErrorCode::NotLeader).into());
                        }
                        warn!(
                            replica = %self.replica,
                            attempts,
                            "leadership moved, refreshing metadata and retrying"
                        );
                        backoff_and_wait(&mut backoff).await;
                        let _ = self.directory.refresh_metadata().await;
                    }
                    other => {
                        notify_batch(&notify, other.clone()).await;
                        return Err(ProducerError::Rejected(other).into());
                    }
                },
            }
        }
    }

    async fn leader_connection(&self) -> Result<SharedConnection> {
        let leader = self.directory.leader_for(&self.replica).await?;
        self.directory.connection_for(leader).await
    }

    async fn invalidate(&self, connection: &SharedConnection) {
        if let Some(node_id) = connection.node_id() {
            self.directory.invalidate(node_id).await;
        }
    }
}

async fn notify_batch(
    notify: &async_channel::Sender<(crate::types::Offset, ErrorCode)>,
    code: ErrorCode,
) {
    if let Err(_e) = notify.send((-1, code)).await {
        trace!("failed to notify produce failure, receiver was dropped");
    }
}
