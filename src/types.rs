//! Shared type aliases and primitive synchronization helpers.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use event_listener::Event;

/// Index of a partition inside a topic
pub type PartitionId = u32;
/// Identifier of a broker node inside the cluster
pub type NodeId = i32;
/// Position of a record inside a partition log
pub type Offset = i64;

/// Topic name plus partition index, the unit of log addressing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplicaKey {
    pub topic: String,
    pub partition: PartitionId,
}

impl ReplicaKey {
    pub fn new(topic: impl Into<String>, partition: PartitionId) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for ReplicaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

impl<S: Into<String>> From<(S, PartitionId)> for ReplicaKey {
    fn from((topic, partition): (S, PartitionId)) -> Self {
        Self::new(topic, partition)
    }
}

const DEFAULT_EVENT_ORDERING: Ordering = Ordering::SeqCst;

/// One-shot event that stays signalled forever once notified.
///
/// Used to tear down background tasks: every listener woken after
/// `notify` observes the flag.
#[derive(Debug)]
pub struct StickyEvent {
    flag: AtomicBool,
    event: Event,
}

impl StickyEvent {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self {
            flag: AtomicBool::new(false),
            event: Event::new(),
        })
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(DEFAULT_EVENT_ORDERING)
    }

    pub async fn listen(&self) {
        if self.is_set() {
            return;
        }

        let listener = self.event.listen();

        if self.is_set() {
            return;
        }

        listener.await
    }

    pub fn notify(&self) {
        self.flag.store(true, DEFAULT_EVENT_ORDERING);
        self.event.notify(usize::MAX);
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::StickyEvent;

    #[tokio::test]
    async fn test_sticky_event_stays_set() {
        let event = StickyEvent::shared();
        let timeout = Duration::from_millis(50);

        assert!(tokio::time::timeout(timeout, event.listen()).await.is_err());

        event.notify();
        assert!(event.is_set());
        assert!(tokio::time::timeout(timeout, event.listen()).await.is_ok());
        // stays signalled for late listeners
        assert!(tokio::time::timeout(timeout, event.listen()).await.is_ok());
    }
}
