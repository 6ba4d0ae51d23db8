use std::sync::atomic::{AtomicU32, Ordering};

use siphasher::sip::SipHasher;

use crate::types::PartitionId;

/// A trait for defining a partitioning strategy for key/value records.
///
/// A Partitioner is given the key and value of a record along with the
/// partition count of the topic, and decides which partition the record
/// lands on. It is up to the implementor to decide how records with no
/// key are placed.
///
/// See [`SiphashRoundRobinPartitioner`] for a reference implementation.
pub trait Partitioner {
    fn partition(
        &self,
        config: &PartitionerConfig,
        key: Option<&[u8]>,
        value: &[u8],
    ) -> PartitionId;
}

pub struct PartitionerConfig {
    pub partition_count: u32,
}

impl PartitionerConfig {
    pub fn new(partition_count: u32) -> Self {
        Self { partition_count }
    }
}

/// A [`Partitioner`] which combines hashing and round-robin partition assignment
///
/// - Records with keys get their keys hashed with siphash
/// - Records without keys get assigned to partitions using round-robin
pub struct SiphashRoundRobinPartitioner {
    index: AtomicU32,
}

impl SiphashRoundRobinPartitioner {
    pub fn new() -> Self {
        Self {
            index: AtomicU32::new(0),
        }
    }
}

impl Default for SiphashRoundRobinPartitioner {
    fn default() -> Self {
        Self::new()
    }
}

impl Partitioner for SiphashRoundRobinPartitioner {
    fn partition(
        &self,
        config: &PartitionerConfig,
        maybe_key: Option<&[u8]>,
        _value: &[u8],
    ) -> PartitionId {
        match maybe_key {
            Some(key) => partition_siphash(key, config.partition_count),
            None => {
                // the same unkeyed counter is shared across topics, which
                // still spreads records evenly within each one
                let index = self.index.fetch_add(1, Ordering::Relaxed);
                index % config.partition_count
            }
        }
    }
}

fn partition_siphash(key: &[u8], partition_count: u32) -> PartitionId {
    use std::hash::{Hash, Hasher};

    assert!(partition_count > 0, "partition count must not be zero");
    let mut hasher = SipHasher::new();
    key.hash(&mut hasher);
    let hashed = hasher.finish();

    (hashed % partition_count as u64) as PartitionId
}
