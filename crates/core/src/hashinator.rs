//! Partition routing
//!
//! Maps a partitioning key to a partition with a stable hash, so the same
//! key always lands on the same partition for a given partition count. Restore
//! uses this to redistribute rows when the partition count changed.

use crate::types::PartitionId;
use crate::value::Value;
use xxhash_rust::xxh3::xxh3_64;

/// Routes partitioning keys to partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hashinator {
    partition_count: u32,
}

impl Hashinator {
    /// Create a hashinator for `partition_count` partitions (at least one)
    pub fn new(partition_count: u32) -> Self {
        Hashinator {
            partition_count: partition_count.max(1),
        }
    }

    /// Number of partitions keys are spread over
    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Partition owning `key`
    pub fn partition_for(&self, key: &Value) -> PartitionId {
        if key.is_null() {
            return 0;
        }
        (xxh3_64(&key.key_bytes()) % self.partition_count as u64) as PartitionId
    }
}
