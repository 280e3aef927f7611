//! Identifier types
//!
//! Hosts, sites and partitions are small integers. Transaction ids embed the
//! partition that generated them in their low bits, so ids minted by different
//! partitions never collide and each partition's ids are strictly increasing.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Cluster host identifier
pub type HostId = u32;

/// Execution site identifier (unique across the cluster)
pub type SiteId = u32;

/// Partition identifier
pub type PartitionId = u32;

/// A table row
pub type Row = Vec<crate::value::Value>;

/// Number of low bits of a [`TxnId`] that carry the partition id
pub const PARTITION_ID_BITS: u32 = 14;

/// Reserved partition id of the multi-partition initiator
pub const MP_INIT_PID: PartitionId = (1 << PARTITION_ID_BITS) - 1;

/// Largest partition id a data partition may use
pub const MAX_PARTITION_ID: PartitionId = MP_INIT_PID - 1;

/// Transaction identifier
///
/// Layout: `sequence << 14 | partition_id`. [`TxnId::ZERO`] is the baseline
/// every partition starts from after a plain restore.
///
/// Serializes as a fixed-width 16 digit hex string so that manifests holding
/// the same set of ids always have the same byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TxnId(u64);

impl TxnId {
    /// The zero baseline
    pub const ZERO: TxnId = TxnId(0);

    /// Wrap a raw id
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        TxnId(raw)
    }

    /// Raw id
    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Compose an id from a per-partition sequence number and a partition id
    #[inline]
    pub const fn compose(sequence: u64, partition_id: PartitionId) -> Self {
        TxnId((sequence << PARTITION_ID_BITS) | (partition_id as u64 & MP_INIT_PID as u64))
    }

    /// Per-partition sequence number
    #[inline]
    pub const fn sequence(&self) -> u64 {
        self.0 >> PARTITION_ID_BITS
    }

    /// Partition that minted this id
    #[inline]
    pub const fn partition_id(&self) -> PartitionId {
        (self.0 & MP_INIT_PID as u64) as PartitionId
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TxnId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:016x}", self.0))
    }
}

impl<'de> Deserialize<'de> for TxnId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        u64::from_str_radix(&s, 16)
            .map(TxnId)
            .map_err(|e| serde::de::Error::custom(format!("invalid txn id '{}': {}", s, e)))
    }
}
