//! Transaction id generators
//!
//! One generator per partition plus one for the multi-partition initiator.
//! Each hands out strictly increasing ids carrying its partition id in the
//! low bits. Restore either resets every generator to the zero baseline or,
//! in recover mode, raises them to the ids recorded in the snapshot.

use std::collections::BTreeMap;

use strata_core::{PartitionId, TxnId, MP_INIT_PID};

/// Per-partition transaction id state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnIdGenerators {
    last: Vec<TxnId>,
    mp_last: TxnId,
}

impl TxnIdGenerators {
    /// Generators for `partition_count` partitions, all at the zero baseline
    pub fn new(partition_count: u32) -> Self {
        TxnIdGenerators {
            last: vec![TxnId::ZERO; partition_count as usize],
            mp_last: TxnId::ZERO,
        }
    }

    /// Number of data partitions
    pub fn partition_count(&self) -> u32 {
        self.last.len() as u32
    }

    /// Mint the next id for `partition_id` (or [`MP_INIT_PID`])
    pub fn next(&mut self, partition_id: PartitionId) -> Option<TxnId> {
        let slot = if partition_id == MP_INIT_PID {
            &mut self.mp_last
        } else {
            self.last.get_mut(partition_id as usize)?
        };
        let id = TxnId::compose(slot.sequence() + 1, partition_id);
        *slot = id;
        Some(id)
    }

    /// Mint the next multi-partition id
    pub fn next_mp(&mut self) -> TxnId {
        self.mp_last = TxnId::compose(self.mp_last.sequence() + 1, MP_INIT_PID);
        self.mp_last
    }

    /// Last id of every partition and the initiator
    pub fn last_ids(&self) -> BTreeMap<PartitionId, TxnId> {
        let mut ids: BTreeMap<PartitionId, TxnId> = self
            .last
            .iter()
            .enumerate()
            .map(|(pid, id)| (pid as PartitionId, *id))
            .collect();
        ids.insert(MP_INIT_PID, self.mp_last);
        ids
    }

    /// Drop all history: every generator goes back to the zero baseline
    pub fn reset(&mut self) {
        self.last.iter_mut().for_each(|id| *id = TxnId::ZERO);
        self.mp_last = TxnId::ZERO;
    }

    /// Raise generators to at least the given ids.
    ///
    /// Ids for partitions this layout does not have are ignored.
    pub fn raise_to(&mut self, floors: &BTreeMap<PartitionId, TxnId>) {
        for (&pid, &floor) in floors {
            let slot = if pid == MP_INIT_PID {
                &mut self.mp_last
            } else if let Some(slot) = self.last.get_mut(pid as usize) {
                slot
            } else {
                continue;
            };
            if floor.sequence() > slot.sequence() {
                *slot = TxnId::compose(floor.sequence(), pid);
            }
        }
    }
}
