//! Snapshot restore coordinator
//!
//! Restore holds the snapshot gate for its whole run, so it never overlaps a
//! save. Steps:
//!
//! 1. Scan the directory (non-recursive, chunk CRCs validated)
//! 2. Pick the snapshot: the requested nonce, or the latest viable one
//! 3. Prepare every table under the read lock, then store under the write lock
//! 4. Apply the transaction id policy: plain restore resets every generator
//!    to zero; recover raises them to the ids recorded in the digests
//!
//! Per-table problems become `FAILURE` rows; only a missing snapshot or bad
//! parameters fail the call.

mod loader;
mod plan;

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use strata_core::{
    ColumnInfo, ColumnType, PartitionId, ResultTable, TxnId, Value, FAILURE, SUCCESS,
};
use strata_durability::{now_micros, ScanOptions, SnapshotFiles, SnapshotInventory};
use tracing::{info, warn};

use crate::cluster::ClusterInner;
use crate::gate::try_acquire;
use crate::request::RestoreRequest;
use crate::response::{
    ResponseStatus, SnapshotError, SnapshotResponse, SnapshotResult, DIGEST_DIAGNOSTIC_COLUMNS,
};
use crate::status::{SnapshotKind, StatusTarget};
use crate::topology::{hostname, Topology};

/// Columns of the restore result table
pub const RESTORE_RESULT_COLUMNS: &[ColumnInfo] = &[
    ColumnInfo::new("HOST_ID", ColumnType::Integer),
    ColumnInfo::new("HOSTNAME", ColumnType::Varchar),
    ColumnInfo::new("SITE_ID", ColumnType::Integer),
    ColumnInfo::new("TABLE", ColumnType::Varchar),
    ColumnInfo::new("PARTITION_ID", ColumnType::Integer),
    ColumnInfo::new("RESULT", ColumnType::Varchar),
    ColumnInfo::new("ERR_MSG", ColumnType::Varchar),
];

pub(crate) fn snapshot_restore(
    inner: &Arc<ClusterInner>,
    request: &RestoreRequest,
) -> SnapshotResult<SnapshotResponse> {
    let label = format!("restore {}", request.nonce.as_deref().unwrap_or("(latest)"));
    let _guard = try_acquire(inner, &label).map_err(SnapshotError::Busy)?;

    let options = ScanOptions::for_restore(request.nonce.as_deref());
    let inventory = match SnapshotInventory::scan(&request.path, &options) {
        Ok(inventory) => inventory,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => SnapshotInventory::default(),
        Err(e) => return Err(e.into()),
    };

    let (topology, config_duplicates) = {
        let state = inner.state.read();
        (state.topology.clone(), state.config.duplicates_path.clone())
    };
    let snapshot = plan::select_snapshot(inventory, request, &topology)?;

    if snapshot.first_digest().is_none() {
        warn!(target: "strata::snapshot", nonce = %snapshot.nonce, "No digest of the snapshot is readable");
        return Ok(SnapshotResponse::with_status(
            ResponseStatus::OperationalFailure,
            vec![unreadable_digests(&snapshot)],
        ));
    }
    let saved_count = digest_partition_count(&snapshot)?;
    if request.is_recover && saved_count != topology.partition_count() {
        return Err(SnapshotError::invalid(format!(
            "Recover requires the saved partition count {}, cluster has {}",
            saved_count,
            topology.partition_count()
        )));
    }

    info!(
        target: "strata::snapshot",
        nonce = %snapshot.nonce,
        path = %snapshot.dir.display(),
        recover = request.is_recover,
        saved_partitions = saved_count,
        partitions = topology.partition_count(),
        "Snapshot restore started"
    );

    let duplicates_dir = request
        .duplicates_path
        .clone()
        .or(config_duplicates)
        .unwrap_or_else(|| request.path.clone());

    let loads = {
        let state = inner.state.read();
        loader::prepare(&snapshot, &state, request)
    };
    let outcomes = {
        let mut state = inner.state.write();
        let outcomes = loader::apply(&mut state, loads, &duplicates_dir, &snapshot.nonce);
        state.txn.reset();
        if request.is_recover {
            let floors = saved_txn_ids(&snapshot);
            state.txn.raise_to(&floors);
            info!(target: "strata::snapshot", partitions = floors.len(), "Transaction ids recovered from snapshot");
        } else {
            info!(target: "strata::snapshot", "Transaction ids reset");
        }
        outcomes
    };

    record_status(inner, &snapshot, &outcomes);
    if let Some(sequence) = snapshot.sequence() {
        inner.sequence.fetch_max(sequence, Ordering::SeqCst);
    }

    let results = result_table(&topology, &outcomes);
    if results.failure_count() > 0 {
        warn!(target: "strata::snapshot", nonce = %snapshot.nonce, failures = results.failure_count(), "Snapshot restore completed with failures");
    } else {
        info!(target: "strata::snapshot", nonce = %snapshot.nonce, "Snapshot restore completed");
    }
    Ok(SnapshotResponse::from_tables(vec![results]))
}

fn unreadable_digests(snapshot: &SnapshotFiles) -> ResultTable {
    let mut table = ResultTable::new(DIGEST_DIAGNOSTIC_COLUMNS);
    for digest in &snapshot.digests {
        table.add_row(vec![
            Value::Integer(digest.host_id as i32),
            Value::from(snapshot.dir.display().to_string()),
            Value::from(digest.name()),
            Value::from(FAILURE),
            Value::from(digest.error.clone().unwrap_or_default()),
        ]);
    }
    table
}

/// Partition count all readable digests agree on
fn digest_partition_count(snapshot: &SnapshotFiles) -> SnapshotResult<u32> {
    let counts: std::collections::BTreeSet<u32> =
        snapshot.valid_digests().map(|d| d.partition_count).collect();
    match counts.len() {
        1 => Ok(counts.into_iter().next().unwrap_or(0)),
        _ => Err(SnapshotError::Corruption(format!(
            "digests of snapshot {} disagree on the partition count: {:?}",
            snapshot.nonce, counts
        ))),
    }
}

/// Highest id per partition across every readable digest
fn saved_txn_ids(snapshot: &SnapshotFiles) -> BTreeMap<PartitionId, TxnId> {
    let mut ids: BTreeMap<PartitionId, TxnId> = BTreeMap::new();
    for digest in snapshot.valid_digests() {
        for (&pid, &id) in &digest.partition_transaction_ids {
            let slot = ids.entry(pid).or_insert(id);
            if id > *slot {
                *slot = id;
            }
        }
    }
    ids
}

fn record_status(inner: &ClusterInner, snapshot: &SnapshotFiles, outcomes: &[loader::TableOutcome]) {
    let txn_id = snapshot.txn_id().unwrap_or(TxnId::ZERO);
    let path = snapshot.dir.display().to_string();
    let now = now_micros();
    let mut status = inner.status.lock();
    for outcome in outcomes {
        for file in &outcome.files {
            let id = status.begin(
                StatusTarget {
                    host_id: file.host_id,
                    table: outcome.table.clone(),
                    path: path.clone(),
                    filename: file.name.clone(),
                    nonce: snapshot.nonce.clone(),
                    txn_id,
                    kind: SnapshotKind::Restore,
                },
                now,
            );
            status.finish(id, now_micros(), file.size, outcome.result.is_ok());
        }
    }
}

/// One row per site: replicated tables report partition -1, partitioned
/// tables the site's partition.
fn result_table(topology: &Topology, outcomes: &[loader::TableOutcome]) -> ResultTable {
    let mut table = ResultTable::new(RESTORE_RESULT_COLUMNS);
    for outcome in outcomes {
        let (result, err) = match &outcome.result {
            Ok(_) => (SUCCESS, String::new()),
            Err(e) => (FAILURE, e.clone()),
        };
        for site in topology.sites() {
            let partition = if outcome.replicated {
                -1
            } else {
                site.partition_id as i32
            };
            table.add_row(vec![
                Value::Integer(site.host_id as i32),
                Value::from(hostname(site.host_id)),
                Value::Integer(site.site_id as i32),
                Value::from(outcome.table.as_str()),
                Value::Integer(partition),
                Value::from(result),
                Value::from(err.as_str()),
            ]);
        }
    }
    table
}
