//! Choosing which snapshot to restore

use strata_core::ResultTable;
use strata_durability::{digest_file_name, SnapshotFiles, SnapshotInventory};
use tracing::{debug, info};

use crate::request::RestoreRequest;
use crate::response::{missing_digest_row, SnapshotError, SnapshotResult, DIGEST_DIAGNOSTIC_COLUMNS};
use crate::topology::Topology;

/// True if a strict majority of the snapshot's hosts hold a complete copy
/// and every table it names can be rebuilt from intact files.
pub(crate) fn is_viable(snapshot: &SnapshotFiles) -> bool {
    let Some(host_count) = snapshot.host_count() else {
        return false;
    };
    let complete = snapshot.complete_hosts().len() as u32;
    if complete * 2 <= host_count {
        return false;
    }
    snapshot
        .tables_required()
        .iter()
        .all(|table| snapshot.has_valid_partition_set(table))
}

/// Pick the snapshot named by the request, or the latest viable one.
///
/// An explicit nonce is taken as-is as long as any digest exists; damage in
/// its table files is reported per table later. Auto-pick orders by the
/// monotonic snapshot sequence, then by creation time, and never looks at the
/// terminal flag.
pub(crate) fn select_snapshot(
    inventory: SnapshotInventory,
    request: &RestoreRequest,
    topology: &Topology,
) -> SnapshotResult<SnapshotFiles> {
    match &request.nonce {
        Some(nonce) => {
            let found = inventory
                .into_snapshots()
                .into_iter()
                .find(|s| &s.nonce == nonce && !s.digests.is_empty());
            found.ok_or_else(|| {
                let mut diagnostics = ResultTable::new(DIGEST_DIAGNOSTIC_COLUMNS);
                let path = request.path.display().to_string();
                for host_id in topology.host_ids() {
                    diagnostics.add_row(missing_digest_row(
                        host_id,
                        &path,
                        &digest_file_name(nonce, host_id),
                    ));
                }
                SnapshotError::NoDigestsFound {
                    nonce: nonce.clone(),
                    diagnostics,
                }
            })
        }
        None => {
            let mut candidates: Vec<SnapshotFiles> = inventory
                .into_snapshots()
                .into_iter()
                .filter(|s| {
                    let viable = is_viable(s);
                    debug!(target: "strata::snapshot", nonce = %s.nonce, viable, "Restore candidate");
                    viable
                })
                .collect();
            candidates.sort_by_key(|s| (s.sequence(), s.created()));
            let chosen = candidates
                .pop()
                .ok_or_else(|| SnapshotError::NoViableSnapshot(request.path.display().to_string()))?;
            info!(
                target: "strata::snapshot",
                nonce = %chosen.nonce,
                sequence = chosen.sequence().unwrap_or(0),
                terminal = chosen.is_terminal(),
                "Selected latest viable snapshot"
            );
            Ok(chosen)
        }
    }
}
