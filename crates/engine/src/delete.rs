//! Snapshot delete
//!
//! Removes every digest and table file of the named snapshots. Paths and
//! nonces are paired by position. Each file yields one result row; a file
//! that cannot be removed does not stop the others.

use std::sync::Arc;

use strata_core::{ColumnInfo, ColumnType, HostId, ResultTable, Value, FAILURE, SUCCESS};
use strata_durability::{validate_nonce, ScanOptions, SnapshotInventory};
use tracing::{info, warn};

use crate::cluster::ClusterInner;
use crate::gate::try_acquire;
use crate::request::resolve_path;
use crate::response::{SnapshotError, SnapshotResponse, SnapshotResult};

/// Columns of the delete result table
pub const DELETE_RESULT_COLUMNS: &[ColumnInfo] = &[
    ColumnInfo::new("HOST_ID", ColumnType::Integer),
    ColumnInfo::new("PATH", ColumnType::Varchar),
    ColumnInfo::new("NONCE", ColumnType::Varchar),
    ColumnInfo::new("NAME", ColumnType::Varchar),
    ColumnInfo::new("SIZE", ColumnType::BigInt),
    ColumnInfo::new("DELETED", ColumnType::Varchar),
    ColumnInfo::new("RESULT", ColumnType::Varchar),
    ColumnInfo::new("ERR_MSG", ColumnType::Varchar),
];

struct DeleteRow<'a> {
    host_id: HostId,
    path: &'a str,
    nonce: &'a str,
    name: String,
    size: u64,
    outcome: Result<(), String>,
}

impl DeleteRow<'_> {
    fn into_values(self) -> Vec<Value> {
        let (deleted, result, err) = match self.outcome {
            Ok(()) => ("TRUE", SUCCESS, String::new()),
            Err(e) => ("FALSE", FAILURE, e),
        };
        vec![
            Value::Integer(self.host_id as i32),
            Value::from(self.path),
            Value::from(self.nonce),
            Value::from(self.name),
            Value::BigInt(self.size as i64),
            Value::from(deleted),
            Value::from(result),
            Value::from(err),
        ]
    }
}

pub(crate) fn snapshot_delete<P, N>(
    inner: &Arc<ClusterInner>,
    paths: &[P],
    nonces: &[N],
) -> SnapshotResult<SnapshotResponse>
where
    P: AsRef<str>,
    N: AsRef<str>,
{
    if paths.len() != nonces.len() {
        return Err(SnapshotError::invalid(format!(
            "A path must be provided for every nonce: {} paths, {} nonces",
            paths.len(),
            nonces.len()
        )));
    }
    let mut targets = Vec::with_capacity(paths.len());
    for (path, nonce) in paths.iter().zip(nonces) {
        let nonce = nonce.as_ref();
        validate_nonce(nonce).map_err(|e| SnapshotError::invalid(e.to_string()))?;
        targets.push((resolve_path(path.as_ref())?, nonce.to_string()));
    }

    let _guard = try_acquire(inner, "delete").map_err(SnapshotError::Busy)?;
    let mut results = ResultTable::new(DELETE_RESULT_COLUMNS);

    for (dir, nonce) in &targets {
        let dir_text = dir.display().to_string();
        let inventory = match SnapshotInventory::scan(dir, &ScanOptions {
            nonce: Some(nonce.clone()),
            recursive: false,
            validate: false,
        }) {
            Ok(inventory) => inventory,
            Err(e) => {
                warn!(target: "strata::snapshot", path = %dir_text, error = %e, "Cannot list snapshot directory");
                results.add_row(
                    DeleteRow {
                        host_id: 0,
                        path: &dir_text,
                        nonce,
                        name: String::new(),
                        size: 0,
                        outcome: Err(e.to_string()),
                    }
                    .into_values(),
                );
                continue;
            }
        };

        for snapshot in inventory.snapshots() {
            let digests = snapshot
                .digests
                .iter()
                .map(|d| (d.host_id, &d.path, d.size));
            let tables = snapshot
                .tables
                .values()
                .flatten()
                .map(|f| (f.host_id, &f.path, f.size));
            for (host_id, path, size) in tables.chain(digests) {
                let outcome = std::fs::remove_file(path).map_err(|e| e.to_string());
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                results.add_row(
                    DeleteRow {
                        host_id,
                        path: &dir_text,
                        nonce,
                        name,
                        size,
                        outcome,
                    }
                    .into_values(),
                );
            }
        }
        info!(target: "strata::snapshot", path = %dir_text, nonce = %nonce, "Snapshot deleted");
    }
    Ok(SnapshotResponse::from_tables(vec![results]))
}
