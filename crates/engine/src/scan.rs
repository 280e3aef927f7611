//! Snapshot scan
//!
//! Lists every snapshot under a directory tree. The response carries four
//! tables: one summary row per snapshot, one row per table file, one row per
//! digest and one disk-space row per host. Scans only read headers; chunk
//! CRCs are left to restore and to the verifier.

use std::path::Path;

use strata_core::{ColumnInfo, ColumnType, ResultTable, Value, FAILURE, SUCCESS};
use strata_durability::{ScanOptions, SnapshotFiles, SnapshotInventory};
use tracing::{info, warn};

use crate::cluster::ClusterInner;
use crate::request::resolve_path;
use crate::response::{ResponseStatus, SnapshotResponse, SnapshotResult};
use crate::topology::hostname;

/// Columns of the per-snapshot summary table
pub const SCAN_SUMMARY_COLUMNS: &[ColumnInfo] = &[
    ColumnInfo::new("PATH", ColumnType::Varchar),
    ColumnInfo::new("NONCE", ColumnType::Varchar),
    ColumnInfo::new("TXNID", ColumnType::BigInt),
    ColumnInfo::new("CREATED", ColumnType::BigInt),
    ColumnInfo::new("SIZE", ColumnType::BigInt),
    ColumnInfo::new("TABLES_REQUIRED", ColumnType::Varchar),
    ColumnInfo::new("TABLES_MISSING", ColumnType::Varchar),
    ColumnInfo::new("TABLES_INCOMPLETE", ColumnType::Varchar),
    ColumnInfo::new("COMPLETE", ColumnType::Varchar),
    ColumnInfo::new("TERMINAL", ColumnType::Varchar),
];

/// Columns of the per-file table
pub const SCAN_FILE_COLUMNS: &[ColumnInfo] = &[
    ColumnInfo::new("HOST_ID", ColumnType::Integer),
    ColumnInfo::new("HOSTNAME", ColumnType::Varchar),
    ColumnInfo::new("PATH", ColumnType::Varchar),
    ColumnInfo::new("NAME", ColumnType::Varchar),
    ColumnInfo::new("TXNID", ColumnType::BigInt),
    ColumnInfo::new("CREATED", ColumnType::BigInt),
    ColumnInfo::new("TABLE", ColumnType::Varchar),
    ColumnInfo::new("COMPLETED", ColumnType::Varchar),
    ColumnInfo::new("SIZE", ColumnType::BigInt),
    ColumnInfo::new("IS_REPLICATED", ColumnType::Varchar),
    ColumnInfo::new("PARTITIONS", ColumnType::Varchar),
    ColumnInfo::new("TOTAL_PARTITIONS", ColumnType::Integer),
    ColumnInfo::new("READABLE", ColumnType::Varchar),
    ColumnInfo::new("RESULT", ColumnType::Varchar),
    ColumnInfo::new("ERR_MSG", ColumnType::Varchar),
];

/// Columns of the per-digest table
pub const SCAN_DIGEST_COLUMNS: &[ColumnInfo] = &[
    ColumnInfo::new("HOST_ID", ColumnType::Integer),
    ColumnInfo::new("PATH", ColumnType::Varchar),
    ColumnInfo::new("NAME", ColumnType::Varchar),
    ColumnInfo::new("TABLES", ColumnType::Varchar),
    ColumnInfo::new("RESULT", ColumnType::Varchar),
    ColumnInfo::new("ERR_MSG", ColumnType::Varchar),
];

/// Columns of the per-host disk space table
pub const SCAN_DISK_SPACE_COLUMNS: &[ColumnInfo] = &[
    ColumnInfo::new("HOSTNAME", ColumnType::Varchar),
    ColumnInfo::new("PATH", ColumnType::Varchar),
    ColumnInfo::new("TOTAL", ColumnType::BigInt),
    ColumnInfo::new("FREE", ColumnType::BigInt),
    ColumnInfo::new("USED", ColumnType::BigInt),
    ColumnInfo::new("RESULT", ColumnType::Varchar),
    ColumnInfo::new("ERR_MSG", ColumnType::Varchar),
];

const ERR_MSG_COLUMN: &[ColumnInfo] = &[ColumnInfo::new("ERR_MSG", ColumnType::Varchar)];

fn flag(value: bool) -> &'static str {
    if value {
        "TRUE"
    } else {
        "FALSE"
    }
}

fn join<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: ToString,
{
    items
        .into_iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub(crate) fn snapshot_scan(
    inner: &ClusterInner,
    path: Option<&str>,
) -> SnapshotResult<SnapshotResponse> {
    let path = match path.map(str::trim) {
        Some(p) if !p.is_empty() => p,
        _ => {
            let mut table = ResultTable::new(ERR_MSG_COLUMN);
            table.add_row(vec![Value::from(
                "Provided path was null or the empty string",
            )]);
            return Ok(SnapshotResponse::with_status(
                ResponseStatus::GracefulFailure,
                vec![table],
            ));
        }
    };
    let dir = resolve_path(path)?;
    let host_ids: Vec<u32> = inner.state.read().topology.host_ids().collect();

    let mut summary = ResultTable::new(SCAN_SUMMARY_COLUMNS);
    let mut files = ResultTable::new(SCAN_FILE_COLUMNS);
    let mut digests = ResultTable::new(SCAN_DIGEST_COLUMNS);
    let mut disk = ResultTable::new(SCAN_DISK_SPACE_COLUMNS);

    let options = ScanOptions {
        nonce: None,
        recursive: true,
        validate: false,
    };
    let inventory = match SnapshotInventory::scan(&dir, &options) {
        Ok(inventory) => inventory,
        Err(e) => {
            let err = if e.kind() == std::io::ErrorKind::NotFound {
                format!("Path {} does not exist", dir.display())
            } else {
                format!("Path {} cannot be listed: {}", dir.display(), e)
            };
            warn!(target: "strata::snapshot", path = %dir.display(), error = %err, "Snapshot scan failed");
            for host_id in host_ids {
                files.add_row(file_failure_row(host_id, &dir.display().to_string(), &err));
                digests.add_row(vec![
                    Value::Integer(host_id as i32),
                    Value::from(dir.display().to_string()),
                    Value::from(""),
                    Value::from(""),
                    Value::from(FAILURE),
                    Value::from(err.as_str()),
                ]);
                disk.add_row(vec![
                    Value::from(hostname(host_id)),
                    Value::from(dir.display().to_string()),
                    Value::BigInt(0),
                    Value::BigInt(0),
                    Value::BigInt(0),
                    Value::from(FAILURE),
                    Value::from(err.as_str()),
                ]);
            }
            return Ok(SnapshotResponse::from_tables(vec![
                summary, files, digests, disk,
            ]));
        }
    };

    for (unreadable, err) in inventory.unreadable_dirs() {
        files.add_row(file_failure_row(0, &unreadable.display().to_string(), err));
    }
    for snapshot in inventory.snapshots() {
        summary.add_row(summary_row(snapshot));
        add_file_rows(&mut files, snapshot);
        add_digest_rows(&mut digests, snapshot);
    }
    summary.sort_by_column("NONCE");

    let used: u64 = inventory.snapshots().map(|s| s.total_size()).sum();
    let space = disk_space_row(&dir, used);
    for host_id in host_ids {
        let mut row = space.clone();
        row.insert(0, Value::from(hostname(host_id)));
        disk.add_row(row);
    }

    info!(
        target: "strata::snapshot",
        path = %dir.display(),
        snapshots = inventory.len(),
        "Snapshot scan completed"
    );
    Ok(SnapshotResponse::from_tables(vec![
        summary, files, digests, disk,
    ]))
}

/// Disk space columns after HOSTNAME for the filesystem holding `dir`
fn disk_space_row(dir: &Path, used: u64) -> Vec<Value> {
    let path = Value::from(dir.display().to_string());
    match fs2::total_space(dir).and_then(|total| Ok((total, fs2::free_space(dir)?))) {
        Ok((total, free)) => vec![
            path,
            Value::BigInt(total as i64),
            Value::BigInt(free as i64),
            Value::BigInt(used as i64),
            Value::from(SUCCESS),
            Value::from(""),
        ],
        Err(e) => {
            warn!(target: "strata::snapshot", path = %dir.display(), error = %e, "Cannot read disk space");
            vec![
                path,
                Value::BigInt(0),
                Value::BigInt(0),
                Value::BigInt(used as i64),
                Value::from(FAILURE),
                Value::from(e.to_string()),
            ]
        }
    }
}

fn summary_row(snapshot: &SnapshotFiles) -> Vec<Value> {
    vec![
        Value::from(snapshot.dir.display().to_string()),
        Value::from(snapshot.nonce.as_str()),
        Value::BigInt(snapshot.txn_id().map(|t| t.raw() as i64).unwrap_or(-1)),
        Value::BigInt(snapshot.created().map(|c| c as i64 / 1000).unwrap_or(0)),
        Value::BigInt(snapshot.total_size() as i64),
        Value::from(join(snapshot.tables_required())),
        Value::from(join(snapshot.tables_missing())),
        Value::from(join(snapshot.tables_incomplete())),
        Value::from(flag(snapshot.is_complete())),
        Value::from(flag(snapshot.is_terminal())),
    ]
}

fn file_failure_row(host_id: u32, path: &str, err: &str) -> Vec<Value> {
    vec![
        Value::Integer(host_id as i32),
        Value::from(hostname(host_id)),
        Value::from(path),
        Value::from(""),
        Value::BigInt(-1),
        Value::BigInt(0),
        Value::from(""),
        Value::from(flag(false)),
        Value::BigInt(0),
        Value::from(flag(false)),
        Value::from(""),
        Value::Integer(0),
        Value::from(flag(false)),
        Value::from(FAILURE),
        Value::from(err),
    ]
}

fn add_file_rows(table: &mut ResultTable, snapshot: &SnapshotFiles) {
    let dir = snapshot.dir.display().to_string();
    for file in snapshot.tables.values().flatten() {
        let header = file.header.as_ref();
        let (result, err) = match &file.error {
            None => (SUCCESS, String::new()),
            Some(e) => (FAILURE, e.clone()),
        };
        table.add_row(vec![
            Value::Integer(file.host_id as i32),
            Value::from(hostname(file.host_id)),
            Value::from(dir.as_str()),
            Value::from(file.name()),
            Value::BigInt(header.map(|h| h.txn_id.raw() as i64).unwrap_or(-1)),
            Value::BigInt(header.map(|h| h.created_at as i64 / 1000).unwrap_or(0)),
            Value::from(file.table.as_str()),
            Value::from(flag(file.completed)),
            Value::BigInt(file.size as i64),
            Value::from(flag(header.map(|h| h.is_replicated).unwrap_or(false))),
            Value::from(header.map(|h| join(&h.partition_ids)).unwrap_or_default()),
            Value::Integer(header.map(|h| h.total_partitions as i32).unwrap_or(0)),
            Value::from(flag(file.readable())),
            Value::from(result),
            Value::from(err),
        ]);
    }
}

fn add_digest_rows(table: &mut ResultTable, snapshot: &SnapshotFiles) {
    let dir = snapshot.dir.display().to_string();
    for digest in &snapshot.digests {
        let (tables, result, err) = match (&digest.record, &digest.error) {
            (Some(record), _) => (join(&record.tables), SUCCESS, String::new()),
            (None, err) => (String::new(), FAILURE, err.clone().unwrap_or_default()),
        };
        table.add_row(vec![
            Value::Integer(digest.host_id as i32),
            Value::from(dir.as_str()),
            Value::from(digest.name()),
            Value::from(tables),
            Value::from(result),
            Value::from(err),
        ]);
    }
}
