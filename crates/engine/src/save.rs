//! Snapshot save coordinator
//!
//! A save runs in four steps:
//!
//! 1. Admission through the gate (run, queue, or reject as in progress)
//! 2. Table selection and the feasibility check; nothing is written if any
//!    host/table pair would fail
//! 3. Capture of every selected table under the cluster lock, stamped with a
//!    fresh multi-partition transaction id and the next snapshot sequence
//! 4. Writing: per host, one table file per table, then the host's digest
//!
//! Write failures are caught per file and reported as `FAILURE` rows; they
//! never stop other files from being written.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use strata_core::{
    Catalog, ColumnInfo, ColumnType, HostId, PartitionId, ResultTable, Row, TableSchema, TxnId,
    Value, FAILURE, SUCCESS,
};
use strata_durability::{
    digest_path, export_file_name, now_micros, parse_snapshot_file_name, read_digest,
    table_file_path, write_digest, write_export, DigestRecord, SavedColumn, SnapshotFileName,
    TableFileError, TableFileHeader, TableFileWriter, TextFormat, DIGEST_VERSION,
};
use tracing::{info, warn};

use crate::cluster::ClusterInner;
use crate::gate::{admit_save, GateGuard, SaveAdmission};
use crate::request::{SaveFormat, SaveRequest};
use crate::response::{SnapshotResponse, SnapshotResult};
use crate::retry::RetryTask;
use crate::status::{SnapshotKind, StatusTarget};
use crate::topology::{hostname, Topology};

/// Columns of the save result table
pub const SAVE_RESULT_COLUMNS: &[ColumnInfo] = &[
    ColumnInfo::new("HOST_ID", ColumnType::Integer),
    ColumnInfo::new("HOSTNAME", ColumnType::Varchar),
    ColumnInfo::new("TABLE", ColumnType::Varchar),
    ColumnInfo::new("RESULT", ColumnType::Varchar),
    ColumnInfo::new("ERR_MSG", ColumnType::Varchar),
];

/// A save for the same nonce is running, or a request is already queued
pub const SNAPSHOT_IN_PROGRESS: &str = "SNAPSHOT IN PROGRESS";

/// The request was parked until the running save finishes
pub const SNAPSHOT_REQUEST_QUEUED: &str = "SNAPSHOT REQUEST QUEUED";

/// A file of this snapshot is already on disk
pub const FILE_ALREADY_EXISTS: &str = "SNAPSHOT FILE WITH SAME NONCE ALREADY EXISTS";

/// The target directory cannot be written
pub const FILE_LOCATION_UNWRITABLE: &str = "FILE LOCATION UNWRITABLE";

/// Everything needed to write one snapshot, captured atomically
pub(crate) struct SavePlan {
    request: SaveRequest,
    kind: SnapshotKind,
    txn_id: TxnId,
    sequence: u64,
    created_at: u64,
    instance_id: String,
    topology: Topology,
    last_ids: BTreeMap<PartitionId, TxnId>,
    tables: Vec<CapturedTable>,
    faults: BTreeSet<String>,
    fsync: bool,
}

struct CapturedTable {
    schema: TableSchema,
    partitions: BTreeMap<PartitionId, Vec<Row>>,
}

fn result_row(host_id: HostId, table: &str, result: &str, err: &str) -> Row {
    vec![
        Value::Integer(host_id as i32),
        Value::from(hostname(host_id)),
        Value::from(table),
        Value::from(result),
        Value::from(err),
    ]
}

fn per_host_table(topology: &Topology, result: &str, err: &str) -> ResultTable {
    let mut table = ResultTable::new(SAVE_RESULT_COLUMNS);
    for host_id in topology.host_ids() {
        table.add_row(result_row(host_id, "", result, err));
    }
    table
}

/// Entry point for a client save request
pub(crate) fn snapshot_save(
    inner: &Arc<ClusterInner>,
    request: SaveRequest,
) -> SnapshotResult<SnapshotResponse> {
    request.validate()?;
    let topology = inner.state.read().topology.clone();

    match admit_save(inner, &request) {
        SaveAdmission::Run(guard) => run_admitted(inner, request, guard, SnapshotKind::Manual),
        SaveAdmission::InProgress => {
            info!(target: "strata::snapshot", nonce = %request.nonce, "Snapshot request rejected, save in progress");
            Ok(SnapshotResponse::from_tables(vec![per_host_table(
                &topology,
                FAILURE,
                SNAPSHOT_IN_PROGRESS,
            )]))
        }
        SaveAdmission::Queued => {
            if let Err(e) = ensure_retry_task(inner) {
                inner.gate.lock().clear_queue();
                inner.gate_idle.notify_all();
                return Err(e.into());
            }
            info!(target: "strata::snapshot", nonce = %request.nonce, "Snapshot request queued");
            Ok(SnapshotResponse::from_tables(vec![per_host_table(
                &topology,
                SUCCESS,
                SNAPSHOT_REQUEST_QUEUED,
            )]))
        }
    }
}

fn ensure_retry_task(inner: &Arc<ClusterInner>) -> io::Result<()> {
    let interval = inner.state.read().config.retry_interval();
    let task = RetryTask::spawn(Arc::downgrade(inner), interval)?;
    let previous = inner.retry.lock().replace(task);
    if let Some(previous) = previous {
        previous.cancel();
        inner.workers.lock().push(previous.into_handle());
    }
    Ok(())
}

/// Run a save that already holds the gate.
///
/// The gate is released when the files are written, which for a
/// non-blocking save happens on a background thread.
pub(crate) fn run_admitted(
    inner: &Arc<ClusterInner>,
    request: SaveRequest,
    guard: GateGuard,
    kind: SnapshotKind,
) -> SnapshotResult<SnapshotResponse> {
    let (tables, topology) = {
        let state = inner.state.read();
        let catalog = state.tables.catalog();
        if let Some(message) = unknown_tables_message(catalog, &request) {
            warn!(target: "strata::snapshot", nonce = %request.nonce, "{}", message);
            return Ok(SnapshotResponse::from_tables(vec![per_host_table(
                &state.topology,
                FAILURE,
                &message,
            )]));
        }
        (select_tables(catalog, &request), state.topology.clone())
    };

    let feasibility = check_feasibility(&request, &tables, &topology);
    if feasibility.failure_count() > 0 {
        warn!(
            target: "strata::snapshot",
            nonce = %request.nonce,
            failures = feasibility.failure_count(),
            "Snapshot save is not feasible"
        );
        return Ok(SnapshotResponse::from_tables(vec![feasibility]));
    }

    let plan = capture(inner, request, tables, topology, kind);
    info!(
        target: "strata::snapshot",
        nonce = %plan.request.nonce,
        txn_id = %plan.txn_id,
        sequence = plan.sequence,
        tables = plan.tables.len(),
        block = plan.request.block,
        label = guard.label(),
        "Snapshot save started"
    );

    if plan.request.block {
        let results = execute(inner, &plan);
        drop(guard);
        Ok(SnapshotResponse::from_tables(vec![results]))
    } else {
        let thread_inner = Arc::clone(inner);
        let handle = std::thread::Builder::new()
            .name("strata-snapshot-write".to_string())
            .spawn(move || {
                let _guard = guard;
                execute(&thread_inner, &plan);
            })?;
        inner.workers.lock().push(handle);
        Ok(SnapshotResponse::from_tables(vec![feasibility]))
    }
}

fn unknown_tables_message(catalog: &Catalog, request: &SaveRequest) -> Option<String> {
    if let Some(include) = &request.tables {
        let unknown: Vec<&str> = include
            .iter()
            .filter(|t| !catalog.contains(t))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Some(format!(
                "The following tables were specified to include in the snapshot, but are not present in the database: {}",
                unknown.join(", ")
            ));
        }
    }
    let unknown: Vec<&str> = request
        .skip_tables
        .iter()
        .filter(|t| !catalog.contains(t))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return Some(format!(
            "The following tables were specified to exclude from the snapshot, but are not present in the database: {}",
            unknown.join(", ")
        ));
    }
    None
}

fn select_tables(catalog: &Catalog, request: &SaveRequest) -> Vec<TableSchema> {
    catalog
        .iter()
        .filter(|t| {
            request
                .tables
                .as_ref()
                .map(|include| include.contains(&t.name))
                .unwrap_or(true)
        })
        .filter(|t| !request.skip_tables.contains(&t.name))
        .cloned()
        .collect()
}

/// Decide per host/table whether the save can proceed, before writing.
fn check_feasibility(
    request: &SaveRequest,
    tables: &[TableSchema],
    topology: &Topology,
) -> ResultTable {
    let mut results = ResultTable::new(SAVE_RESULT_COLUMNS);
    let dir = &request.path;

    let writable = std::fs::create_dir_all(dir).and_then(|_| check_writable(dir, &request.nonce));
    let unwritable = writable.err().map(|e| {
        format!("{}: {}: {}", FILE_LOCATION_UNWRITABLE, dir.display(), e)
    });

    match request.format {
        SaveFormat::Native => {
            for host_id in topology.host_ids() {
                let digest_exists = digest_path(dir, &request.nonce, host_id).exists();
                for table in tables {
                    let exists = digest_exists
                        || table_file_path(dir, &request.nonce, &table.name, host_id).exists();
                    let row = match (&unwritable, exists) {
                        (Some(msg), _) => result_row(host_id, &table.name, FAILURE, msg),
                        (None, true) => result_row(host_id, &table.name, FAILURE, FILE_ALREADY_EXISTS),
                        (None, false) => result_row(host_id, &table.name, SUCCESS, ""),
                    };
                    results.add_row(row);
                }
            }
        }
        SaveFormat::Text(format) => {
            for table in tables {
                let path = dir.join(export_file_name(&request.nonce, &table.name, format.extension()));
                let row = match (&unwritable, path.exists()) {
                    (Some(msg), _) => result_row(0, &table.name, FAILURE, msg),
                    (None, true) => result_row(0, &table.name, FAILURE, FILE_ALREADY_EXISTS),
                    (None, false) => result_row(0, &table.name, SUCCESS, ""),
                };
                results.add_row(row);
            }
        }
    }
    results
}

fn check_writable(dir: &Path, nonce: &str) -> io::Result<()> {
    let marker = dir.join(format!(".{}-write-check", nonce));
    std::fs::write(&marker, b"")?;
    std::fs::remove_file(&marker)
}

/// Highest snapshot sequence recorded by any readable digest in `dir`
pub(crate) fn max_digest_sequence(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_str()
                .and_then(parse_snapshot_file_name)
                .map(|n| matches!(n, SnapshotFileName::Digest { .. }))
                .unwrap_or(false)
        })
        .filter_map(|e| read_digest(&e.path()).ok())
        .map(|d| d.sequence)
        .max()
        .unwrap_or(0)
}

fn next_sequence(inner: &ClusterInner, dir: &Path) -> u64 {
    inner
        .sequence
        .fetch_max(max_digest_sequence(dir), Ordering::SeqCst);
    inner.sequence.fetch_add(1, Ordering::SeqCst) + 1
}

fn capture(
    inner: &ClusterInner,
    request: SaveRequest,
    tables: Vec<TableSchema>,
    topology: Topology,
    kind: SnapshotKind,
) -> SavePlan {
    let sequence = next_sequence(inner, &request.path);
    let faults = inner.faults.lock().clone();
    let mut state = inner.state.write();
    let txn_id = state.txn.next_mp();
    let last_ids = state.txn.last_ids();
    let partition_count = topology.partition_count();

    let tables = tables
        .into_iter()
        .map(|schema| {
            let pids: Vec<PartitionId> = if schema.is_replicated() {
                vec![0]
            } else {
                (0..partition_count).collect()
            };
            let partitions = pids
                .into_iter()
                .map(|pid| {
                    let rows = state
                        .tables
                        .partition_rows(&schema.name, pid)
                        .map(|rows| rows.to_vec())
                        .unwrap_or_default();
                    (pid, rows)
                })
                .collect();
            CapturedTable { schema, partitions }
        })
        .collect();

    SavePlan {
        kind,
        txn_id,
        sequence,
        created_at: now_micros(),
        instance_id: state.instance_id.clone(),
        last_ids,
        tables,
        faults,
        fsync: state.config.fsync,
        topology,
        request,
    }
}

fn execute(inner: &ClusterInner, plan: &SavePlan) -> ResultTable {
    let results = match plan.request.format {
        SaveFormat::Native => execute_native(inner, plan),
        SaveFormat::Text(format) => execute_text(inner, plan, format),
    };
    let failures = results.failure_count();
    if failures == 0 {
        info!(target: "strata::snapshot", nonce = %plan.request.nonce, "Snapshot save completed");
    } else {
        warn!(target: "strata::snapshot", nonce = %plan.request.nonce, failures, "Snapshot save completed with failures");
    }
    results
}

fn status_target(plan: &SavePlan, host_id: HostId, table: &str, filename: String) -> StatusTarget {
    StatusTarget {
        host_id,
        table: table.to_string(),
        path: plan.request.path.display().to_string(),
        filename,
        nonce: plan.request.nonce.clone(),
        txn_id: plan.txn_id,
        kind: plan.kind,
    }
}

fn execute_native(inner: &ClusterInner, plan: &SavePlan) -> ResultTable {
    let mut results = ResultTable::new(SAVE_RESULT_COLUMNS);
    let dir = &plan.request.path;

    for host_id in plan.topology.host_ids() {
        let mut host_complete = true;
        for table in &plan.tables {
            let path = table_file_path(dir, &plan.request.nonce, &table.schema.name, host_id);
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let id = inner.status.lock().begin(
                status_target(plan, host_id, &table.schema.name, filename),
                now_micros(),
            );

            let outcome = write_table_file(plan, host_id, table, &path);
            let (size, ok) = match &outcome {
                Ok(size) => (*size, true),
                Err(_) => (std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0), false),
            };
            inner.status.lock().finish(id, now_micros(), size, ok);

            match outcome {
                Ok(_) => results.add_row(result_row(host_id, &table.schema.name, SUCCESS, "")),
                Err(e) => {
                    host_complete = false;
                    warn!(
                        target: "strata::snapshot",
                        nonce = %plan.request.nonce,
                        host_id,
                        table = %table.schema.name,
                        error = %e,
                        "Table file write failed"
                    );
                    results.add_row(result_row(
                        host_id,
                        &table.schema.name,
                        FAILURE,
                        &e.to_string(),
                    ));
                }
            }
        }

        let record = DigestRecord {
            version: DIGEST_VERSION,
            nonce: plan.request.nonce.clone(),
            txn_id: plan.txn_id,
            sequence: plan.sequence,
            timestamp: plan.created_at,
            host_id,
            instance_id: plan.instance_id.clone(),
            host_count: plan.topology.host_count(),
            partition_count: plan.topology.partition_count(),
            tables: plan.tables.iter().map(|t| t.schema.name.clone()).collect(),
            partition_transaction_ids: plan.last_ids.clone(),
            complete: host_complete,
            terminal: plan.request.terminal,
        };
        if let Err(e) = write_digest(dir, &record, plan.fsync) {
            warn!(target: "strata::snapshot", nonce = %plan.request.nonce, host_id, error = %e, "Digest write failed");
            results.add_row(result_row(host_id, "", FAILURE, &e.to_string()));
        }
    }
    results
}

fn write_table_file(
    plan: &SavePlan,
    host_id: HostId,
    table: &CapturedTable,
    path: &Path,
) -> Result<u64, TableFileError> {
    let partition_ids: Vec<PartitionId> = if table.schema.is_replicated() {
        vec![0]
    } else {
        plan.topology.partitions_on_host(host_id).into_iter().collect()
    };
    let header = TableFileHeader {
        host_id,
        instance_id: plan.instance_id.clone(),
        table_name: table.schema.name.clone(),
        is_replicated: table.schema.is_replicated(),
        total_partitions: plan.topology.partition_count(),
        partition_ids: partition_ids.clone(),
        txn_id: plan.txn_id,
        sequence: plan.sequence,
        created_at: plan.created_at,
        codec_id: "identity".to_string(),
        columns: table
            .schema
            .columns
            .iter()
            .map(|c| SavedColumn {
                name: c.name.clone(),
                column_type: c.column_type,
            })
            .collect(),
    };

    let inject_fault = plan.faults.contains(&table.schema.name);
    let mut writer = TableFileWriter::create(path, &header, plan.fsync)?;
    for pid in partition_ids {
        let rows = table.partitions.get(&pid).map(Vec::as_slice).unwrap_or(&[]);
        writer.write_partition(pid, rows)?;
        if inject_fault {
            // Leaves the file behind without its completed flag
            return Err(TableFileError::Io(io::Error::new(
                io::ErrorKind::Other,
                "Injected write fault",
            )));
        }
    }
    writer.finish()
}

fn execute_text(inner: &ClusterInner, plan: &SavePlan, format: TextFormat) -> ResultTable {
    let mut results = ResultTable::new(SAVE_RESULT_COLUMNS);
    for table in &plan.tables {
        let name = export_file_name(&plan.request.nonce, &table.schema.name, format.extension());
        let path = plan.request.path.join(&name);
        let id = inner
            .status
            .lock()
            .begin(status_target(plan, 0, &table.schema.name, name), now_micros());

        let outcome = if plan.faults.contains(&table.schema.name) {
            Err(io::Error::new(io::ErrorKind::Other, "Injected write fault").into())
        } else {
            write_export(&path, format, table.partitions.values().flatten(), plan.fsync)
        };

        match outcome {
            Ok(size) => {
                inner.status.lock().finish(id, now_micros(), size, true);
                results.add_row(result_row(0, &table.schema.name, SUCCESS, ""));
            }
            Err(e) => {
                inner.status.lock().finish(id, now_micros(), 0, false);
                warn!(target: "strata::snapshot", table = %table.schema.name, error = %e, "Export write failed");
                results.add_row(result_row(0, &table.schema.name, FAILURE, &e.to_string()));
            }
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Cluster;
    use crate::config::SnapshotConfig;
    use std::time::Duration;
    use strata_core::{ColumnDef, ColumnType};

    fn cluster() -> Cluster {
        let c = Cluster::start(
            SnapshotConfig::default()
                .with_hosts(2)
                .with_retry_interval(Duration::from_millis(10))
                .with_fsync(false),
        )
        .unwrap();
        c.create_table(TableSchema::replicated(
            "R",
            vec![ColumnDef::new("ID", ColumnType::Integer)],
        ))
        .unwrap();
        c
    }

    fn err_messages(response: &SnapshotResponse) -> Vec<String> {
        response
            .first()
            .unwrap()
            .rows()
            .map(|r| r.get_str("ERR_MSG").unwrap_or("").to_string())
            .collect()
    }

    fn hold(c: &Cluster, dir: &Path, nonce: &str) -> GateGuard {
        match admit_save(c.inner(), &SaveRequest::new(dir, nonce)) {
            SaveAdmission::Run(guard) => guard,
            _ => panic!("idle gate must admit"),
        }
    }

    #[test]
    fn test_same_nonce_as_running_save_is_in_progress() {
        let dir = tempfile::tempdir().unwrap();
        let c = cluster();
        let guard = hold(&c, dir.path(), "X");

        let response = c
            .snapshot_save_request(SaveRequest::new(dir.path(), "X"))
            .unwrap();
        assert!(!response.is_success());
        for row in response.first().unwrap().rows() {
            assert_eq!(row.get_str("RESULT"), Some(FAILURE));
            assert_eq!(row.get_str("ERR_MSG"), Some(SNAPSHOT_IN_PROGRESS));
        }
        assert!(c.inner().gate.lock().clear_queue().is_none());
        drop(guard);
    }

    #[test]
    fn test_concurrent_requests_run_one_and_queue_one() {
        let dir = tempfile::tempdir().unwrap();
        let c = cluster();
        let guard = hold(&c, dir.path(), "RUN");

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let c = c.clone();
                let path = dir.path().to_path_buf();
                std::thread::spawn(move || {
                    c.snapshot_save_request(SaveRequest::new(path, format!("T{}", i)))
                        .unwrap()
                })
            })
            .collect();
        let mut queued = 0;
        let mut refused = 0;
        for handle in handles {
            let messages = err_messages(&handle.join().unwrap());
            assert_eq!(messages.len(), 2);
            if messages.iter().all(|m| m == SNAPSHOT_REQUEST_QUEUED) {
                queued += 1;
            } else {
                assert!(messages.iter().all(|m| m == SNAPSHOT_IN_PROGRESS), "{:?}", messages);
                refused += 1;
            }
        }
        assert_eq!(queued, 1);
        assert_eq!(refused, 3);

        let ran = run_admitted(
            c.inner(),
            SaveRequest::new(dir.path(), "RUN"),
            guard,
            SnapshotKind::Manual,
        )
        .unwrap();
        assert!(ran.is_success());
        c.wait_for_snapshots();

        let digests = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with("-host_0.digest"))
            .count();
        assert_eq!(digests, 2);
        assert!(dir.path().join("RUN-host_1.digest").exists());
    }

    #[test]
    fn test_max_digest_sequence_of_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(max_digest_sequence(dir.path()), 0);
        assert_eq!(max_digest_sequence(&dir.path().join("missing")), 0);
    }
}
