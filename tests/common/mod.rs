//! Shared test utilities for the snapshot integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use strata_snapshot::{
    Cluster, ColumnDef, ColumnType, ResponseStatus, ResultTable, RestoreRequest, Row,
    SaveRequest, SnapshotConfig, SnapshotError, SnapshotResponse, TableSchema, TxnId, Value,
    FAILURE, SUCCESS,
};
use tempfile::TempDir;

pub const PARTITION_TESTER: &str = "PARTITION_TESTER";
pub const REPLICATED_TESTER: &str = "REPLICATED_TESTER";

/// Config for tests: no fsync, fast retry
pub fn config(hosts: u32, sites_per_host: u32, k_factor: u32) -> SnapshotConfig {
    SnapshotConfig::default()
        .with_hosts(hosts)
        .with_sites_per_host(sites_per_host)
        .with_k_factor(k_factor)
        .with_retry_interval(Duration::from_millis(10))
        .with_fsync(false)
}

// ============================================================================
// TestCluster - cluster plus a scratch directory
// ============================================================================

pub struct TestCluster {
    pub cluster: Cluster,
    pub dir: TempDir,
}

impl TestCluster {
    /// Cluster with both tester tables created and empty
    pub fn new(hosts: u32, sites_per_host: u32, k_factor: u32) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let cluster =
            Cluster::start(config(hosts, sites_per_host, k_factor)).expect("Failed to start cluster");
        create_tester_tables(&cluster);
        TestCluster { cluster, dir }
    }

    /// Single host, two sites
    pub fn single() -> Self {
        Self::new(1, 2, 0)
    }

    /// Directory snapshots are written to
    pub fn snapshot_dir(&self) -> PathBuf {
        self.dir.path().join("snapshots")
    }

    pub fn snapshot_path(&self) -> String {
        self.snapshot_dir().display().to_string()
    }

    /// Blocking save of every table
    pub fn save(&self, nonce: &str) -> SnapshotResponse {
        self.cluster
            .snapshot_save_request(SaveRequest::new(self.snapshot_dir(), nonce))
            .expect("save call failed")
    }

    /// Plain restore of `nonce`
    pub fn restore(&self, nonce: &str) -> SnapshotResponse {
        self.cluster
            .snapshot_restore_request(RestoreRequest::new(self.snapshot_dir(), Some(nonce)))
            .expect("restore call failed")
    }

    /// Restore the latest viable snapshot
    pub fn restore_latest(&self) -> SnapshotResponse {
        self.cluster
            .snapshot_restore_request(RestoreRequest::new(self.snapshot_dir(), None))
            .expect("restore call failed")
    }

    /// Restart with a new layout and recreate the tester tables
    pub fn restart(&self, hosts: u32, sites_per_host: u32, k_factor: u32) {
        self.cluster
            .restart(config(hosts, sites_per_host, k_factor))
            .expect("restart failed");
        create_tester_tables(&self.cluster);
    }

    pub fn table_file(&self, nonce: &str, table: &str, host_id: u32) -> PathBuf {
        self.snapshot_dir()
            .join(format!("{}-{}-host_{}.vpt", nonce, table, host_id))
    }

    pub fn digest_file(&self, nonce: &str, host_id: u32) -> PathBuf {
        self.snapshot_dir()
            .join(format!("{}-host_{}.digest", nonce, host_id))
    }
}

// ============================================================================
// Tables
// ============================================================================

pub fn partition_tester() -> TableSchema {
    TableSchema::partitioned(
        PARTITION_TESTER,
        vec![
            ColumnDef::new("PT_ID", ColumnType::Integer).not_null(),
            ColumnDef::new("PT_NAME", ColumnType::Varchar),
            ColumnDef::new("PT_INTVAL", ColumnType::Integer),
            ColumnDef::new("PT_FLOATVAL", ColumnType::Float),
        ],
        "PT_ID",
    )
    .with_primary_key(&["PT_ID"])
}

pub fn replicated_tester() -> TableSchema {
    TableSchema::replicated(
        REPLICATED_TESTER,
        vec![
            ColumnDef::new("RT_ID", ColumnType::Integer).not_null(),
            ColumnDef::new("RT_NAME", ColumnType::Varchar),
            ColumnDef::new("RT_INTVAL", ColumnType::Integer),
            ColumnDef::new("RT_FLOATVAL", ColumnType::Float),
        ],
    )
    .with_primary_key(&["RT_ID"])
}

pub fn create_tester_tables(cluster: &Cluster) {
    cluster
        .create_table(partition_tester())
        .expect("create PARTITION_TESTER");
    cluster
        .create_table(replicated_tester())
        .expect("create REPLICATED_TESTER");
}

pub fn tester_row(id: i32) -> Row {
    vec![
        Value::Integer(id),
        Value::from(format!("name_{}", id)),
        Value::Integer(id * 10),
        Value::Float(id as f64 / 2.0),
    ]
}

/// Insert rows with ids `start..start + count`
pub fn load_table(cluster: &Cluster, table: &str, start: i32, count: i32) {
    cluster
        .insert_many(table, (start..start + count).map(tester_row))
        .expect("load rows");
}

/// Rows of a table ordered by their first column
pub fn sorted_rows(cluster: &Cluster, table: &str) -> Vec<Row> {
    let mut rows = cluster.rows(table).expect("read rows");
    rows.sort_by_key(|r| r[0].as_i64());
    rows
}

// ============================================================================
// Results
// ============================================================================

pub fn assert_all_success(response: &SnapshotResponse) {
    for table in &response.results {
        for row in table.rows() {
            assert_eq!(
                row.get_str("RESULT"),
                Some(SUCCESS),
                "unexpected failure: {:?}",
                row.values()
            );
        }
    }
    assert_eq!(response.status, ResponseStatus::Success);
}

/// Rows of the first result table whose `column` equals `value`
pub fn rows_where<'a>(table: &'a ResultTable, column: &str, value: &str) -> Vec<Vec<Value>> {
    table
        .rows()
        .filter(|r| r.get_str(column) == Some(value))
        .map(|r| r.values().to_vec())
        .collect()
}

pub fn first_table(response: &SnapshotResponse) -> &ResultTable {
    response.first().expect("response has no result table")
}

// ============================================================================
// File damage
// ============================================================================

/// Invert one byte of a file
pub fn flip_byte(path: &Path, offset: u64) {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .expect("open file to corrupt");
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.read_exact(&mut byte).unwrap();
    byte[0] ^= 0xFF;
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&byte).unwrap();
    file.sync_all().unwrap();
}

/// Invert a byte in the second half of a file, inside row data
pub fn flip_data_byte(path: &Path) {
    let len = fs::metadata(path).unwrap().len();
    assert!(len > 64, "file too small to corrupt: {}", len);
    flip_byte(path, len - len / 4);
}

pub fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
