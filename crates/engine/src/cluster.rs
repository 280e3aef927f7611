//! The cluster handle
//!
//! [`Cluster`] models a whole cluster inside one process: the topology, the
//! live tables, the transaction id generators and the snapshot machinery
//! (gate, retry task, status log). Every snapshot operation of the system is
//! a method on it.
//!
//! Cloning a `Cluster` is cheap; clones share the same state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex, RwLock};
use strata_core::{Error, PartitionId, Result, ResultTable, Row, TableSchema, TxnId};
use strata_durability::now_micros;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SnapshotConfig;
use crate::gate::{admit_save, wait_idle, GateState, SaveAdmission};
use crate::request::{RestoreRequest, SaveRequest};
use crate::response::{SnapshotResponse, SnapshotResult};
use crate::retry::RetryTask;
use crate::status::{SnapshotKind, SnapshotStatusLog};
use crate::store::LiveTables;
use crate::topology::Topology;
use crate::txn::TxnIdGenerators;
use crate::{delete, restore, save, scan};

/// Data and layout guarded by the cluster lock
pub(crate) struct ClusterState {
    pub(crate) config: SnapshotConfig,
    pub(crate) topology: Topology,
    pub(crate) tables: LiveTables,
    pub(crate) txn: TxnIdGenerators,
    pub(crate) instance_id: String,
}

impl ClusterState {
    fn new(config: SnapshotConfig) -> Self {
        let topology = Topology::from_config(&config);
        let partition_count = topology.partition_count();
        ClusterState {
            config,
            topology,
            tables: LiveTables::new(partition_count),
            txn: TxnIdGenerators::new(partition_count),
            instance_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Shared cluster internals
pub(crate) struct ClusterInner {
    pub(crate) state: RwLock<ClusterState>,
    pub(crate) gate: Mutex<GateState>,
    pub(crate) gate_idle: Condvar,
    pub(crate) status: Mutex<SnapshotStatusLog>,
    /// Tables whose next save write fails
    pub(crate) faults: Mutex<BTreeSet<String>>,
    /// Highest snapshot sequence handed out
    pub(crate) sequence: AtomicU64,
    pub(crate) retry: Mutex<Option<RetryTask>>,
    /// Background save threads and retired retry threads
    pub(crate) workers: Mutex<Vec<JoinHandle<()>>>,
}

/// A running cluster
#[derive(Clone)]
pub struct Cluster {
    inner: Arc<ClusterInner>,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("Cluster")
            .field("instance_id", &state.instance_id)
            .field("topology", &state.topology)
            .finish()
    }
}

impl Cluster {
    /// Start a cluster with no tables
    pub fn start(config: SnapshotConfig) -> Result<Self> {
        config.validate()?;
        let state = ClusterState::new(config);
        info!(
            target: "strata::snapshot",
            hosts = state.topology.host_count(),
            partitions = state.topology.partition_count(),
            k_factor = state.topology.k_factor(),
            instance_id = %state.instance_id,
            "Cluster started"
        );
        Ok(Cluster {
            inner: Arc::new(ClusterInner {
                state: RwLock::new(state),
                gate: Mutex::new(GateState::default()),
                gate_idle: Condvar::new(),
                status: Mutex::new(SnapshotStatusLog::new()),
                faults: Mutex::new(BTreeSet::new()),
                sequence: AtomicU64::new(0),
                retry: Mutex::new(None),
                workers: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Current configuration
    pub fn config(&self) -> SnapshotConfig {
        self.inner.state.read().config.clone()
    }

    /// Current topology
    pub fn topology(&self) -> Topology {
        self.inner.state.read().topology.clone()
    }

    /// Number of data partitions
    pub fn partition_count(&self) -> u32 {
        self.inner.state.read().topology.partition_count()
    }

    /// Identifier of this cluster incarnation
    pub fn instance_id(&self) -> String {
        self.inner.state.read().instance_id.clone()
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<ClusterInner> {
        &self.inner
    }

    // ========================================================================
    // Tables
    // ========================================================================

    /// Declare a table
    pub fn create_table(&self, schema: TableSchema) -> Result<()> {
        self.inner.state.write().tables.create_table(schema)
    }

    /// Remove a table and its rows; false if it did not exist
    pub fn drop_table(&self, name: &str) -> bool {
        self.inner.state.write().tables.drop_table(name)
    }

    /// Names of every table
    pub fn table_names(&self) -> Vec<String> {
        self.inner.state.read().tables.catalog().table_names()
    }

    /// Schema of a table
    pub fn table_schema(&self, name: &str) -> Option<TableSchema> {
        self.inner.state.read().tables.catalog().get(name).cloned()
    }

    /// Insert one row as a transaction of its own.
    ///
    /// Partitioned rows run as single-partition transactions on the owning
    /// partition; replicated rows run as multi-partition transactions.
    pub fn insert(&self, table: &str, row: Row) -> Result<TxnId> {
        let mut state = self.inner.state.write();
        let replicated = state.tables.catalog().require(table)?.is_replicated();
        let partition_id = state.tables.insert(table, row)?;
        if replicated {
            Ok(state.txn.next_mp())
        } else {
            state.txn.next(partition_id).ok_or_else(|| {
                Error::invalid_input(format!("partition {} has no generator", partition_id))
            })
        }
    }

    /// Insert rows one by one, stopping at the first error
    pub fn insert_many<I>(&self, table: &str, rows: I) -> Result<usize>
    where
        I: IntoIterator<Item = Row>,
    {
        let mut count = 0;
        for row in rows {
            self.insert(table, row)?;
            count += 1;
        }
        Ok(count)
    }

    /// Number of rows in a table
    pub fn row_count(&self, table: &str) -> Result<usize> {
        self.inner.state.read().tables.row_count(table)
    }

    /// Every row of a table
    pub fn rows(&self, table: &str) -> Result<Vec<Row>> {
        self.inner.state.read().tables.rows(table)
    }

    /// Row count of each partition of a table
    pub fn partition_row_counts(&self, table: &str) -> Result<Vec<usize>> {
        self.inner.state.read().tables.partition_row_counts(table)
    }

    // ========================================================================
    // Transaction ids
    // ========================================================================

    /// Mint a transaction id on a partition (or the multi-partition initiator)
    pub fn next_txn_id(&self, partition_id: PartitionId) -> Option<TxnId> {
        self.inner.state.write().txn.next(partition_id)
    }

    /// Last id handed out by every generator
    pub fn last_txn_ids(&self) -> BTreeMap<PartitionId, TxnId> {
        self.inner.state.read().txn.last_ids()
    }

    // ========================================================================
    // Fault injection
    // ========================================================================

    /// Make every following save fail while writing `table`
    pub fn inject_write_fault(&self, table: &str) {
        self.inner.faults.lock().insert(table.to_uppercase());
    }

    /// Stop failing saves
    pub fn clear_write_faults(&self) {
        self.inner.faults.lock().clear();
    }

    // ========================================================================
    // Snapshot operations
    // ========================================================================

    /// Save from a JSON parameter object
    pub fn snapshot_save(&self, json: &str) -> SnapshotResult<SnapshotResponse> {
        self.snapshot_save_request(SaveRequest::from_json(json)?)
    }

    /// Save from positional parameters `(path, nonce, block)`
    pub fn snapshot_save_positional(
        &self,
        path: &str,
        nonce: &str,
        block: u8,
    ) -> SnapshotResult<SnapshotResponse> {
        self.snapshot_save_request(SaveRequest::positional(path, nonce, block)?)
    }

    /// Save from a built request
    pub fn snapshot_save_request(&self, request: SaveRequest) -> SnapshotResult<SnapshotResponse> {
        save::snapshot_save(&self.inner, request)
    }

    /// Restore from a JSON parameter object
    pub fn snapshot_restore(&self, json: &str) -> SnapshotResult<SnapshotResponse> {
        self.snapshot_restore_request(RestoreRequest::from_json(json)?)
    }

    /// Restore from positional parameters `(path, nonce)`
    pub fn snapshot_restore_positional(
        &self,
        path: &str,
        nonce: &str,
    ) -> SnapshotResult<SnapshotResponse> {
        self.snapshot_restore_request(RestoreRequest::positional(path, nonce)?)
    }

    /// Restore from a built request
    pub fn snapshot_restore_request(
        &self,
        request: RestoreRequest,
    ) -> SnapshotResult<SnapshotResponse> {
        restore::snapshot_restore(&self.inner, &request)
    }

    /// List the snapshots under `path`
    pub fn snapshot_scan(&self, path: Option<&str>) -> SnapshotResult<SnapshotResponse> {
        scan::snapshot_scan(&self.inner, path)
    }

    /// Delete snapshots given as parallel lists of paths and nonces
    pub fn snapshot_delete<P, N>(&self, paths: &[P], nonces: &[N]) -> SnapshotResult<SnapshotResponse>
    where
        P: AsRef<str>,
        N: AsRef<str>,
    {
        delete::snapshot_delete(&self.inner, paths, nonces)
    }

    /// Per-file statistics of every save and restore since start
    pub fn snapshot_status(&self) -> ResultTable {
        self.inner.status.lock().to_table(now_micros())
    }

    /// Block until no save runs or waits, then reap background threads
    pub fn wait_for_snapshots(&self) {
        wait_idle(&self.inner);
        self.join_workers();
    }

    fn join_workers(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.workers.lock());
        for handle in handles {
            if handle.join().is_err() {
                warn!(target: "strata::snapshot", "Snapshot worker thread panicked");
            }
        }
    }

    fn stop_retry(&self) {
        let task = self.inner.retry.lock().take();
        if let Some(task) = task {
            task.cancel();
            if task.into_handle().join().is_err() {
                warn!(target: "strata::snapshot", "Snapshot retry thread panicked");
            }
        }
        if self.inner.gate.lock().clear_queue().is_some() {
            info!(target: "strata::snapshot", "Dropped queued snapshot request");
        }
        self.inner.gate_idle.notify_all();
    }

    /// Restart with a new layout.
    ///
    /// Tables, transaction ids and the status log are discarded; snapshots on
    /// disk are untouched.
    pub fn restart(&self, config: SnapshotConfig) -> Result<()> {
        config.validate()?;
        self.stop_retry();
        wait_idle(&self.inner);
        self.join_workers();

        let state = ClusterState::new(config);
        info!(
            target: "strata::snapshot",
            hosts = state.topology.host_count(),
            partitions = state.topology.partition_count(),
            instance_id = %state.instance_id,
            "Cluster restarted"
        );
        *self.inner.state.write() = state;
        self.inner.status.lock().clear();
        self.inner.faults.lock().clear();
        Ok(())
    }

    /// Stop snapshot activity.
    ///
    /// Drops any queued request, waits for running work and, if a terminal
    /// snapshot path is configured, takes a blocking terminal snapshot whose
    /// response is returned.
    pub fn shutdown(&self) -> SnapshotResult<Option<SnapshotResponse>> {
        self.stop_retry();
        wait_idle(&self.inner);
        self.join_workers();

        let Some(path) = self.inner.state.read().config.terminal_snapshot_path.clone() else {
            info!(target: "strata::snapshot", "Cluster shut down");
            return Ok(None);
        };

        let mut request = SaveRequest::new(path, format!("SHUTDOWN_{}", now_micros()));
        request.terminal = true;
        match admit_save(&self.inner, &request) {
            SaveAdmission::Run(guard) => {
                info!(target: "strata::snapshot", nonce = %request.nonce, "Taking terminal snapshot");
                let response = save::run_admitted(&self.inner, request, guard, SnapshotKind::Auto)?;
                Ok(Some(response))
            }
            SaveAdmission::InProgress | SaveAdmission::Queued => {
                warn!(target: "strata::snapshot", "Terminal snapshot skipped, another save started");
                self.stop_retry();
                Ok(None)
            }
        }
    }
}
