//! Strata snapshots - cluster-wide snapshot save and restore
//!
//! A [`Cluster`] hosts replicated and partitioned tables across simulated
//! hosts and sites, and provides the snapshot operations:
//!
//! - save: write every table plus one digest per host under a nonce
//! - restore: load a snapshot back, repartitioning if the layout changed
//! - scan: list snapshots and their completeness
//! - delete: remove a snapshot's files
//! - status: per-file statistics of every save and restore
//!
//! # Quick Start
//!
//! ```ignore
//! use strata_snapshot::{Cluster, SnapshotConfig};
//!
//! let cluster = Cluster::start(SnapshotConfig::default().with_hosts(2))?;
//! cluster.snapshot_save(r#"{"uripath":"file:///var/snap","nonce":"N1","block":true}"#)?;
//! cluster.snapshot_restore(r#"{"path":"/var/snap","nonce":"N1"}"#)?;
//! ```
//!
//! Offline verification lives in `strata_durability::verify_snapshots` and
//! the `strata-snapshot` binary.

pub use strata_engine::*;

pub use strata_core::{
    ColumnDef, ColumnType, ResultRow, ResultTable, Row, TableSchema, TxnId, Value, FAILURE,
    MP_INIT_PID, SUCCESS,
};
pub use strata_durability::{verify_snapshots, SnapshotReport, SNAPSHOT_CORRUPTED, SNAPSHOT_VALID};
