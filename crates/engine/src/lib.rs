//! Snapshot engine for Strata
//!
//! This crate orchestrates the lower layers:
//! - Cluster: in-process model of hosts, sites and partitions with live tables
//! - Save coordinator: admission gate, feasibility check, table and digest writing
//! - Restore coordinator: snapshot selection, repartitioning, txn id policy
//! - Scan and delete of snapshots on disk
//! - Status statistics and the queued-save retry task
//! - Configuration
//!
//! The engine is the only component that knows about:
//! - The cluster topology
//! - The single in-flight snapshot gate
//! - Transaction id generators

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod config;
pub mod delete;
mod gate;
pub mod request;
pub mod response;
pub mod restore;
mod retry;
pub mod save;
pub mod scan;
pub mod status;
pub mod store;
pub mod topology;
pub mod txn;

pub use cluster::Cluster;
pub use config::{SnapshotConfig, CONFIG_FILE_NAME};
pub use delete::DELETE_RESULT_COLUMNS;
pub use request::{resolve_path, RestoreRequest, SaveFormat, SaveRequest};
pub use response::{
    ResponseStatus, SnapshotError, SnapshotResponse, SnapshotResult, DIGEST_DIAGNOSTIC_COLUMNS,
};
pub use restore::RESTORE_RESULT_COLUMNS;
pub use save::{
    FILE_ALREADY_EXISTS, FILE_LOCATION_UNWRITABLE, SAVE_RESULT_COLUMNS, SNAPSHOT_IN_PROGRESS,
    SNAPSHOT_REQUEST_QUEUED,
};
pub use scan::{
    SCAN_DIGEST_COLUMNS, SCAN_DISK_SPACE_COLUMNS, SCAN_FILE_COLUMNS, SCAN_SUMMARY_COLUMNS,
};
pub use status::{SnapshotKind, SnapshotStatusLog, StatusTarget, SNAPSHOT_STATUS_COLUMNS};
pub use store::{LiveTables, LoadOutcome};
pub use topology::{hostname, SiteInfo, Topology};
pub use txn::TxnIdGenerators;
