//! Core types for Strata snapshots
//!
//! This crate defines the foundational types used throughout the system:
//! - Value / ColumnType: table cells and their declared types
//! - TableSchema / Catalog: table declarations
//! - Hashinator: partition routing for partitioned tables
//! - ResultTable: tabular answers returned by every snapshot operation
//! - TxnId and the host/site/partition id aliases
//! - Error: Error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod hashinator;
pub mod result_table;
pub mod schema;
pub mod types;
pub mod value;

pub use error::{CoercionError, Error, Result};
pub use hashinator::Hashinator;
pub use result_table::{ColumnInfo, ResultRow, ResultTable, FAILURE, SUCCESS};
pub use schema::{Catalog, ColumnDef, TableSchema};
pub use types::{
    HostId, PartitionId, Row, SiteId, TxnId, MAX_PARTITION_ID, MP_INIT_PID, PARTITION_ID_BITS,
};
pub use value::{ColumnType, Value};
