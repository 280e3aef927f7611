//! Snapshot status statistics
//!
//! One entry per file a save or restore touched, appended when the work
//! starts and finalized when it ends. The log lives as long as the cluster
//! process and is cleared only by a restart.

use strata_core::{ColumnInfo, ColumnType, HostId, ResultTable, TxnId, Value, FAILURE, SUCCESS};

use crate::topology::hostname;

/// Columns of the status table
pub const SNAPSHOT_STATUS_COLUMNS: &[ColumnInfo] = &[
    ColumnInfo::new("TIMESTAMP", ColumnType::BigInt),
    ColumnInfo::new("HOST_ID", ColumnType::Integer),
    ColumnInfo::new("HOSTNAME", ColumnType::Varchar),
    ColumnInfo::new("TABLE", ColumnType::Varchar),
    ColumnInfo::new("PATH", ColumnType::Varchar),
    ColumnInfo::new("FILENAME", ColumnType::Varchar),
    ColumnInfo::new("NONCE", ColumnType::Varchar),
    ColumnInfo::new("TXNID", ColumnType::BigInt),
    ColumnInfo::new("START_TIME", ColumnType::BigInt),
    ColumnInfo::new("END_TIME", ColumnType::BigInt),
    ColumnInfo::new("SIZE", ColumnType::BigInt),
    ColumnInfo::new("DURATION", ColumnType::BigInt),
    ColumnInfo::new("THROUGHPUT", ColumnType::Float),
    ColumnInfo::new("RESULT", ColumnType::Varchar),
    ColumnInfo::new("TYPE", ColumnType::Varchar),
];

/// Kind of work an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    /// User-requested save
    Manual,
    /// Save taken automatically on shutdown
    Auto,
    /// Restore
    Restore,
}

impl SnapshotKind {
    fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Manual => "MANUAL",
            SnapshotKind::Auto => "AUTO",
            SnapshotKind::Restore => "RESTORE",
        }
    }
}

/// Identity of the file an entry is about
#[derive(Debug, Clone)]
pub struct StatusTarget {
    /// Host doing the work
    pub host_id: HostId,
    /// Table
    pub table: String,
    /// Directory
    pub path: String,
    /// File name
    pub filename: String,
    /// Snapshot nonce
    pub nonce: String,
    /// Snapshot transaction id
    pub txn_id: TxnId,
    /// Kind of work
    pub kind: SnapshotKind,
}

#[derive(Debug, Clone)]
struct StatusEntry {
    target: StatusTarget,
    start_micros: u64,
    end_micros: Option<u64>,
    size: u64,
    succeeded: Option<bool>,
}

/// Handle to an entry that has not finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusId(usize);

/// Append-only log of snapshot work
#[derive(Debug, Default)]
pub struct SnapshotStatusLog {
    entries: Vec<StatusEntry>,
}

impl SnapshotStatusLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that work on a file began
    pub fn begin(&mut self, target: StatusTarget, start_micros: u64) -> StatusId {
        self.entries.push(StatusEntry {
            target,
            start_micros,
            end_micros: None,
            size: 0,
            succeeded: None,
        });
        StatusId(self.entries.len() - 1)
    }

    /// Record how work on a file ended
    pub fn finish(&mut self, id: StatusId, end_micros: u64, size: u64, succeeded: bool) {
        if let Some(entry) = self.entries.get_mut(id.0) {
            entry.end_micros = Some(end_micros);
            entry.size = size;
            entry.succeeded = Some(succeeded);
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Render the log as a result table.
    ///
    /// Unfinished entries show `END_TIME` 0 and an empty `RESULT`.
    pub fn to_table(&self, now_micros: u64) -> ResultTable {
        let mut table = ResultTable::new(SNAPSHOT_STATUS_COLUMNS);
        for e in &self.entries {
            let end = e.end_micros.unwrap_or(0);
            let duration_ms = e
                .end_micros
                .map(|end| end.saturating_sub(e.start_micros) / 1000)
                .unwrap_or(0);
            let throughput = if duration_ms > 0 {
                (e.size as f64 / (1024.0 * 1024.0)) / (duration_ms as f64 / 1000.0)
            } else {
                0.0
            };
            let result = match e.succeeded {
                Some(true) => SUCCESS,
                Some(false) => FAILURE,
                None => "",
            };
            table.add_row(vec![
                Value::BigInt(now_micros as i64 / 1000),
                Value::Integer(e.target.host_id as i32),
                Value::from(hostname(e.target.host_id)),
                Value::from(e.target.table.as_str()),
                Value::from(e.target.path.as_str()),
                Value::from(e.target.filename.as_str()),
                Value::from(e.target.nonce.as_str()),
                Value::BigInt(e.target.txn_id.raw() as i64),
                Value::BigInt(e.start_micros as i64 / 1000),
                Value::BigInt(end as i64 / 1000),
                Value::BigInt(e.size as i64),
                Value::BigInt(duration_ms as i64),
                Value::Float(throughput),
                Value::from(result),
                Value::from(e.target.kind.as_str()),
            ]);
        }
        table
    }
}
