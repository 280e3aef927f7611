//! Row-level snapshot comparison
//!
//! Two checks:
//! - [`compare_replicas`]: every replica of a partition inside one snapshot
//!   must hold the same rows (replicated tables: every host's copy)
//! - [`compare_snapshots`]: two snapshots must hold the same rows per table,
//!   partition by partition when their partition counts agree
//!
//! Rows are compared as multisets keyed by their canonical value encoding,
//! so chunk order and integer column widths do not matter.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};

use strata_core::{HostId, PartitionId, Row};
use tracing::debug;

use crate::format::TableFileReader;
use crate::inventory::{SnapshotFiles, TableFileEntry};

/// First line of a comparison with no differences
pub const SNAPSHOTS_MATCH: &str = "Snapshots match";

/// First line of a comparison that found differences
pub const SNAPSHOTS_DIFFER: &str = "Snapshots differ";

/// Rows that differ between two copies of one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDiff {
    /// Table name
    pub table: String,
    /// Partition compared, `None` when whole tables were compared
    pub partition_id: Option<PartitionId>,
    /// Label of the left copy
    pub left: String,
    /// Label of the right copy
    pub right: String,
    /// Rows in the left copy
    pub left_rows: usize,
    /// Rows in the right copy
    pub right_rows: usize,
    /// Rows found only on the left
    pub only_left: usize,
    /// Rows found only on the right
    pub only_right: usize,
}

impl fmt::Display for PartitionDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.partition_id {
            Some(pid) => write!(f, "{} partition {}", self.table, pid)?,
            None => write!(f, "{}", self.table)?,
        }
        write!(
            f,
            ": {} has {} rows ({} not in {}), {} has {} rows ({} not in {})",
            self.left,
            self.left_rows,
            self.only_left,
            self.right,
            self.right,
            self.right_rows,
            self.only_right,
            self.left
        )
    }
}

/// Outcome of a comparison
#[derive(Debug, Clone, Default)]
pub struct ComparisonReport {
    /// What was compared, e.g. `N replicas` or `A vs B`
    pub subject: String,
    /// Tables looked at
    pub tables_compared: usize,
    /// Partition copies compared pairwise
    pub partitions_compared: usize,
    /// Differing partitions
    pub diffs: Vec<PartitionDiff>,
    /// Tables or replicas that could not be compared
    pub problems: Vec<String>,
}

impl ComparisonReport {
    /// True if nothing differed and everything could be read
    pub fn matches(&self) -> bool {
        self.diffs.is_empty() && self.problems.is_empty()
    }

    /// Report text; the first line is [`SNAPSHOTS_MATCH`] or [`SNAPSHOTS_DIFFER`]
    pub fn text(&self) -> String {
        let mut out = String::new();
        let first = if self.matches() {
            SNAPSHOTS_MATCH
        } else {
            SNAPSHOTS_DIFFER
        };
        let _ = writeln!(out, "{}", first);
        let _ = writeln!(out, "Compared: {}", self.subject);
        let _ = writeln!(
            out,
            "Tables: {}, partition copies: {}",
            self.tables_compared, self.partitions_compared
        );
        for diff in &self.diffs {
            let _ = writeln!(out, "\t{}", diff);
        }
        for problem in &self.problems {
            let _ = writeln!(out, "\t{}", problem);
        }
        out
    }
}

/// Multiset of rows keyed by canonical encoding
type RowCounts = BTreeMap<Vec<u8>, usize>;

fn row_key(row: &Row) -> Vec<u8> {
    let mut key = Vec::new();
    for value in row {
        value.write_key_bytes(&mut key);
    }
    key
}

struct LoadedFile {
    host_id: HostId,
    is_replicated: bool,
    total_partitions: u32,
    partitions: BTreeMap<PartitionId, RowCounts>,
}

/// Read one table file into per-partition row counts.
///
/// Partitions with a damaged chunk are left out and reported.
fn load_file(entry: &TableFileEntry, problems: &mut Vec<String>) -> Option<LoadedFile> {
    let reader = match TableFileReader::open(&entry.path) {
        Ok(reader) => reader,
        Err(e) => {
            problems.push(format!("{} is unreadable: {}", entry.path.display(), e));
            return None;
        }
    };
    let contents = match reader.read_chunks() {
        Ok(contents) => contents,
        Err(e) => {
            problems.push(format!("{} is unreadable: {}", entry.path.display(), e));
            return None;
        }
    };
    let header = reader.header();
    let mut damaged = contents.corrupt_partitions.clone();
    if contents.truncated {
        damaged.extend(header.partition_ids.iter().copied());
    }
    if !damaged.is_empty() {
        problems.push(format!(
            "{} has damaged partitions {:?}",
            entry.path.display(),
            damaged
        ));
    }

    let mut partitions: BTreeMap<PartitionId, RowCounts> = header
        .partition_ids
        .iter()
        .filter(|pid| !damaged.contains(*pid))
        .map(|pid| (*pid, RowCounts::new()))
        .collect();
    for chunk in &contents.chunks {
        if let Some(counts) = partitions.get_mut(&chunk.partition_id) {
            for row in &chunk.rows {
                *counts.entry(row_key(row)).or_insert(0) += 1;
            }
        }
    }

    Some(LoadedFile {
        host_id: header.host_id,
        is_replicated: header.is_replicated,
        total_partitions: header.total_partitions,
        partitions,
    })
}

fn load_table(files: &[TableFileEntry], problems: &mut Vec<String>) -> Vec<LoadedFile> {
    files.iter().filter_map(|f| load_file(f, problems)).collect()
}

fn row_total(counts: &RowCounts) -> usize {
    counts.values().sum()
}

/// Rows of `left` missing from `right`, counting duplicates
fn surplus(left: &RowCounts, right: &RowCounts) -> usize {
    left.iter()
        .map(|(key, n)| n.saturating_sub(right.get(key).copied().unwrap_or(0)))
        .sum()
}

fn diff(
    table: &str,
    partition_id: Option<PartitionId>,
    (left, left_rows): (String, &RowCounts),
    (right, right_rows): (String, &RowCounts),
) -> Option<PartitionDiff> {
    if left_rows == right_rows {
        return None;
    }
    Some(PartitionDiff {
        table: table.to_string(),
        partition_id,
        left_rows: row_total(left_rows),
        right_rows: row_total(right_rows),
        only_left: surplus(left_rows, right_rows),
        only_right: surplus(right_rows, left_rows),
        left,
        right,
    })
}

/// Check that every copy of each partition in `snapshot` holds the same rows
pub fn compare_replicas(snapshot: &SnapshotFiles) -> ComparisonReport {
    let mut report = ComparisonReport {
        subject: format!("{} replicas", snapshot.nonce),
        ..Default::default()
    };

    for (table, files) in &snapshot.tables {
        report.tables_compared += 1;
        let loaded = load_table(files, &mut report.problems);

        let mut copies: BTreeMap<PartitionId, Vec<(HostId, &RowCounts)>> = BTreeMap::new();
        for file in &loaded {
            for (pid, counts) in &file.partitions {
                copies.entry(*pid).or_default().push((file.host_id, counts));
            }
        }

        for (pid, replicas) in &copies {
            let Some(((first_host, first), rest)) = replicas.split_first() else {
                continue;
            };
            for (host, counts) in rest {
                report.partitions_compared += 1;
                let found = diff(
                    table,
                    Some(*pid),
                    (format!("host {}", first_host), *first),
                    (format!("host {}", host), *counts),
                );
                report.diffs.extend(found);
            }
        }
    }

    debug!(
        target: "strata::snapshot",
        nonce = %snapshot.nonce,
        diffs = report.diffs.len(),
        problems = report.problems.len(),
        "Compared replicas"
    );
    report
}

/// One copy of each partition: the first intact replica, by host order
fn first_copies(loaded: &[LoadedFile]) -> BTreeMap<PartitionId, &RowCounts> {
    let mut copies = BTreeMap::new();
    for file in loaded {
        for (pid, counts) in &file.partitions {
            copies.entry(*pid).or_insert(counts);
        }
    }
    copies
}

/// Partition layout of a loaded table: `None` for replicated tables
fn partition_layout(loaded: &[LoadedFile]) -> Option<u32> {
    loaded
        .iter()
        .find(|f| !f.is_replicated)
        .map(|f| f.total_partitions)
}

fn merge(copies: &BTreeMap<PartitionId, &RowCounts>) -> RowCounts {
    let mut merged = RowCounts::new();
    for counts in copies.values() {
        for (key, n) in counts.iter() {
            *merged.entry(key.clone()).or_insert(0) += n;
        }
    }
    merged
}

/// Check that `left` and `right` hold the same rows in every table.
///
/// Partitioned tables are compared partition by partition when both
/// snapshots were taken with the same partition count, and as whole tables
/// otherwise.
pub fn compare_snapshots(left: &SnapshotFiles, right: &SnapshotFiles) -> ComparisonReport {
    let mut report = ComparisonReport {
        subject: format!("{} vs {}", left.nonce, right.nonce),
        ..Default::default()
    };

    let tables: BTreeSet<&String> = left.tables.keys().chain(right.tables.keys()).collect();
    for table in tables {
        let (Some(left_files), Some(right_files)) = (left.tables.get(table), right.tables.get(table))
        else {
            let holder = if left.tables.contains_key(table) {
                &left.nonce
            } else {
                &right.nonce
            };
            report
                .problems
                .push(format!("{} is only in snapshot {}", table, holder));
            continue;
        };
        report.tables_compared += 1;

        let left_loaded = load_table(left_files, &mut report.problems);
        let right_loaded = load_table(right_files, &mut report.problems);
        let left_copies = first_copies(&left_loaded);
        let right_copies = first_copies(&right_loaded);

        if partition_layout(&left_loaded) == partition_layout(&right_loaded) {
            let pids: BTreeSet<PartitionId> =
                left_copies.keys().chain(right_copies.keys()).copied().collect();
            let empty = RowCounts::new();
            for pid in pids {
                report.partitions_compared += 1;
                let l = left_copies.get(&pid).copied().unwrap_or(&empty);
                let r = right_copies.get(&pid).copied().unwrap_or(&empty);
                let found = diff(
                    table,
                    Some(pid),
                    (left.nonce.clone(), l),
                    (right.nonce.clone(), r),
                );
                report.diffs.extend(found);
            }
        } else {
            report.partitions_compared += 1;
            let found = diff(
                table,
                None,
                (left.nonce.clone(), &merge(&left_copies)),
                (right.nonce.clone(), &merge(&right_copies)),
            );
            report.diffs.extend(found);
        }
    }

    debug!(
        target: "strata::snapshot",
        left = %left.nonce,
        right = %right.nonce,
        diffs = report.diffs.len(),
        problems = report.problems.len(),
        "Compared snapshots"
    );
    report
}
