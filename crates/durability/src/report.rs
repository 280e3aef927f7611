//! Snapshot verification report
//!
//! Produces the human-readable consistency report used by the offline
//! verifier. The first line is always exactly `Snapshot valid` or
//! `Snapshot corrupted`; tooling matches on it.
//!
//! A snapshot is valid when:
//! - at least one digest exists and every digest is readable
//! - every digest names the same set of tables
//! - every partitioned table file agrees on the total partition count
//! - every table named by a digest has a file set covering all its partitions
//! - no table file contains a corrupt chunk

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::inventory::{ScanOptions, SnapshotFiles, SnapshotInventory};

/// First line of a report for a restorable snapshot
pub const SNAPSHOT_VALID: &str = "Snapshot valid";

/// First line of a report for a damaged snapshot
pub const SNAPSHOT_CORRUPTED: &str = "Snapshot corrupted";

/// Verification result for one snapshot
#[derive(Debug, Clone)]
pub struct SnapshotReport {
    /// Directory the snapshot lives in
    pub dir: PathBuf,
    /// Snapshot nonce
    pub nonce: String,
    /// True if a restore is expected to succeed
    pub valid: bool,
    /// Full report text
    pub text: String,
}

/// Build the report for one snapshot
pub fn generate_snapshot_report(snapshot: &SnapshotFiles) -> SnapshotReport {
    let mut body = String::new();
    let mut consistent = true;

    let date = snapshot
        .created()
        .and_then(|micros| chrono::DateTime::from_timestamp_micros(micros as i64))
        .map(|d| d.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());
    let _ = writeln!(body, "Date: {}", date);
    let _ = writeln!(body, "Digests:");

    if snapshot.digests.is_empty() {
        let _ = writeln!(body, "\tNo digests found.");
        consistent = false;
    } else {
        for digest in &snapshot.digests {
            if let Some(err) = &digest.error {
                consistent = false;
                let _ = writeln!(body, "\t{} is unreadable: {}", digest.path.display(), err);
            }
        }

        let table_sets: Vec<(&Path, BTreeSet<&String>)> = snapshot
            .digests
            .iter()
            .filter_map(|d| {
                d.record
                    .as_ref()
                    .map(|r| (d.path.as_path(), r.tables.iter().collect()))
            })
            .collect();
        let mut inconsistent = false;
        for (i, (left, tables)) in table_sets.iter().enumerate() {
            let others: Vec<&Path> = table_sets
                .iter()
                .enumerate()
                .filter(|(j, (_, other))| *j != i && other != tables)
                .map(|(_, (path, _))| *path)
                .collect();
            if others.is_empty() {
                continue;
            }
            if !inconsistent {
                let _ = writeln!(body, "\tNot all digests are consistent");
                inconsistent = true;
            }
            let _ = writeln!(body, "\t\t{} is inconsistent with:", left.display());
            for right in others {
                let _ = writeln!(body, "\t\t\t{}", right.display());
            }
        }
        if inconsistent {
            consistent = false;
        } else {
            for (path, _) in &table_sets {
                let _ = writeln!(body, "\t{}", path.display());
            }
        }

        let tables: Vec<String> = snapshot.tables_required().into_iter().collect();
        let _ = writeln!(body, "Tables: {}", tables.join(", "));
    }

    let mut total_partitions: Option<u32> = None;
    for (table, files) in &snapshot.tables {
        for header in files.iter().filter_map(|f| f.header.as_ref()) {
            if header.is_replicated {
                continue;
            }
            match total_partitions {
                None => total_partitions = Some(header.total_partitions),
                Some(seen) if seen != header.total_partitions => {
                    consistent = false;
                    let _ = writeln!(
                        body,
                        "\tPartition count is not consistent throughout snapshot files for {}. Saw {} and {}",
                        table, header.total_partitions, seen
                    );
                }
                Some(_) => {}
            }
        }
    }

    let mut restorable_tables = BTreeSet::new();
    for (table, files) in &snapshot.tables {
        let replicated = files
            .iter()
            .filter_map(|f| f.header.as_ref())
            .any(|h| h.is_replicated);
        let partitions_present = snapshot.has_valid_partition_set(table);
        let corrupt_present = files
            .iter()
            .any(|f| !f.corrupt_partitions.is_empty() || f.error.is_some());
        if corrupt_present {
            consistent = false;
        }
        if partitions_present && !corrupt_present {
            restorable_tables.insert(table.clone());
        }

        let _ = writeln!(body, "\tTable name: {}", table);
        let _ = writeln!(body, "\t\tReplicated: {}", replicated);
        let _ = writeln!(body, "\t\tValid partition set available: {}", partitions_present);
        let _ = writeln!(body, "\t\tCorrupt partitions present: {}", corrupt_present);
        let _ = writeln!(body, "\t\tFiles: ");
        for file in files {
            let valid = join_ids(file.valid_partitions());
            if let Some(err) = &file.error {
                let _ = writeln!(body, "\t\t\t{} Unreadable: {}", file.path.display(), err);
            } else if file.corrupt_partitions.is_empty() {
                let _ = writeln!(
                    body,
                    "\t\t\t{} Completed: {} Partitions: {}",
                    file.path.display(),
                    file.completed,
                    valid
                );
            } else {
                let _ = writeln!(
                    body,
                    "\t\t\t{} Completed: {} Valid Partitions: {} Corrupt Partitions: {}",
                    file.path.display(),
                    file.completed,
                    valid,
                    join_ids(file.corrupt_partitions.iter().copied())
                );
            }
        }
    }

    let missing: Vec<String> = snapshot
        .tables_required()
        .into_iter()
        .filter(|t| !restorable_tables.contains(t))
        .collect();

    let text = if consistent && missing.is_empty() {
        format!("{}\n{}", SNAPSHOT_VALID, body)
    } else {
        let mut text = format!("{}\n", SNAPSHOT_CORRUPTED);
        if !missing.is_empty() {
            let _ = writeln!(text, "Missing tables: {}", missing.join(", "));
        }
        text.push_str(&body);
        text
    };

    SnapshotReport {
        dir: snapshot.dir.clone(),
        nonce: snapshot.nonce.clone(),
        valid: consistent && missing.is_empty(),
        text,
    }
}

fn join_ids(ids: impl IntoIterator<Item = u32>) -> String {
    ids.into_iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Verify snapshots in `dirs`.
///
/// With an empty `nonces` list every snapshot found is verified. A requested
/// nonce with no files in any directory yields a corrupted report.
pub fn verify_snapshots(dirs: &[PathBuf], nonces: &[String]) -> Vec<SnapshotReport> {
    let mut reports = Vec::new();
    let mut seen = BTreeSet::new();

    for dir in dirs {
        let options = ScanOptions {
            validate: true,
            ..Default::default()
        };
        let inventory = match SnapshotInventory::scan(dir, &options) {
            Ok(inventory) => inventory,
            Err(e) => {
                tracing::warn!(target: "strata::snapshot", path = %dir.display(), error = %e, "Cannot scan directory");
                continue;
            }
        };
        for snapshot in inventory.snapshots() {
            if !nonces.is_empty() && !nonces.contains(&snapshot.nonce) {
                continue;
            }
            seen.insert(snapshot.nonce.clone());
            reports.push(generate_snapshot_report(snapshot));
        }
    }

    for nonce in nonces {
        if !seen.contains(nonce) {
            reports.push(SnapshotReport {
                dir: dirs.first().cloned().unwrap_or_default(),
                nonce: nonce.clone(),
                valid: false,
                text: format!(
                    "{}\nNo files found for snapshot {}\n",
                    SNAPSHOT_CORRUPTED, nonce
                ),
            });
        }
    }

    reports
}
