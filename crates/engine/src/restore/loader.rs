//! Reading table files into live tables
//!
//! Loading runs in two phases so that a table is either restored whole or
//! not at all:
//!
//! - `prepare` reads every file of a table, maps saved columns onto the live
//!   schema and computes each row's target partition; any error fails the
//!   whole table before anything is stored.
//! - `apply` stores the prepared rows and diverts primary key duplicates to a
//!   CSV side file.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use strata_core::{HostId, PartitionId, Row, TableSchema, Value};
use strata_durability::{
    duplicates_file_name, SavedColumn, SnapshotFiles, TableFileEntry, TableFileReader,
    TextExportWriter, TextFormat,
};
use tracing::{debug, info, warn};

use crate::cluster::ClusterState;
use crate::request::RestoreRequest;
use crate::store::LoadOutcome;

/// A table file that took part in a restore
#[derive(Debug, Clone)]
pub(crate) struct LoadedFile {
    pub(crate) host_id: HostId,
    pub(crate) name: String,
    pub(crate) size: u64,
}

/// Prepared rows of one table, or why the table cannot be restored
pub(crate) struct TableLoad {
    pub(crate) table: String,
    pub(crate) replicated: bool,
    pub(crate) rows: Result<Vec<(PartitionId, Row)>, String>,
    pub(crate) files: Vec<LoadedFile>,
}

/// Result of storing one table
pub(crate) struct TableOutcome {
    pub(crate) table: String,
    pub(crate) replicated: bool,
    pub(crate) result: Result<LoadStats, String>,
    pub(crate) files: Vec<LoadedFile>,
}

/// Row counts of a stored table
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LoadStats {
    pub(crate) inserted: u64,
    pub(crate) duplicates: u64,
}

fn no_information(table: &str) -> String {
    format!("Save data contains no information for table {}", table)
}

/// Read and convert every table named by the snapshot that the live catalog knows.
pub(crate) fn prepare(
    snapshot: &SnapshotFiles,
    state: &ClusterState,
    request: &RestoreRequest,
) -> Vec<TableLoad> {
    let catalog = state.tables.catalog();
    let mut loads = Vec::new();
    for table in snapshot.tables_required() {
        let Some(schema) = catalog.get(&table) else {
            info!(target: "strata::snapshot", table = %table, "Skipping saved table absent from the catalog");
            continue;
        };
        let files = snapshot.tables.get(&table).map(Vec::as_slice).unwrap_or(&[]);
        let rows = prepare_table(snapshot, state, request, schema, files);
        if let Err(e) = &rows {
            warn!(target: "strata::snapshot", table = %table, error = %e, "Table cannot be restored");
        }
        loads.push(TableLoad {
            table: schema.name.clone(),
            replicated: schema.is_replicated(),
            rows,
            files: files
                .iter()
                .map(|f| LoadedFile {
                    host_id: f.host_id,
                    name: f.name(),
                    size: f.size,
                })
                .collect(),
        });
    }
    loads
}

fn prepare_table(
    snapshot: &SnapshotFiles,
    state: &ClusterState,
    request: &RestoreRequest,
    schema: &TableSchema,
    files: &[TableFileEntry],
) -> Result<Vec<(PartitionId, Row)>, String> {
    if files.is_empty() {
        return Err(no_information(&schema.name));
    }
    if let Some(bad) = files
        .iter()
        .find(|f| f.error.is_some() || !f.corrupt_partitions.is_empty())
    {
        let detail = match &bad.error {
            Some(e) => e.clone(),
            None => format!("corrupt partitions {:?}", bad.corrupt_partitions),
        };
        return Err(format!(
            "Save data for table {} is corrupted in {}: {}",
            schema.name,
            bad.name(),
            detail
        ));
    }
    if !snapshot.has_valid_partition_set(&schema.name) {
        return Err(no_information(&schema.name));
    }

    let current_count = state.topology.partition_count();
    let count_changed = snapshot.partition_count() != Some(current_count);

    let mut claimed: BTreeSet<PartitionId> = BTreeSet::new();
    let mut rows = Vec::new();
    for file in files.iter().filter(|f| f.is_intact()) {
        let Some(header) = &file.header else {
            continue;
        };
        let take: BTreeSet<PartitionId> = header
            .partition_ids
            .iter()
            .copied()
            .filter(|p| !claimed.contains(p))
            .collect();
        if take.is_empty() {
            continue;
        }

        let reader = TableFileReader::open(&file.path).map_err(|e| e.to_string())?;
        let contents = reader.read_chunks().map_err(|e| e.to_string())?;
        if !contents.is_clean() {
            return Err(format!(
                "Save data for table {} is corrupted in {}",
                schema.name,
                file.name()
            ));
        }

        let mapping = column_mapping(schema, &header.columns);
        let rehash = request.hashinator || count_changed || header.is_replicated;
        for chunk in contents.chunks {
            if !take.contains(&chunk.partition_id) {
                continue;
            }
            for saved in chunk.rows {
                let row = remap_row(schema, &mapping, saved)?;
                let row = state
                    .tables
                    .prepare_row(&schema.name, row)
                    .map_err(|e| e.to_string())?;
                let target = if schema.is_replicated() {
                    0
                } else if rehash {
                    state.tables.route(schema, &row)
                } else {
                    chunk.partition_id
                };
                rows.push((target, row));
            }
        }
        debug!(
            target: "strata::snapshot",
            table = %schema.name,
            file = %file.name(),
            partitions = ?take,
            "Read table file"
        );
        claimed.extend(take);
    }
    Ok(rows)
}

/// For each live column, the index of the saved column of the same name
fn column_mapping(schema: &TableSchema, saved: &[SavedColumn]) -> Vec<Option<usize>> {
    let by_name: HashMap<&str, usize> = saved
        .iter()
        .enumerate()
        .map(|(i, c)| (c.name.as_str(), i))
        .collect();
    schema
        .columns
        .iter()
        .map(|c| by_name.get(c.name.as_str()).copied())
        .collect()
}

/// Build a row in live column order. Dropped columns are ignored and added
/// columns take their default.
fn remap_row(
    schema: &TableSchema,
    mapping: &[Option<usize>],
    mut saved: Row,
) -> Result<Row, String> {
    schema
        .columns
        .iter()
        .zip(mapping)
        .map(|(column, index)| match index {
            Some(i) => Ok(saved
                .get_mut(*i)
                .map(|v| std::mem::replace(v, Value::Null))
                .unwrap_or(Value::Null)),
            None => column.fill_value().map_err(|e| e.to_string()),
        })
        .collect()
}

/// Store prepared rows, appending duplicates to `<nonce>-<TABLE>-duplicates.csv`
/// under `duplicates_dir`.
pub(crate) fn apply(
    state: &mut ClusterState,
    loads: Vec<TableLoad>,
    duplicates_dir: &Path,
    nonce: &str,
) -> Vec<TableOutcome> {
    let fsync = state.config.fsync;
    loads
        .into_iter()
        .map(|load| {
            let result = match load.rows {
                Ok(rows) => store_rows(state, &load.table, rows, duplicates_dir, nonce, fsync),
                Err(e) => Err(e),
            };
            TableOutcome {
                table: load.table,
                replicated: load.replicated,
                result,
                files: load.files,
            }
        })
        .collect()
}

fn store_rows(
    state: &mut ClusterState,
    table: &str,
    rows: Vec<(PartitionId, Row)>,
    duplicates_dir: &Path,
    nonce: &str,
    fsync: bool,
) -> Result<LoadStats, String> {
    let mut stats = LoadStats::default();
    let mut duplicates: Option<(PathBuf, TextExportWriter)> = None;

    for (partition_id, row) in rows {
        match state.tables.load_row(table, partition_id, row.clone()) {
            Ok(LoadOutcome::Inserted) => stats.inserted += 1,
            Ok(LoadOutcome::Duplicate) => {
                if duplicates.is_none() {
                    std::fs::create_dir_all(duplicates_dir).map_err(|e| e.to_string())?;
                    let path = duplicates_dir.join(duplicates_file_name(nonce, table));
                    let writer =
                        TextExportWriter::append(&path, TextFormat::Csv).map_err(|e| e.to_string())?;
                    duplicates = Some((path, writer));
                }
                if let Some((_, writer)) = duplicates.as_mut() {
                    writer.write_row(&row).map_err(|e| e.to_string())?;
                }
                stats.duplicates += 1;
            }
            Err(e) => return Err(e.to_string()),
        }
    }

    if let Some((path, writer)) = duplicates {
        writer.finish(fsync).map_err(|e| e.to_string())?;
        info!(
            target: "strata::snapshot",
            table,
            duplicates = stats.duplicates,
            path = %path.display(),
            "Duplicate rows written to side file"
        );
    }
    debug!(
        target: "strata::snapshot",
        table,
        inserted = stats.inserted,
        duplicates = stats.duplicates,
        "Table restored"
    );
    Ok(stats)
}
