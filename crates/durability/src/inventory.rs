//! Snapshot inventory
//!
//! Walks snapshot directories, groups files by `(directory, nonce)` and reads
//! every digest and table file header. With validation enabled every chunk
//! CRC is checked as well, which is what the verifier and restore use; the
//! scan operation only needs headers.
//!
//! Unreadable files are recorded with their error instead of aborting the
//! walk.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use strata_core::{HostId, PartitionId, TxnId};
use tracing::{debug, warn};

use crate::format::{read_digest, DigestRecord, TableFileHeader, TableFileReader};
use crate::naming::{parse_snapshot_file_name, SnapshotFileName};

/// Deepest directory level a recursive scan descends to
pub const MAX_SCAN_DEPTH: usize = 32;

/// How to scan
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Only collect files of this nonce
    pub nonce: Option<String>,
    /// Descend into subdirectories
    pub recursive: bool,
    /// Check chunk CRCs, not just headers
    pub validate: bool,
}

impl ScanOptions {
    /// Scan one directory for one nonce, validating every chunk
    pub fn for_restore(nonce: Option<&str>) -> Self {
        ScanOptions {
            nonce: nonce.map(str::to_string),
            recursive: false,
            validate: true,
        }
    }
}

/// A digest found on disk
#[derive(Debug, Clone)]
pub struct DigestEntry {
    /// Full path
    pub path: PathBuf,
    /// Host named in the file name
    pub host_id: HostId,
    /// File size
    pub size: u64,
    /// Decoded record, `None` if unreadable
    pub record: Option<DigestRecord>,
    /// Why the digest could not be read
    pub error: Option<String>,
}

impl DigestEntry {
    /// File name without the directory
    pub fn name(&self) -> String {
        file_name(&self.path)
    }
}

/// A table save file found on disk
#[derive(Debug, Clone)]
pub struct TableFileEntry {
    /// Full path
    pub path: PathBuf,
    /// Table named in the file name
    pub table: String,
    /// Host named in the file name
    pub host_id: HostId,
    /// File size
    pub size: u64,
    /// Decoded header, `None` if unreadable
    pub header: Option<TableFileHeader>,
    /// The writer finished the file
    pub completed: bool,
    /// Partitions with damaged chunks (validated scans only)
    pub corrupt_partitions: BTreeSet<PartitionId>,
    /// Why the file could not be read
    pub error: Option<String>,
}

impl TableFileEntry {
    /// File name without the directory
    pub fn name(&self) -> String {
        file_name(&self.path)
    }

    /// The header could be read
    pub fn readable(&self) -> bool {
        self.header.is_some() && self.error.is_none()
    }

    /// Readable, completed and free of damaged chunks
    pub fn is_intact(&self) -> bool {
        self.readable() && self.completed && self.corrupt_partitions.is_empty()
    }

    /// Partitions this file can supply
    pub fn valid_partitions(&self) -> BTreeSet<PartitionId> {
        match &self.header {
            Some(h) if self.error.is_none() => h
                .partition_ids
                .iter()
                .copied()
                .filter(|p| !self.corrupt_partitions.contains(p))
                .collect(),
            _ => BTreeSet::new(),
        }
    }
}

/// All files of one snapshot in one directory
#[derive(Debug, Clone)]
pub struct SnapshotFiles {
    /// Directory holding the files
    pub dir: PathBuf,
    /// Snapshot nonce
    pub nonce: String,
    /// Digests, ordered by host
    pub digests: Vec<DigestEntry>,
    /// Table files keyed by table, ordered by host
    pub tables: BTreeMap<String, Vec<TableFileEntry>>,
}

impl SnapshotFiles {
    fn new(dir: PathBuf, nonce: String) -> Self {
        SnapshotFiles {
            dir,
            nonce,
            digests: Vec::new(),
            tables: BTreeMap::new(),
        }
    }

    /// Digests that decoded
    pub fn valid_digests(&self) -> impl Iterator<Item = &DigestRecord> {
        self.digests.iter().filter_map(|d| d.record.as_ref())
    }

    /// First readable digest
    pub fn first_digest(&self) -> Option<&DigestRecord> {
        self.valid_digests().next()
    }

    /// True if every digest decoded
    pub fn digests_readable(&self) -> bool {
        !self.digests.is_empty() && self.digests.iter().all(|d| d.record.is_some())
    }

    /// Union of the tables named by the digests
    pub fn tables_required(&self) -> BTreeSet<String> {
        self.valid_digests()
            .flat_map(|d| d.tables.iter().cloned())
            .collect()
    }

    /// Tables some host's digest names whose file from that host is absent
    pub fn tables_missing(&self) -> Vec<String> {
        let mut missing = BTreeSet::new();
        for digest in self.valid_digests() {
            for table in &digest.tables {
                let present = self
                    .tables
                    .get(table)
                    .map(|files| files.iter().any(|f| f.host_id == digest.host_id))
                    .unwrap_or(false);
                if !present {
                    missing.insert(table.clone());
                }
            }
        }
        missing.into_iter().collect()
    }

    /// Tables with a file that was not completed or is damaged
    pub fn tables_incomplete(&self) -> Vec<String> {
        self.tables
            .iter()
            .filter(|(_, files)| files.iter().any(|f| !f.is_intact()))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Every digest readable and complete, no table missing or incomplete
    pub fn is_complete(&self) -> bool {
        self.digests_readable()
            && self.valid_digests().all(|d| d.complete)
            && self.tables_missing().is_empty()
            && self.tables_incomplete().is_empty()
    }

    /// Snapshot transaction id
    pub fn txn_id(&self) -> Option<TxnId> {
        self.first_digest().map(|d| d.txn_id)
    }

    /// Largest snapshot sequence named by any digest
    pub fn sequence(&self) -> Option<u64> {
        self.valid_digests().map(|d| d.sequence).max()
    }

    /// Creation time (microseconds since epoch)
    pub fn created(&self) -> Option<u64> {
        self.valid_digests().map(|d| d.timestamp).max()
    }

    /// True if the snapshot was taken on shutdown
    pub fn is_terminal(&self) -> bool {
        self.valid_digests().any(|d| d.terminal)
    }

    /// Partition count at save time
    pub fn partition_count(&self) -> Option<u32> {
        self.first_digest().map(|d| d.partition_count)
    }

    /// Host count at save time
    pub fn host_count(&self) -> Option<u32> {
        self.valid_digests().map(|d| d.host_count).max()
    }

    /// Total bytes of digests and table files
    pub fn total_size(&self) -> u64 {
        self.digests.iter().map(|d| d.size).sum::<u64>()
            + self
                .tables
                .values()
                .flatten()
                .map(|f| f.size)
                .sum::<u64>()
    }

    /// Hosts whose digest is readable and complete and whose every table
    /// file is present and intact
    pub fn complete_hosts(&self) -> BTreeSet<HostId> {
        self.valid_digests()
            .filter(|d| d.complete)
            .filter(|d| {
                d.tables.iter().all(|table| {
                    self.tables
                        .get(table)
                        .map(|files| {
                            files
                                .iter()
                                .any(|f| f.host_id == d.host_id && f.is_intact())
                        })
                        .unwrap_or(false)
                })
            })
            .map(|d| d.host_id)
            .collect()
    }

    /// Partitions of `table` available from intact files
    pub fn available_partitions(&self, table: &str) -> BTreeSet<PartitionId> {
        self.tables
            .get(table)
            .map(|files| {
                files
                    .iter()
                    .filter(|f| f.readable() && f.completed)
                    .flat_map(|f| f.valid_partitions())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True if the table files can supply every partition of `table`.
    ///
    /// Replicated tables need partition 0; partitioned tables need
    /// `0..partition_count`.
    pub fn has_valid_partition_set(&self, table: &str) -> bool {
        let Some(files) = self.tables.get(table) else {
            return false;
        };
        let replicated = files
            .iter()
            .filter_map(|f| f.header.as_ref())
            .any(|h| h.is_replicated);
        let expected: BTreeSet<PartitionId> = if replicated {
            BTreeSet::from([0])
        } else {
            match self.partition_count() {
                Some(count) => (0..count).collect(),
                None => return false,
            }
        };
        expected.is_subset(&self.available_partitions(table))
    }
}

/// Every snapshot found by a scan
#[derive(Debug, Clone, Default)]
pub struct SnapshotInventory {
    snapshots: BTreeMap<(PathBuf, String), SnapshotFiles>,
    unreadable_dirs: Vec<(PathBuf, String)>,
}

impl SnapshotInventory {
    /// Scan `dir` according to `options`.
    ///
    /// Fails only if `dir` itself cannot be listed.
    pub fn scan(dir: &Path, options: &ScanOptions) -> io::Result<Self> {
        let mut inventory = SnapshotInventory::default();
        // Surface errors on the root directory to the caller
        std::fs::read_dir(dir)?;
        inventory.scan_dir(dir, options, 0);
        Ok(inventory)
    }

    fn scan_dir(&mut self, dir: &Path, options: &ScanOptions, depth: usize) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(target: "strata::snapshot", path = %dir.display(), error = %e, "Cannot list directory");
                self.unreadable_dirs.push((dir.to_path_buf(), e.to_string()));
                return;
            }
        };

        let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
        paths.sort();

        for path in paths {
            if path.is_dir() {
                if options.recursive && depth + 1 < MAX_SCAN_DEPTH {
                    self.scan_dir(&path, options, depth + 1);
                }
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(parsed) = parse_snapshot_file_name(name) else {
                continue;
            };
            if let Some(wanted) = &options.nonce {
                if parsed.nonce() != wanted {
                    continue;
                }
            }

            let snapshot = self
                .snapshots
                .entry((dir.to_path_buf(), parsed.nonce().to_string()))
                .or_insert_with(|| SnapshotFiles::new(dir.to_path_buf(), parsed.nonce().to_string()));

            match parsed {
                SnapshotFileName::Digest { host_id, .. } => {
                    snapshot.digests.push(read_digest_entry(path, host_id));
                }
                SnapshotFileName::Table { table, host_id, .. } => {
                    let entry = read_table_entry(path, table.clone(), host_id, options.validate);
                    snapshot.tables.entry(table).or_default().push(entry);
                }
            }
        }
    }

    /// Iterate snapshots ordered by directory then nonce
    pub fn snapshots(&self) -> impl Iterator<Item = &SnapshotFiles> {
        self.snapshots.values()
    }

    /// Consume into the list of snapshots
    pub fn into_snapshots(self) -> Vec<SnapshotFiles> {
        self.snapshots.into_values().collect()
    }

    /// First snapshot with `nonce`
    pub fn get(&self, nonce: &str) -> Option<&SnapshotFiles> {
        self.snapshots.values().find(|s| s.nonce == nonce)
    }

    /// Number of snapshots
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// True if nothing was found
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Subdirectories that could not be listed
    pub fn unreadable_dirs(&self) -> &[(PathBuf, String)] {
        &self.unreadable_dirs
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn read_digest_entry(path: PathBuf, host_id: HostId) -> DigestEntry {
    let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    match read_digest(&path) {
        Ok(record) => DigestEntry {
            path,
            host_id,
            size,
            record: Some(record),
            error: None,
        },
        Err(e) => {
            warn!(target: "strata::snapshot", path = %path.display(), error = %e, "Unreadable digest");
            DigestEntry {
                path,
                host_id,
                size,
                record: None,
                error: Some(e.to_string()),
            }
        }
    }
}

fn read_table_entry(path: PathBuf, table: String, host_id: HostId, validate: bool) -> TableFileEntry {
    let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    let mut entry = TableFileEntry {
        path,
        table,
        host_id,
        size,
        header: None,
        completed: false,
        corrupt_partitions: BTreeSet::new(),
        error: None,
    };

    let reader = match TableFileReader::open(&entry.path) {
        Ok(reader) => reader,
        Err(e) => {
            warn!(target: "strata::snapshot", path = %entry.path.display(), error = %e, "Unreadable table file");
            entry.error = Some(e.to_string());
            return entry;
        }
    };
    entry.completed = reader.completed();
    entry.header = Some(reader.header().clone());

    if validate {
        match reader.read_chunks() {
            Ok(contents) => {
                entry.corrupt_partitions = contents.corrupt_partitions;
                if contents.truncated {
                    entry
                        .corrupt_partitions
                        .extend(reader.header().partition_ids.iter().copied());
                }
                if !entry.corrupt_partitions.is_empty() {
                    debug!(
                        target: "strata::snapshot",
                        path = %entry.path.display(),
                        corrupt = ?entry.corrupt_partitions,
                        "Corrupt partitions in table file"
                    );
                }
            }
            Err(e) => entry.error = Some(e.to_string()),
        }
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{write_digest, SavedColumn, TableFileWriter, DIGEST_VERSION};
    use crate::naming::{digest_path, table_file_path};
    use strata_core::{ColumnType, Value, MP_INIT_PID};

    fn write_snapshot(dir: &Path, nonce: &str, hosts: u32, tables: &[&str]) {
        for host_id in 0..hosts {
            let mut ids = BTreeMap::new();
            ids.insert(0, TxnId::compose(1, 0));
            ids.insert(MP_INIT_PID, TxnId::compose(1, MP_INIT_PID));
            let record = DigestRecord {
                version: DIGEST_VERSION,
                nonce: nonce.to_string(),
                txn_id: TxnId::compose(1, MP_INIT_PID),
                sequence: 1,
                timestamp: 0,
                host_id,
                instance_id: "i".to_string(),
                host_count: hosts,
                partition_count: 1,
                tables: tables.iter().map(|t| t.to_string()).collect(),
                partition_transaction_ids: ids,
                complete: true,
                terminal: false,
            };
            write_digest(dir, &record, false).unwrap();
            for table in tables {
                let header = TableFileHeader {
                    host_id,
                    instance_id: "i".to_string(),
                    table_name: table.to_string(),
                    is_replicated: false,
                    total_partitions: 1,
                    partition_ids: vec![0],
                    txn_id: TxnId::compose(1, MP_INIT_PID),
                    sequence: 1,
                    created_at: 0,
                    codec_id: "identity".to_string(),
                    columns: vec![SavedColumn {
                        name: "A".to_string(),
                        column_type: ColumnType::Integer,
                    }],
                };
                let path = table_file_path(dir, nonce, table, host_id);
                let mut w = TableFileWriter::create(&path, &header, false).unwrap();
                w.write_partition(0, &[vec![Value::Integer(1)]]).unwrap();
                w.finish().unwrap();
            }
        }
    }

    #[test]
    fn test_complete_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path(), "n1", 2, &["A", "B"]);
        let inv = SnapshotInventory::scan(dir.path(), &ScanOptions::default()).unwrap();
        let snap = inv.get("n1").unwrap();
        assert_eq!(snap.digests.len(), 2);
        assert!(snap.is_complete());
        assert_eq!(snap.complete_hosts().len(), 2);
        assert!(snap.has_valid_partition_set("A"));
    }

    #[test]
    fn test_missing_table_file() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path(), "n1", 2, &["A", "B"]);
        std::fs::remove_file(table_file_path(dir.path(), "n1", "B", 1)).unwrap();
        let inv = SnapshotInventory::scan(dir.path(), &ScanOptions::default()).unwrap();
        let snap = inv.get("n1").unwrap();
        assert!(!snap.is_complete());
        assert_eq!(snap.tables_missing(), vec!["B".to_string()]);
        assert_eq!(snap.complete_hosts(), BTreeSet::from([0]));
    }

    #[test]
    fn test_nonce_filter_and_recursion() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path(), "n1", 1, &["A"]);
        write_snapshot(dir.path(), "n2", 1, &["A"]);
        let sub = dir.path().join("nested");
        std::fs::create_dir(&sub).unwrap();
        write_snapshot(&sub, "n3", 1, &["A"]);

        let flat = SnapshotInventory::scan(dir.path(), &ScanOptions::default()).unwrap();
        assert_eq!(flat.len(), 2);

        let deep = SnapshotInventory::scan(
            dir.path(),
            &ScanOptions {
                recursive: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(deep.len(), 3);

        let filtered =
            SnapshotInventory::scan(dir.path(), &ScanOptions::for_restore(Some("n2"))).unwrap();
        assert_eq!(filtered.len(), 1);
        assert!(filtered.get("n2").is_some());
    }

    #[test]
    fn test_corrupt_digest_recorded() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path(), "n1", 1, &["A"]);
        let path = digest_path(dir.path(), "n1", 0);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[10] ^= 0x01;
        std::fs::write(&path, bytes).unwrap();
        let inv = SnapshotInventory::scan(dir.path(), &ScanOptions::default()).unwrap();
        let snap = inv.get("n1").unwrap();
        assert!(snap.digests[0].error.is_some());
        assert!(!snap.is_complete());
    }

    #[test]
    fn test_missing_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SnapshotInventory::scan(&dir.path().join("nope"), &ScanOptions::default()).is_err());
    }

    #[test]
    fn test_header_only_scan_of_damaged_table_file() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path(), "n1", 1, &["A"]);
        let path = table_file_path(dir.path(), "n1", "A", 0);
        let len = std::fs::metadata(&path).unwrap().len();
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 2)
            .unwrap();

        let inv = SnapshotInventory::scan(dir.path(), &ScanOptions::default()).unwrap();
        let entry = &inv.get("n1").unwrap().tables["A"][0];
        assert!(entry.error.is_none());
        assert!(entry.completed);
        assert_eq!(entry.size, len - 2);
        let header = entry.header.as_ref().unwrap();
        assert_eq!(header.table_name, "A");
        assert_eq!(header.host_id, 0);
        assert_eq!(header.partition_ids, vec![0]);
        assert!(entry.corrupt_partitions.is_empty());

        let validated =
            SnapshotInventory::scan(dir.path(), &ScanOptions::for_restore(Some("n1"))).unwrap();
        let entry = &validated.get("n1").unwrap().tables["A"][0];
        assert!(entry.header.is_some());
        assert_eq!(entry.corrupt_partitions, BTreeSet::from([0]));
    }
}
