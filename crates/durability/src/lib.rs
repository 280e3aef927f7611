//! Durability layer for Strata snapshots
//!
//! This crate handles everything that touches disk:
//!
//! - Table save files (`.vpt`): chunked, CRC-protected, with a completion flag
//! - Digests: per-host manifests of tables and partition transaction ids
//! - CSV/TSV text export
//! - File naming for a snapshot directory
//! - Inventory: grouping files on disk into snapshots
//! - Verification report
//! - Row-level comparison of replicas and snapshots
//! - Chunk payload codecs

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec; // Chunk payload codecs
pub mod compare; // Replica and snapshot row comparison
pub mod export; // CSV/TSV export
pub mod format; // Binary on-disk formats (table files, digests)
pub mod inventory; // Directory scan and per-snapshot file grouping
pub mod naming; // Snapshot file names and nonce rules
pub mod report; // Verification report

// === Re-exports ===

pub use codec::{codec_for, ChunkCodec, CodecError, IdentityCodec};
pub use compare::{
    compare_replicas, compare_snapshots, ComparisonReport, PartitionDiff, SNAPSHOTS_DIFFER,
    SNAPSHOTS_MATCH,
};
pub use export::{write_export, ExportError, TextExportWriter, TextFormat};
pub use format::{
    read_digest, write_digest, Chunk, DigestError, DigestRecord, SavedColumn, TableFileContents,
    TableFileError, TableFileHeader, TableFileReader, TableFileWriter, DIGEST_VERSION,
};
pub use inventory::{
    DigestEntry, ScanOptions, SnapshotFiles, SnapshotInventory, TableFileEntry, MAX_SCAN_DEPTH,
};
pub use naming::{
    digest_file_name, digest_path, duplicates_file_name, export_file_name,
    parse_snapshot_file_name, table_file_name, table_file_path, validate_nonce, NonceError,
    SnapshotFileName, DIGEST_EXTENSION, TABLE_FILE_EXTENSION,
};
pub use report::{
    generate_snapshot_report, verify_snapshots, SnapshotReport, SNAPSHOT_CORRUPTED,
    SNAPSHOT_VALID,
};

/// Current time in microseconds since the Unix epoch
pub fn now_micros() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}
