//! Snapshot digest format
//!
//! Every host writes one digest per snapshot. It names the tables the host
//! saved and records the last transaction id of every partition at the moment
//! the snapshot was taken, which is what restore uses to re-seed id
//! generators in recover mode.
//!
//! # Format
//!
//! ```text
//! crc32(4, little-endian) + json + '\n'
//! ```
//!
//! The CRC covers the JSON bytes. Numeric fields that vary between snapshots
//! (ids, sequence, timestamp, host id) are written as fixed-width hex strings,
//! so the digests of one snapshot have the same byte length on every host.
//!
//! Digests are written with the write-fsync-rename pattern: a digest is
//! either fully present or absent.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strata_core::{HostId, PartitionId, TxnId, MP_INIT_PID};

use crate::naming::digest_file_name;

/// Current digest version
pub const DIGEST_VERSION: u32 = 1;

/// Per-host snapshot manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestRecord {
    /// Format version
    pub version: u32,
    /// Snapshot nonce
    pub nonce: String,
    /// Snapshot transaction id
    pub txn_id: TxnId,
    /// Monotonic snapshot sequence number
    #[serde(with = "fixed_hex_u64")]
    pub sequence: u64,
    /// Creation time (microseconds since epoch)
    #[serde(with = "fixed_hex_u64")]
    pub timestamp: u64,
    /// Host that wrote the digest
    #[serde(with = "fixed_hex_u32")]
    pub host_id: HostId,
    /// Cluster instance that took the snapshot
    pub instance_id: String,
    /// Number of hosts at save time
    pub host_count: u32,
    /// Number of data partitions at save time
    pub partition_count: u32,
    /// Tables saved, upper-case, sorted
    pub tables: Vec<String>,
    /// Last transaction id of every partition, plus the multi-partition initiator
    pub partition_transaction_ids: BTreeMap<PartitionId, TxnId>,
    /// True if every table file of this host was written completely
    pub complete: bool,
    /// True for the snapshot taken on orderly shutdown
    pub terminal: bool,
}

/// Digest errors
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The digest already exists
    #[error("SAVE FILE ALREADY EXISTS: {0}")]
    AlreadyExists(PathBuf),
    /// CRC mismatch
    #[error("CRC of snapshot digest did not match digest contents")]
    CrcMismatch {
        /// CRC stored in the file
        stored: u32,
        /// CRC of the bytes read
        computed: u32,
    },
    /// File too short or missing the terminating newline
    #[error("Snapshot digest is truncated")]
    Truncated,
    /// JSON could not be parsed or produced
    #[error("Snapshot digest JSON error: {0}")]
    Json(String),
    /// The record is well-formed but contradicts itself
    #[error("Snapshot digest is inconsistent: {0}")]
    Inconsistent(String),
}

impl DigestError {
    /// True for errors that indicate damaged bytes
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            DigestError::CrcMismatch { .. }
                | DigestError::Truncated
                | DigestError::Json(_)
                | DigestError::Inconsistent(_)
        )
    }
}

impl DigestRecord {
    /// Check the internal invariants of a record.
    ///
    /// `partition_transaction_ids` must hold exactly `partition_count + 1`
    /// entries: partitions `0..partition_count` and the multi-partition
    /// initiator.
    pub fn validate(&self) -> Result<(), DigestError> {
        let expected = self.partition_count as usize + 1;
        if self.partition_transaction_ids.len() != expected {
            return Err(DigestError::Inconsistent(format!(
                "{} partition transaction ids for {} partitions",
                self.partition_transaction_ids.len(),
                self.partition_count
            )));
        }
        if !self.partition_transaction_ids.contains_key(&MP_INIT_PID) {
            return Err(DigestError::Inconsistent(
                "multi-partition initiator id missing".to_string(),
            ));
        }
        if let Some(pid) = (0..self.partition_count)
            .find(|pid| !self.partition_transaction_ids.contains_key(pid))
        {
            return Err(DigestError::Inconsistent(format!(
                "no transaction id for partition {}",
                pid
            )));
        }
        Ok(())
    }

    /// Encode to bytes
    pub fn encode(&self) -> Result<Vec<u8>, DigestError> {
        self.validate()?;
        let json = serde_json::to_vec(self).map_err(|e| DigestError::Json(e.to_string()))?;
        let crc = crc32fast::hash(&json);
        let mut out = Vec::with_capacity(json.len() + 5);
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&json);
        out.push(b'\n');
        Ok(out)
    }

    /// Decode from bytes, checking the CRC first
    pub fn decode(bytes: &[u8]) -> Result<Self, DigestError> {
        if bytes.len() < 6 || bytes[bytes.len() - 1] != b'\n' {
            return Err(DigestError::Truncated);
        }
        let stored = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let json = &bytes[4..bytes.len() - 1];
        let computed = crc32fast::hash(json);
        if stored != computed {
            return Err(DigestError::CrcMismatch { stored, computed });
        }
        let record: DigestRecord =
            serde_json::from_slice(json).map_err(|e| DigestError::Json(e.to_string()))?;
        record.validate()?;
        Ok(record)
    }

    /// Largest id recorded for a data partition or the initiator
    pub fn max_txn_id(&self) -> TxnId {
        self.partition_transaction_ids
            .values()
            .copied()
            .max()
            .unwrap_or(TxnId::ZERO)
    }

    /// True if the digest lists `table`
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t.eq_ignore_ascii_case(table))
    }
}

/// Write a digest into `dir` using write-fsync-rename.
///
/// Returns the final path and the number of bytes written. Fails with
/// [`DigestError::AlreadyExists`] if the digest is already present.
pub fn write_digest(
    dir: &Path,
    record: &DigestRecord,
    fsync: bool,
) -> Result<(PathBuf, u64), DigestError> {
    let name = digest_file_name(&record.nonce, record.host_id);
    let final_path = dir.join(&name);
    if final_path.exists() {
        return Err(DigestError::AlreadyExists(final_path));
    }
    let temp_path = dir.join(format!(".{}.tmp", name));
    let bytes = record.encode()?;

    // A stale temp file is left by a crash between create and rename
    if temp_path.exists() {
        std::fs::remove_file(&temp_path)?;
    }
    let mut file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)?;
    file.write_all(&bytes)?;
    if fsync {
        file.sync_all()?;
    }
    drop(file);

    std::fs::rename(&temp_path, &final_path)?;
    if fsync {
        File::open(dir)?.sync_all()?;
    }

    Ok((final_path, bytes.len() as u64))
}

/// Read and validate a digest file
pub fn read_digest(path: &Path) -> Result<DigestRecord, DigestError> {
    let bytes = std::fs::read(path)?;
    DigestRecord::decode(&bytes)
}

mod fixed_hex_u64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:016x}", value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        u64::from_str_radix(&s, 16).map_err(serde::de::Error::custom)
    }
}

mod fixed_hex_u32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:08x}", value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        let s = String::deserialize(deserializer)?;
        u32::from_str_radix(&s, 16).map_err(serde::de::Error::custom)
    }
}
