//! Snapshot file naming
//!
//! A snapshot is the set of files in one directory sharing a nonce:
//!
//! ```text
//! snapshots/
//! ├── <nonce>-host_0.digest           # one digest per host
//! ├── <nonce>-host_1.digest
//! ├── <nonce>-<TABLE>-host_0.vpt      # one data file per table per host
//! ├── <nonce>-<TABLE>-host_1.vpt
//! └── <nonce>-<TABLE>.csv             # text exports (not restorable)
//! ```
//!
//! Nonces may not contain `-` or `,` because the dash separates the nonce from
//! the rest of a file name and the comma separates names in digest lists.

use std::path::{Path, PathBuf};
use strata_core::HostId;

/// Extension of digest files
pub const DIGEST_EXTENSION: &str = "digest";

/// Extension of table save files
pub const TABLE_FILE_EXTENSION: &str = "vpt";

const HOST_MARKER: &str = "-host_";

/// Why a nonce was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NonceError {
    /// Empty nonce
    #[error("Provided nonce was null or the empty string")]
    Empty,
    /// Nonce contains a reserved character
    #[error("Provided nonce {nonce} contains a prohibited character ({ch})")]
    ProhibitedCharacter {
        /// The nonce
        nonce: String,
        /// The offending character
        ch: char,
    },
}

/// Check a user supplied nonce
pub fn validate_nonce(nonce: &str) -> Result<(), NonceError> {
    if nonce.is_empty() {
        return Err(NonceError::Empty);
    }
    if let Some(ch) = nonce
        .chars()
        .find(|c| matches!(c, '-' | ',' | '/' | '\\' | '\0') || c.is_whitespace())
    {
        return Err(NonceError::ProhibitedCharacter {
            nonce: nonce.to_string(),
            ch,
        });
    }
    if nonce.starts_with('.') {
        return Err(NonceError::ProhibitedCharacter {
            nonce: nonce.to_string(),
            ch: '.',
        });
    }
    Ok(())
}

/// `<nonce>-host_<id>.digest`
pub fn digest_file_name(nonce: &str, host_id: HostId) -> String {
    format!("{}{}{}.{}", nonce, HOST_MARKER, host_id, DIGEST_EXTENSION)
}

/// `<nonce>-<TABLE>-host_<id>.vpt`
pub fn table_file_name(nonce: &str, table: &str, host_id: HostId) -> String {
    format!(
        "{}-{}{}{}.{}",
        nonce, table, HOST_MARKER, host_id, TABLE_FILE_EXTENSION
    )
}

/// `<nonce>-<TABLE>.<ext>` for text exports
pub fn export_file_name(nonce: &str, table: &str, extension: &str) -> String {
    format!("{}-{}.{}", nonce, table, extension)
}

/// `<nonce>-<TABLE>-duplicates.csv`, the side file for duplicate rows on restore
pub fn duplicates_file_name(nonce: &str, table: &str) -> String {
    format!("{}-{}-duplicates.csv", nonce, table)
}

/// Full path of a digest file
pub fn digest_path(dir: &Path, nonce: &str, host_id: HostId) -> PathBuf {
    dir.join(digest_file_name(nonce, host_id))
}

/// Full path of a table save file
pub fn table_file_path(dir: &Path, nonce: &str, table: &str, host_id: HostId) -> PathBuf {
    dir.join(table_file_name(nonce, table, host_id))
}

/// A file name recognized as part of a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotFileName {
    /// A digest
    Digest {
        /// Snapshot nonce
        nonce: String,
        /// Host that wrote it
        host_id: HostId,
    },
    /// A table save file
    Table {
        /// Snapshot nonce
        nonce: String,
        /// Table name
        table: String,
        /// Host that wrote it
        host_id: HostId,
    },
}

impl SnapshotFileName {
    /// Nonce of the snapshot the file belongs to
    pub fn nonce(&self) -> &str {
        match self {
            SnapshotFileName::Digest { nonce, .. } | SnapshotFileName::Table { nonce, .. } => nonce,
        }
    }

    /// Host that wrote the file
    pub fn host_id(&self) -> HostId {
        match self {
            SnapshotFileName::Digest { host_id, .. } | SnapshotFileName::Table { host_id, .. } => {
                *host_id
            }
        }
    }
}

/// Parse a file name produced by [`digest_file_name`] or [`table_file_name`]
pub fn parse_snapshot_file_name(name: &str) -> Option<SnapshotFileName> {
    if let Some(stem) = name.strip_suffix(&format!(".{}", DIGEST_EXTENSION)) {
        let (nonce, host_id) = split_host(stem)?;
        if validate_nonce(nonce).is_err() {
            return None;
        }
        return Some(SnapshotFileName::Digest {
            nonce: nonce.to_string(),
            host_id,
        });
    }

    if let Some(stem) = name.strip_suffix(&format!(".{}", TABLE_FILE_EXTENSION)) {
        let (prefix, host_id) = split_host(stem)?;
        let (nonce, table) = prefix.split_once('-')?;
        if validate_nonce(nonce).is_err() || table.is_empty() {
            return None;
        }
        return Some(SnapshotFileName::Table {
            nonce: nonce.to_string(),
            table: table.to_string(),
            host_id,
        });
    }

    None
}

fn split_host(stem: &str) -> Option<(&str, HostId)> {
    let idx = stem.rfind(HOST_MARKER)?;
    let host_id = stem[idx + HOST_MARKER.len()..].parse().ok()?;
    Some((&stem[..idx], host_id))
}
