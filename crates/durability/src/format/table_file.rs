//! Table save file format (`.vpt`)
//!
//! One file holds one table's rows as written by one host. For a partitioned
//! table it holds every partition replica that host owns; for a replicated
//! table it holds the full table under partition id 0.
//!
//! # Binary Format
//!
//! ```text
//! magic("VPT1", 4) + version(4) + completed(1) + header_len(4)
//!   + header(header_len, MessagePack) + header_crc(4)
//! chunk*: partition_id(4) + row_count(4) + data_len(4) + crc(4) + data(data_len)
//! ```
//!
//! All integers are little-endian. `header_crc` covers version, header_len and
//! the header body; the `completed` byte is excluded because it is rewritten in
//! place once the last chunk is on disk. A chunk CRC covers its first three
//! fields and its payload. Every byte of the file is therefore covered by a
//! CRC, the magic check, or the completed-flag check.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use strata_core::{ColumnType, HostId, PartitionId, Row, TxnId};

use crate::codec::{codec_for, ChunkCodec, CodecError};

/// Magic bytes at the start of every table save file
pub const TABLE_FILE_MAGIC: &[u8; 4] = b"VPT1";

/// Current table file format version
pub const TABLE_FILE_VERSION: u32 = 1;

/// Rows per chunk when the writer splits a partition
pub const DEFAULT_ROWS_PER_CHUNK: usize = 1000;

/// Size of a chunk header in bytes
pub const CHUNK_HEADER_SIZE: usize = 16;

const COMPLETED_OFFSET: u64 = 8;
const PREAMBLE_SIZE: usize = 13;

/// A column as it was declared when the snapshot was taken
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedColumn {
    /// Column name
    pub name: String,
    /// Column type at save time
    pub column_type: ColumnType,
}

/// Metadata at the start of a table save file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableFileHeader {
    /// Host that wrote the file
    pub host_id: HostId,
    /// Cluster instance that took the snapshot
    pub instance_id: String,
    /// Table name
    pub table_name: String,
    /// True for replicated tables
    pub is_replicated: bool,
    /// Partition count of the cluster at save time
    pub total_partitions: u32,
    /// Partitions whose rows are in this file
    pub partition_ids: Vec<PartitionId>,
    /// Snapshot transaction id
    pub txn_id: TxnId,
    /// Snapshot sequence number
    pub sequence: u64,
    /// Creation time (microseconds since epoch)
    pub created_at: u64,
    /// Codec used for chunk payloads
    pub codec_id: String,
    /// Table columns at save time
    pub columns: Vec<SavedColumn>,
}

/// Errors reading or writing table save files
#[derive(Debug, thiserror::Error)]
pub enum TableFileError {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The target file exists already
    #[error("SAVE FILE ALREADY EXISTS: {0}")]
    AlreadyExists(PathBuf),
    /// File is shorter than a header
    #[error("Table file too small: {size} bytes")]
    TooSmall {
        /// Actual size
        size: usize,
    },
    /// Magic bytes do not match
    #[error("Invalid magic bytes: {0:?}")]
    BadMagic([u8; 4]),
    /// Header CRC mismatch
    #[error("CRC check failed on table file header: stored {stored:#010x}, computed {computed:#010x}")]
    HeaderCrcMismatch {
        /// CRC stored in the file
        stored: u32,
        /// CRC of the bytes read
        computed: u32,
    },
    /// Format version not understood
    #[error("Unsupported table file version {0}")]
    UnsupportedVersion(u32),
    /// The completed byte is neither 0 nor 1
    #[error("Invalid completed flag {0:#04x}")]
    InvalidCompletedFlag(u8),
    /// Header extends past the end of the file
    #[error("Table file header truncated")]
    Truncated,
    /// Header body could not be decoded
    #[error("Header decode error: {0}")]
    HeaderDecode(String),
    /// Rows could not be encoded
    #[error("Encode error: {0}")]
    Encode(String),
    /// Codec failure
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl TableFileError {
    /// True for errors that indicate damaged bytes rather than I/O trouble
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            TableFileError::TooSmall { .. }
                | TableFileError::BadMagic(_)
                | TableFileError::HeaderCrcMismatch { .. }
                | TableFileError::InvalidCompletedFlag(_)
                | TableFileError::Truncated
                | TableFileError::HeaderDecode(_)
        )
    }
}

/// Writes one table save file.
///
/// The file is created with `completed = 0`. [`finish`](Self::finish) flips
/// the flag once every chunk is written. A writer dropped without `finish`
/// leaves an incomplete file behind, which scans report as such.
pub struct TableFileWriter {
    path: PathBuf,
    file: BufWriter<File>,
    codec: Box<dyn ChunkCodec>,
    rows_per_chunk: usize,
    bytes_written: u64,
    rows_written: u64,
    fsync: bool,
}

impl TableFileWriter {
    /// Create the file and write its header.
    ///
    /// Fails with [`TableFileError::AlreadyExists`] if `path` exists.
    pub fn create(
        path: impl AsRef<Path>,
        header: &TableFileHeader,
        fsync: bool,
    ) -> Result<Self, TableFileError> {
        let path = path.as_ref().to_path_buf();
        let codec = codec_for(&header.codec_id)?;
        let body = rmp_serde::to_vec_named(header)
            .map_err(|e| TableFileError::Encode(e.to_string()))?;

        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => TableFileError::AlreadyExists(path.clone()),
                _ => TableFileError::Io(e),
            })?;
        let mut file = BufWriter::new(file);

        let mut crc_input = Vec::with_capacity(8 + body.len());
        crc_input.write_u32::<LittleEndian>(TABLE_FILE_VERSION)?;
        crc_input.write_u32::<LittleEndian>(body.len() as u32)?;
        crc_input.extend_from_slice(&body);
        let crc = crc32fast::hash(&crc_input);

        file.write_all(TABLE_FILE_MAGIC)?;
        file.write_u32::<LittleEndian>(TABLE_FILE_VERSION)?;
        file.write_u8(0)?;
        file.write_u32::<LittleEndian>(body.len() as u32)?;
        file.write_all(&body)?;
        file.write_u32::<LittleEndian>(crc)?;

        Ok(TableFileWriter {
            path,
            file,
            codec,
            rows_per_chunk: DEFAULT_ROWS_PER_CHUNK,
            bytes_written: (PREAMBLE_SIZE + body.len() + 4) as u64,
            rows_written: 0,
            fsync,
        })
    }

    /// Override the number of rows per chunk
    pub fn with_rows_per_chunk(mut self, rows_per_chunk: usize) -> Self {
        self.rows_per_chunk = rows_per_chunk.max(1);
        self
    }

    /// Path of the file being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append the rows of one partition, split into chunks
    pub fn write_partition(
        &mut self,
        partition_id: PartitionId,
        rows: &[Row],
    ) -> Result<(), TableFileError> {
        for chunk in rows.chunks(self.rows_per_chunk) {
            self.write_chunk(partition_id, chunk)?;
        }
        Ok(())
    }

    fn write_chunk(&mut self, partition_id: PartitionId, rows: &[Row]) -> Result<(), TableFileError> {
        let encoded =
            rmp_serde::to_vec(rows).map_err(|e| TableFileError::Encode(e.to_string()))?;
        let data = self.codec.encode(&encoded);

        let mut chunk_header = Vec::with_capacity(12);
        chunk_header.write_u32::<LittleEndian>(partition_id)?;
        chunk_header.write_u32::<LittleEndian>(rows.len() as u32)?;
        chunk_header.write_u32::<LittleEndian>(data.len() as u32)?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&chunk_header);
        hasher.update(&data);
        let crc = hasher.finalize();

        self.file.write_all(&chunk_header)?;
        self.file.write_u32::<LittleEndian>(crc)?;
        self.file.write_all(&data)?;

        self.bytes_written += (CHUNK_HEADER_SIZE + data.len()) as u64;
        self.rows_written += rows.len() as u64;
        Ok(())
    }

    /// Mark the file complete and close it. Returns the file size.
    pub fn finish(self) -> Result<u64, TableFileError> {
        let mut file = self.file.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(COMPLETED_OFFSET))?;
        file.write_u8(1)?;
        if self.fsync {
            file.sync_all()?;
        }
        Ok(self.bytes_written)
    }

    /// Rows written so far
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

/// One decoded chunk
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Partition the rows belong to
    pub partition_id: PartitionId,
    /// Decoded rows
    pub rows: Vec<Row>,
}

/// Everything readable from a table file's chunk area
#[derive(Debug, Clone, Default)]
pub struct TableFileContents {
    /// Chunks whose CRC matched
    pub chunks: Vec<Chunk>,
    /// Partitions with at least one damaged chunk
    pub corrupt_partitions: BTreeSet<PartitionId>,
    /// True if the file ended inside a chunk
    pub truncated: bool,
}

impl TableFileContents {
    /// True if every chunk was intact
    pub fn is_clean(&self) -> bool {
        self.corrupt_partitions.is_empty() && !self.truncated
    }

    /// Total rows across intact chunks
    pub fn row_count(&self) -> usize {
        self.chunks.iter().map(|c| c.rows.len()).sum()
    }
}

/// Reads and validates a table save file.
///
/// [`open`](Self::open) reads only the preamble and the CRC-covered header,
/// so listing a directory never touches chunk payloads. Chunks are streamed
/// from disk by [`read_chunks`](Self::read_chunks).
#[derive(Debug)]
pub struct TableFileReader {
    path: PathBuf,
    header: TableFileHeader,
    completed: bool,
    file_size: u64,
    chunks_offset: u64,
}

impl TableFileReader {
    /// Open a file and validate its header
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TableFileError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let file_size = file.metadata()?.len();

        if file_size < (PREAMBLE_SIZE + 4) as u64 {
            return Err(TableFileError::TooSmall {
                size: file_size as usize,
            });
        }

        let mut reader = BufReader::new(file);
        let mut preamble = [0u8; PREAMBLE_SIZE];
        reader.read_exact(&mut preamble)?;

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&preamble[0..4]);
        if &magic != TABLE_FILE_MAGIC {
            return Err(TableFileError::BadMagic(magic));
        }

        let mut cursor = Cursor::new(&preamble[4..]);
        let version = cursor.read_u32::<LittleEndian>()?;
        let completed_flag = cursor.read_u8()?;
        let header_len = cursor.read_u32::<LittleEndian>()? as u64;

        let chunks_offset = PREAMBLE_SIZE as u64 + header_len + 4;
        if chunks_offset > file_size {
            return Err(TableFileError::Truncated);
        }
        let mut body = vec![0u8; header_len as usize];
        reader.read_exact(&mut body)?;
        let stored = reader.read_u32::<LittleEndian>()?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&preamble[4..8]);
        hasher.update(&preamble[9..PREAMBLE_SIZE]);
        hasher.update(&body);
        let computed = hasher.finalize();
        if stored != computed {
            return Err(TableFileError::HeaderCrcMismatch { stored, computed });
        }

        if version != TABLE_FILE_VERSION {
            return Err(TableFileError::UnsupportedVersion(version));
        }

        let completed = match completed_flag {
            0 => false,
            1 => true,
            other => return Err(TableFileError::InvalidCompletedFlag(other)),
        };

        let header: TableFileHeader = rmp_serde::from_slice(&body)
            .map_err(|e| TableFileError::HeaderDecode(e.to_string()))?;

        Ok(TableFileReader {
            path,
            header,
            completed,
            file_size,
            chunks_offset,
        })
    }

    /// Path of the file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decoded header
    pub fn header(&self) -> &TableFileHeader {
        &self.header
    }

    /// True once the writer finished
    pub fn completed(&self) -> bool {
        self.completed
    }

    /// Size of the file in bytes
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Decode every chunk, recording damaged partitions instead of failing.
    ///
    /// Chunks are read one at a time; only the current payload is held in
    /// memory alongside the decoded rows.
    pub fn read_chunks(&self) -> Result<TableFileContents, TableFileError> {
        let codec = codec_for(&self.header.codec_id)?;
        let mut file = File::open(&self.path)?;
        let end = file.metadata()?.len();
        file.seek(SeekFrom::Start(self.chunks_offset))?;
        let mut reader = BufReader::new(file);
        let mut contents = TableFileContents::default();
        let mut pos = self.chunks_offset;
        let mut chunk_header = [0u8; CHUNK_HEADER_SIZE];
        let mut payload = Vec::new();

        while pos < end {
            if end - pos < CHUNK_HEADER_SIZE as u64 {
                contents.truncated = true;
                break;
            }
            reader.read_exact(&mut chunk_header)?;
            let mut cursor = Cursor::new(&chunk_header[..]);
            let partition_id = cursor.read_u32::<LittleEndian>()?;
            let row_count = cursor.read_u32::<LittleEndian>()? as usize;
            let data_len = cursor.read_u32::<LittleEndian>()? as u64;
            let stored_crc = cursor.read_u32::<LittleEndian>()?;

            pos += CHUNK_HEADER_SIZE as u64;
            if data_len > end - pos {
                contents.truncated = true;
                break;
            }
            payload.resize(data_len as usize, 0);
            reader.read_exact(&mut payload)?;
            pos += data_len;

            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&chunk_header[..CHUNK_HEADER_SIZE - 4]);
            hasher.update(&payload);
            if hasher.finalize() != stored_crc {
                contents.corrupt_partitions.insert(partition_id);
                continue;
            }

            let rows: Option<Vec<Row>> = codec
                .decode(&payload)
                .ok()
                .and_then(|decoded| rmp_serde::from_slice(&decoded).ok());
            match rows {
                Some(rows) if rows.len() == row_count => {
                    contents.chunks.push(Chunk { partition_id, rows })
                }
                _ => {
                    contents.corrupt_partitions.insert(partition_id);
                }
            }
        }

        Ok(contents)
    }
}
