//! On-disk byte formats for snapshot files.
//!
//! This module centralizes all serialization logic for persistent storage.
//!
//! # Module Structure
//!
//! - `table_file`: table save file (`.vpt`) header and chunk format
//! - `digest`: per-host snapshot digest

pub mod digest;
pub mod table_file;

pub use digest::{read_digest, write_digest, DigestError, DigestRecord, DIGEST_VERSION};
pub use table_file::{
    Chunk, SavedColumn, TableFileContents, TableFileError, TableFileHeader, TableFileReader,
    TableFileWriter, CHUNK_HEADER_SIZE, DEFAULT_ROWS_PER_CHUNK, TABLE_FILE_MAGIC,
    TABLE_FILE_VERSION,
};
