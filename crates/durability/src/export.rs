//! CSV and TSV text export
//!
//! Text exports are one-way: they are written for other tools to read and are
//! never restored. CSV follows RFC 4180 (fields containing the delimiter, a
//! quote, or a line break are quoted, quotes doubled). TSV escapes tab,
//! newline, carriage return and backslash with a backslash. NULL is written as
//! `\N` in both formats; a string that is literally `\N` is quoted in CSV and
//! has its backslash escaped in TSV, so it never reads back as NULL.

use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use strata_core::{Row, Value};

/// How NULL is written
const NULL_MARKER: &str = "\\N";

/// Text export format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextFormat {
    /// Comma separated, RFC 4180 quoting
    Csv,
    /// Tab separated, backslash escaping
    Tsv,
}

impl TextFormat {
    /// Parse a format name, case-insensitive
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "csv" => Some(TextFormat::Csv),
            "tsv" => Some(TextFormat::Tsv),
            _ => None,
        }
    }

    /// File extension
    pub fn extension(&self) -> &'static str {
        match self {
            TextFormat::Csv => "csv",
            TextFormat::Tsv => "tsv",
        }
    }

    fn delimiter(&self) -> char {
        match self {
            TextFormat::Csv => ',',
            TextFormat::Tsv => '\t',
        }
    }

    /// Escape one field
    pub fn escape<'a>(&self, field: &'a str) -> Cow<'a, str> {
        match self {
            TextFormat::Csv => escape_csv(field),
            TextFormat::Tsv => escape_tsv(field),
        }
    }

    /// Render a row as one line, without the line terminator
    pub fn format_row(&self, row: &Row) -> String {
        let mut line = String::new();
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                line.push(self.delimiter());
            }
            match value {
                Value::Null => line.push_str(NULL_MARKER),
                Value::String(s) => line.push_str(&self.escape(s)),
                other => line.push_str(&self.escape(&other.to_string())),
            }
        }
        line
    }
}

fn escape_csv(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) || field == NULL_MARKER {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

fn escape_tsv(field: &str) -> Cow<'_, str> {
    if !field.contains(['\t', '\n', '\r', '\\']) {
        return Cow::Borrowed(field);
    }
    let mut out = String::with_capacity(field.len() + 4);
    for c in field.chars() {
        match c {
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Export errors
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The export file exists already
    #[error("SAVE FILE ALREADY EXISTS: {0}")]
    AlreadyExists(PathBuf),
}

/// Writes rows to a text file
pub struct TextExportWriter {
    file: BufWriter<File>,
    format: TextFormat,
    bytes_written: u64,
    rows_written: u64,
}

impl TextExportWriter {
    /// Create a new export file, failing if it exists
    pub fn create(path: &Path, format: TextFormat) -> Result<Self, ExportError> {
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => ExportError::AlreadyExists(path.to_path_buf()),
                _ => ExportError::Io(e),
            })?;
        Ok(Self::from_file(file, format, 0))
    }

    /// Open a file for appending, creating it if needed
    pub fn append(path: &Path, format: TextFormat) -> Result<Self, ExportError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let existing = file.metadata()?.len();
        Ok(Self::from_file(file, format, existing))
    }

    fn from_file(file: File, format: TextFormat, bytes_written: u64) -> Self {
        TextExportWriter {
            file: BufWriter::new(file),
            format,
            bytes_written,
            rows_written: 0,
        }
    }

    /// Append one row
    pub fn write_row(&mut self, row: &Row) -> Result<(), ExportError> {
        let mut line = self.format.format_row(row);
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.bytes_written += line.len() as u64;
        self.rows_written += 1;
        Ok(())
    }

    /// Rows written by this writer
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Flush and close. Returns the file size.
    pub fn finish(self, fsync: bool) -> Result<u64, ExportError> {
        let file = self.file.into_inner().map_err(|e| e.into_error())?;
        if fsync {
            file.sync_all()?;
        }
        Ok(self.bytes_written)
    }
}

/// Write `rows` to a new export file. Returns the file size.
pub fn write_export<'a>(
    path: &Path,
    format: TextFormat,
    rows: impl IntoIterator<Item = &'a Row>,
    fsync: bool,
) -> Result<u64, ExportError> {
    let mut writer = TextExportWriter::create(path, format)?;
    for row in rows {
        writer.write_row(row)?;
    }
    writer.finish(fsync)
}
