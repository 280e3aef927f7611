//! Snapshot request parsing
//!
//! Requests arrive either as positional arguments `(path, nonce, block)` or
//! as one JSON object. Everything here runs before any I/O; a malformed
//! request is rejected with [`SnapshotError::InvalidParameter`] or
//! [`SnapshotError::UnsupportedScheme`].

use std::path::{Path, PathBuf};

use serde_json::{Map, Value as Json};
use strata_durability::{validate_nonce, TextFormat};

use crate::response::{SnapshotError, SnapshotResult};

/// Output format of a save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveFormat {
    /// Binary table files plus digests; restorable
    Native,
    /// One text file per table; export only
    Text(TextFormat),
}

impl SaveFormat {
    fn parse(name: &str) -> SnapshotResult<Self> {
        if name.eq_ignore_ascii_case("native") {
            return Ok(SaveFormat::Native);
        }
        TextFormat::from_name(name)
            .map(SaveFormat::Text)
            .ok_or_else(|| SnapshotError::invalid(format!("Unknown snapshot format: {}", name)))
    }
}

/// A save request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    /// Target directory
    pub path: PathBuf,
    /// Snapshot nonce
    pub nonce: String,
    /// Tables to include; `None` means all
    pub tables: Option<Vec<String>>,
    /// Tables to leave out
    pub skip_tables: Vec<String>,
    /// Wait for the files to be written
    pub block: bool,
    /// Output format
    pub format: SaveFormat,
    /// Written on orderly shutdown
    pub terminal: bool,
}

impl SaveRequest {
    /// Blocking native save of every table
    pub fn new(path: impl Into<PathBuf>, nonce: impl Into<String>) -> Self {
        SaveRequest {
            path: path.into(),
            nonce: nonce.into(),
            tables: None,
            skip_tables: Vec::new(),
            block: true,
            format: SaveFormat::Native,
            terminal: false,
        }
    }

    /// Only save these tables
    pub fn with_tables<S: AsRef<str>>(mut self, tables: &[S]) -> Self {
        self.tables = Some(tables.iter().map(|t| t.as_ref().to_uppercase()).collect());
        self
    }

    /// Leave these tables out
    pub fn with_skip_tables<S: AsRef<str>>(mut self, tables: &[S]) -> Self {
        self.skip_tables = tables.iter().map(|t| t.as_ref().to_uppercase()).collect();
        self
    }

    /// Set whether the call waits for completion
    pub fn with_block(mut self, block: bool) -> Self {
        self.block = block;
        self
    }

    /// Set the output format
    pub fn with_format(mut self, format: SaveFormat) -> Self {
        self.format = format;
        self
    }

    /// Positional form: `(path, nonce, block)`
    pub fn positional(path: &str, nonce: &str, block: u8) -> SnapshotResult<Self> {
        let request = SaveRequest::new(resolve_path(path)?, nonce).with_block(block != 0);
        request.validate()?;
        Ok(request)
    }

    /// JSON form with keys `uripath, nonce, tables, skiptables, block, format`
    pub fn from_json(json: &str) -> SnapshotResult<Self> {
        let obj = parse_object(json)?;
        let path = get_string(&obj, &["uripath", "path"])?
            .ok_or_else(|| SnapshotError::invalid("Snapshot path not specified (uripath)"))?;
        let nonce = get_string(&obj, &["nonce"])?
            .ok_or_else(|| SnapshotError::invalid("Snapshot nonce not specified"))?;

        let mut request = SaveRequest::new(resolve_path(&path)?, nonce);
        request.tables = get_table_list(&obj, "tables")?;
        request.skip_tables = get_table_list(&obj, "skiptables")?.unwrap_or_default();
        if let Some(block) = get_bool(&obj, "block")? {
            request.block = block;
        }
        if let Some(format) = get_string(&obj, &["format"])? {
            request.format = SaveFormat::parse(&format)?;
        }
        request.validate()?;
        Ok(request)
    }

    /// Check the nonce and the table lists
    pub fn validate(&self) -> SnapshotResult<()> {
        validate_nonce(&self.nonce).map_err(|e| SnapshotError::invalid(e.to_string()))?;
        if let Some(tables) = &self.tables {
            if tables.is_empty() {
                return Err(SnapshotError::invalid("Table list is empty"));
            }
            if !self.skip_tables.is_empty() {
                return Err(SnapshotError::invalid(
                    "Cannot specify both tables and skiptables",
                ));
            }
        }
        Ok(())
    }
}

/// A restore request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreRequest {
    /// Directory holding the snapshot
    pub path: PathBuf,
    /// Snapshot to restore; `None` picks the latest viable one
    pub nonce: Option<String>,
    /// Keep the snapshot's transaction ids
    pub is_recover: bool,
    /// Re-hash every partitioned row even if the partition count is unchanged
    pub hashinator: bool,
    /// Directory for duplicate-row files
    pub duplicates_path: Option<PathBuf>,
}

impl RestoreRequest {
    /// Plain restore of `nonce` from `path`
    pub fn new(path: impl Into<PathBuf>, nonce: Option<&str>) -> Self {
        RestoreRequest {
            path: path.into(),
            nonce: nonce.map(str::to_string),
            is_recover: false,
            hashinator: false,
            duplicates_path: None,
        }
    }

    /// Keep the snapshot's transaction ids
    pub fn recover(mut self) -> Self {
        self.is_recover = true;
        self
    }

    /// Force re-hashing of partitioned rows
    pub fn with_hashinator(mut self, hashinator: bool) -> Self {
        self.hashinator = hashinator;
        self
    }

    /// Write duplicate rows under `path`
    pub fn with_duplicates_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.duplicates_path = Some(path.into());
        self
    }

    /// Positional form: `(path, nonce)`
    pub fn positional(path: &str, nonce: &str) -> SnapshotResult<Self> {
        validate_nonce(nonce).map_err(|e| SnapshotError::invalid(e.to_string()))?;
        Ok(RestoreRequest::new(resolve_path(path)?, Some(nonce)))
    }

    /// JSON form with keys `path, nonce, isRecover, hashinator, duplicatespath`
    pub fn from_json(json: &str) -> SnapshotResult<Self> {
        let obj = parse_object(json)?;
        let path = get_string(&obj, &["path", "uripath"])?
            .ok_or_else(|| SnapshotError::invalid("Snapshot path not specified"))?;
        let nonce = get_string(&obj, &["nonce"])?.filter(|n| !n.is_empty());
        if let Some(nonce) = &nonce {
            validate_nonce(nonce).map_err(|e| SnapshotError::invalid(e.to_string()))?;
        }

        let mut request = RestoreRequest::new(resolve_path(&path)?, nonce.as_deref());
        request.is_recover = get_bool(&obj, "isRecover")?.unwrap_or(false);
        request.hashinator = get_bool(&obj, "hashinator")?.unwrap_or(false);
        if let Some(dup) = get_string(&obj, &["duplicatespath"])? {
            request.duplicates_path = Some(resolve_path(&dup)?);
        }
        Ok(request)
    }
}

/// Turn a `file://` URI or a plain path into a filesystem path.
///
/// Any other URI scheme is rejected.
pub fn resolve_path(uri: &str) -> SnapshotResult<PathBuf> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(SnapshotError::invalid("Provided path was null or the empty string"));
    }
    if let Some((scheme, rest)) = uri.split_once(':') {
        // A single letter is a drive prefix, not a scheme
        let looks_like_scheme = scheme.len() > 1
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if looks_like_scheme {
            if !scheme.eq_ignore_ascii_case("file") {
                return Err(SnapshotError::UnsupportedScheme(scheme.to_string()));
            }
            let path = rest.strip_prefix("//").unwrap_or(rest);
            if path.is_empty() {
                return Err(SnapshotError::invalid(format!("URI {} has no path", uri)));
            }
            return Ok(Path::new(path).to_path_buf());
        }
    }
    Ok(PathBuf::from(uri))
}

fn parse_object(json: &str) -> SnapshotResult<Map<String, Json>> {
    match serde_json::from_str::<Json>(json) {
        Ok(Json::Object(obj)) => Ok(obj),
        Ok(_) => Err(SnapshotError::invalid("JSON parameter must be an object")),
        Err(e) => Err(SnapshotError::invalid(format!("Invalid JSON parameter: {}", e))),
    }
}

fn get_string(obj: &Map<String, Json>, keys: &[&str]) -> SnapshotResult<Option<String>> {
    for key in keys {
        match obj.get(*key) {
            None | Some(Json::Null) => continue,
            Some(Json::String(s)) => return Ok(Some(s.clone())),
            Some(other) => {
                return Err(SnapshotError::invalid(format!(
                    "Parameter {} must be a string, got {}",
                    key, other
                )))
            }
        }
    }
    Ok(None)
}

fn get_bool(obj: &Map<String, Json>, key: &str) -> SnapshotResult<Option<bool>> {
    match obj.get(key) {
        None | Some(Json::Null) => Ok(None),
        Some(Json::Bool(b)) => Ok(Some(*b)),
        Some(Json::Number(n)) => Ok(Some(n.as_i64().unwrap_or(0) != 0)),
        Some(Json::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Some(true)),
            "false" | "0" => Ok(Some(false)),
            _ => Err(SnapshotError::invalid(format!(
                "Parameter {} must be a boolean, got {}",
                key, s
            ))),
        },
        Some(other) => Err(SnapshotError::invalid(format!(
            "Parameter {} must be a boolean, got {}",
            key, other
        ))),
    }
}

fn get_table_list(obj: &Map<String, Json>, key: &str) -> SnapshotResult<Option<Vec<String>>> {
    let names: Vec<String> = match obj.get(key) {
        None | Some(Json::Null) => return Ok(None),
        Some(Json::String(s)) => s.split(',').map(|t| t.trim().to_string()).collect(),
        Some(Json::Array(items)) => items
            .iter()
            .map(|item| match item {
                Json::String(s) => Ok(s.trim().to_string()),
                other => Err(SnapshotError::invalid(format!(
                    "Table names in {} must be strings, got {}",
                    key, other
                ))),
            })
            .collect::<SnapshotResult<_>>()?,
        Some(other) => {
            return Err(SnapshotError::invalid(format!(
                "Parameter {} must be a list of table names, got {}",
                key, other
            )))
        }
    };
    Ok(Some(
        names
            .into_iter()
            .filter(|n| !n.is_empty())
            .map(|n| n.to_uppercase())
            .collect(),
    ))
}
