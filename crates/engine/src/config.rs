//! Cluster configuration via `snapshot.toml`
//!
//! Holds the shape of the cluster (hosts, sites per host, k-safety) and the
//! snapshot tunables. The queued-save retry interval lives here instead of in
//! process-wide mutable state, so every cluster owns its own value.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strata_core::{Error, Result, MAX_PARTITION_ID};

/// Config file name placed next to the snapshot directory.
pub const CONFIG_FILE_NAME: &str = "snapshot.toml";

/// Cluster and snapshot configuration loaded from `snapshot.toml`.
///
/// # Example
///
/// ```toml
/// hosts = 3
/// sites_per_host = 2
/// k_factor = 1
/// retry_interval_ms = 1000
/// fsync = true
/// # terminal_snapshot_path = "/var/lib/strata/snapshots"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Number of hosts.
    #[serde(default = "default_hosts")]
    pub hosts: u32,
    /// Execution sites on each host.
    #[serde(default = "default_sites_per_host")]
    pub sites_per_host: u32,
    /// Number of extra replicas of every partition.
    #[serde(default)]
    pub k_factor: u32,
    /// Interval between attempts to run a queued save.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Directory for the snapshot written on orderly shutdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_snapshot_path: Option<PathBuf>,
    /// Default directory for duplicate-row files written by restore.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicates_path: Option<PathBuf>,
    /// fsync snapshot files before reporting success.
    #[serde(default = "default_fsync")]
    pub fsync: bool,
}

fn default_hosts() -> u32 {
    1
}

fn default_sites_per_host() -> u32 {
    2
}

fn default_retry_interval_ms() -> u64 {
    1000
}

fn default_fsync() -> bool {
    true
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            sites_per_host: default_sites_per_host(),
            k_factor: 0,
            retry_interval_ms: default_retry_interval_ms(),
            terminal_snapshot_path: None,
            duplicates_path: None,
            fsync: default_fsync(),
        }
    }
}

impl SnapshotConfig {
    /// Set the number of hosts.
    pub fn with_hosts(mut self, hosts: u32) -> Self {
        self.hosts = hosts;
        self
    }

    /// Set the number of sites per host.
    pub fn with_sites_per_host(mut self, sites_per_host: u32) -> Self {
        self.sites_per_host = sites_per_host;
        self
    }

    /// Set the k-safety factor.
    pub fn with_k_factor(mut self, k_factor: u32) -> Self {
        self.k_factor = k_factor;
        self
    }

    /// Set the queued-save retry interval.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Write a terminal snapshot to `path` on shutdown.
    pub fn with_terminal_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.terminal_snapshot_path = Some(path.into());
        self
    }

    /// Default directory for duplicate-row files.
    pub fn with_duplicates_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.duplicates_path = Some(path.into());
        self
    }

    /// Enable or disable fsync of snapshot files.
    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    /// Queued-save retry interval.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Total number of execution sites.
    pub fn site_count(&self) -> u32 {
        self.hosts * self.sites_per_host
    }

    /// Number of distinct data partitions.
    pub fn partition_count(&self) -> u32 {
        self.site_count() / (self.k_factor + 1)
    }

    /// Check that the configuration describes a buildable cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if a count is zero, if the sites cannot be split
    /// evenly into `k_factor + 1` replicas, or if there are fewer hosts than
    /// replicas of a partition.
    pub fn validate(&self) -> Result<()> {
        if self.hosts == 0 {
            return Err(Error::invalid_input("hosts must be at least 1"));
        }
        if self.sites_per_host == 0 {
            return Err(Error::invalid_input("sites_per_host must be at least 1"));
        }
        if self.retry_interval_ms == 0 {
            return Err(Error::invalid_input("retry_interval_ms must be at least 1"));
        }
        let replicas = self.k_factor + 1;
        if self.site_count() % replicas != 0 {
            return Err(Error::invalid_input(format!(
                "{} sites cannot be split into {} replicas",
                self.site_count(),
                replicas
            )));
        }
        if replicas > self.hosts {
            return Err(Error::invalid_input(format!(
                "k_factor {} needs at least {} hosts, have {}",
                self.k_factor, replicas, self.hosts
            )));
        }
        if self.partition_count() > MAX_PARTITION_ID + 1 {
            return Err(Error::invalid_input(format!(
                "{} partitions exceeds the maximum of {}",
                self.partition_count(),
                MAX_PARTITION_ID + 1
            )));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Strata snapshot cluster configuration
#
# Cluster shape: hosts x sites_per_host execution sites, every partition
# replicated on k_factor + 1 distinct hosts.
hosts = 1
sites_per_host = 2
k_factor = 0

# Interval between attempts to run a queued snapshot save (milliseconds)
retry_interval_ms = 1000

# fsync snapshot files before reporting success
fsync = true

# Write a terminal snapshot here on orderly shutdown
# terminal_snapshot_path = "/var/lib/strata/snapshots"

# Default directory for rows rejected as duplicates during restore
# duplicates_path = "/var/lib/strata/duplicates"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_input(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: SnapshotConfig = toml::from_str(&content).map_err(|e| {
            Error::invalid_input(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize config: {}", e))
        })?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = SnapshotConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.partition_count(), 2);
    }

    #[test]
    fn test_default_toml_parses_to_default() {
        let parsed: SnapshotConfig = toml::from_str(SnapshotConfig::default_toml()).unwrap();
        assert_eq!(parsed, SnapshotConfig::default());
    }

    #[test]
    fn test_partition_count_with_k_factor() {
        let config = SnapshotConfig::default()
            .with_hosts(3)
            .with_sites_per_host(2)
            .with_k_factor(1);
        assert!(config.validate().is_ok());
        assert_eq!(config.partition_count(), 3);
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        assert!(SnapshotConfig::default().with_hosts(0).validate().is_err());
        assert!(SnapshotConfig::default()
            .with_sites_per_host(0)
            .validate()
            .is_err());
        // 1 host cannot hold 2 replicas
        assert!(SnapshotConfig::default().with_k_factor(1).validate().is_err());
        // 3 sites cannot split into 2 replicas
        assert!(SnapshotConfig::default()
            .with_hosts(3)
            .with_sites_per_host(1)
            .with_k_factor(1)
            .validate()
            .is_err());
        assert!(SnapshotConfig::default()
            .with_retry_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_write_and_read_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = SnapshotConfig::default()
            .with_hosts(2)
            .with_terminal_snapshot_path("/tmp/snapshots")
            .with_fsync(false);
        config.write_to_file(&path).unwrap();
        assert_eq!(SnapshotConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_write_default_if_missing_keeps_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "hosts = 4\n").unwrap();
        SnapshotConfig::write_default_if_missing(&path).unwrap();
        assert_eq!(SnapshotConfig::from_file(&path).unwrap().hosts, 4);
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "hosts = 0\n").unwrap();
        assert!(SnapshotConfig::from_file(&path).is_err());
    }
}
