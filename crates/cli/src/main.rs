//! Strata snapshot CLI: offline tools for snapshot directories.
//!
//! - **verify**: re-check digests and chunk CRCs; each report starts with
//!   `Snapshot valid` or `Snapshot corrupted`
//! - **scan**: list snapshots and their completeness
//! - **compare**: check that replicas, or two snapshots, hold the same rows
//! - **init-config**: write a default `snapshot.toml`
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`.

mod commands;
mod format;

use std::path::{Path, PathBuf};
use std::process;

use strata_durability::{
    compare_replicas, compare_snapshots, verify_snapshots, ScanOptions, SnapshotFiles,
    SnapshotInventory,
};
use strata_engine::{SnapshotConfig, CONFIG_FILE_NAME};
use tracing_subscriber::EnvFilter;

use commands::build_cli;
use format::{format_comparison, format_reports, format_scan, OutputMode};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let matches = build_cli().get_matches();
    let mode = if matches.get_flag("json") {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let exit_code = match matches.subcommand() {
        Some(("verify", sub)) => {
            let dirs: Vec<PathBuf> = sub
                .get_many::<String>("dir")
                .map(|d| d.map(PathBuf::from).collect())
                .unwrap_or_else(|| vec![PathBuf::from(".")]);
            let nonces: Vec<String> = sub
                .get_many::<String>("nonce")
                .map(|n| n.cloned().collect())
                .unwrap_or_default();
            run_verify(&dirs, &nonces, mode)
        }
        Some(("scan", sub)) => match sub.get_one::<String>("path") {
            Some(path) => run_scan(Path::new(path), mode),
            None => 2,
        },
        Some(("compare", sub)) => {
            let dir = sub
                .get_one::<String>("dir")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let other_dir = sub
                .get_one::<String>("other-dir")
                .map(PathBuf::from)
                .unwrap_or_else(|| dir.clone());
            match sub.get_one::<String>("nonce") {
                Some(nonce) => {
                    let other = sub
                        .get_one::<String>("other")
                        .map(|o| (other_dir.as_path(), o.as_str()));
                    run_compare((dir.as_path(), nonce.as_str()), other, mode)
                }
                None => 2,
            }
        }
        Some(("init-config", sub)) => {
            let path = sub
                .get_one::<String>("path")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
            run_init_config(&path)
        }
        _ => 2,
    };
    process::exit(exit_code);
}

fn run_verify(dirs: &[PathBuf], nonces: &[String], mode: OutputMode) -> i32 {
    tracing::debug!(target: "strata::snapshot", dirs = dirs.len(), nonces = nonces.len(), "Verifying snapshots");
    let reports = verify_snapshots(dirs, nonces);
    if reports.is_empty() {
        eprintln!("No snapshots found");
        return 1;
    }
    println!("{}", format_reports(&reports, mode));
    if reports.iter().all(|r| r.valid) {
        0
    } else {
        1
    }
}

fn run_scan(path: &Path, mode: OutputMode) -> i32 {
    let options = ScanOptions {
        nonce: None,
        recursive: true,
        validate: false,
    };
    match SnapshotInventory::scan(path, &options) {
        Ok(inventory) => {
            for (dir, err) in inventory.unreadable_dirs() {
                eprintln!("(warning) cannot list {}: {}", dir.display(), err);
            }
            println!("{}", format_scan(&inventory.into_snapshots(), mode));
            0
        }
        Err(e) => {
            eprintln!("(error) cannot scan {}: {}", path.display(), e);
            1
        }
    }
}

fn load_snapshot(dir: &Path, nonce: &str) -> Option<SnapshotFiles> {
    let options = ScanOptions::for_restore(Some(nonce));
    match SnapshotInventory::scan(dir, &options) {
        Ok(inventory) => match inventory.get(nonce) {
            Some(snapshot) => Some(snapshot.clone()),
            None => {
                eprintln!("(error) no snapshot {} in {}", nonce, dir.display());
                None
            }
        },
        Err(e) => {
            eprintln!("(error) cannot scan {}: {}", dir.display(), e);
            None
        }
    }
}

fn run_compare(left: (&Path, &str), right: Option<(&Path, &str)>, mode: OutputMode) -> i32 {
    let Some(left) = load_snapshot(left.0, left.1) else {
        return 1;
    };
    let report = match right {
        Some((dir, nonce)) => match load_snapshot(dir, nonce) {
            Some(right) => compare_snapshots(&left, &right),
            None => return 1,
        },
        None => compare_replicas(&left),
    };
    println!("{}", format_comparison(&report, mode));
    if report.matches() {
        0
    } else {
        1
    }
}

fn run_init_config(path: &Path) -> i32 {
    match SnapshotConfig::write_default_if_missing(path) {
        Ok(()) => {
            println!("Config at {}", path.display());
            0
        }
        Err(e) => {
            eprintln!("(error) {}", e);
            1
        }
    }
}
