//! Snapshot save/restore integration suite

#[path = "../common/mod.rs"]
mod common;

mod concurrency;
mod recovery;
mod restore;
mod save;
mod scan;
