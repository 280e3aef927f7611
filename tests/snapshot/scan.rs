//! Scan and delete

use crate::common::*;
use strata_snapshot::{
    SCAN_DIGEST_COLUMNS, SCAN_DISK_SPACE_COLUMNS, SCAN_FILE_COLUMNS, SCAN_SUMMARY_COLUMNS,
};

#[test]
fn scan_without_a_path_fails_gracefully() {
    let tc = TestCluster::single();
    for path in [None, Some(""), Some("  ")] {
        let response = tc.cluster.snapshot_scan(path).unwrap();
        assert_eq!(response.status, ResponseStatus::GracefulFailure);
        let row = first_table(&response).row(0).unwrap();
        assert_eq!(
            row.get_str("ERR_MSG"),
            Some("Provided path was null or the empty string")
        );
    }
}

#[test]
fn scan_of_missing_path_reports_each_host() {
    let tc = TestCluster::new(2, 1, 0);
    let missing = tc.dir.path().join("missing").display().to_string();
    let response = tc.cluster.snapshot_scan(Some(&missing)).unwrap();

    assert_eq!(response.results.len(), 4);
    assert!(response.first().unwrap().is_empty());
    for index in [1, 2, 3] {
        let table = response.table(index).unwrap();
        assert_eq!(table.row_count(), 2);
        for row in table.rows() {
            assert_eq!(row.get_str("RESULT"), Some(FAILURE));
            assert!(row.get_str("ERR_MSG").unwrap().contains("does not exist"));
        }
    }
}

#[test]
fn scan_lists_snapshots_and_completeness() {
    let tc = TestCluster::new(2, 1, 0);
    load_table(&tc.cluster, PARTITION_TESTER, 0, 20);
    assert_all_success(&tc.save("B"));
    assert_all_success(&tc.save("A"));

    let response = tc.cluster.snapshot_scan(Some(&tc.snapshot_path())).unwrap();
    let summary = response.table(0).unwrap();
    let files = response.table(1).unwrap();
    let digests = response.table(2).unwrap();
    assert_eq!(summary.column_count(), SCAN_SUMMARY_COLUMNS.len());
    assert_eq!(files.column_count(), SCAN_FILE_COLUMNS.len());
    assert_eq!(digests.column_count(), SCAN_DIGEST_COLUMNS.len());

    let nonces: Vec<&str> = summary.rows().filter_map(|r| r.get_str("NONCE")).collect();
    assert_eq!(nonces, vec!["A", "B"]);
    for row in summary.rows() {
        assert_eq!(row.get_str("COMPLETE"), Some("TRUE"));
        assert_eq!(row.get_str("TERMINAL"), Some("FALSE"));
        assert_eq!(
            row.get_str("TABLES_REQUIRED"),
            Some("PARTITION_TESTER,REPLICATED_TESTER")
        );
        assert_eq!(row.get_str("TABLES_MISSING"), Some(""));
    }
    // Two snapshots, two tables, two hosts
    assert_eq!(files.row_count(), 8);
    assert_eq!(digests.row_count(), 4);
    assert!(files.rows().all(|r| r.get_str("COMPLETED") == Some("TRUE")));
}

#[test]
fn scan_reports_disk_space_per_host() {
    let tc = TestCluster::new(2, 1, 0);
    load_table(&tc.cluster, PARTITION_TESTER, 0, 20);
    assert_all_success(&tc.save("N"));

    let response = tc.cluster.snapshot_scan(Some(&tc.snapshot_path())).unwrap();
    let summary_size = response.table(0).unwrap().row(0).unwrap().get_i64("SIZE").unwrap();
    let disk = response.table(3).unwrap();
    assert_eq!(disk.column_count(), SCAN_DISK_SPACE_COLUMNS.len());
    assert_eq!(disk.row_count(), 2);
    for row in disk.rows() {
        assert_eq!(row.get_str("RESULT"), Some(SUCCESS));
        let total = row.get_i64("TOTAL").unwrap();
        let free = row.get_i64("FREE").unwrap();
        assert!(total > 0);
        assert!(free <= total);
        assert_eq!(row.get_i64("USED"), Some(summary_size));
        assert!(summary_size > 0);
    }
}

#[test]
fn scan_reports_missing_table_files() {
    let tc = TestCluster::new(2, 1, 0);
    load_table(&tc.cluster, PARTITION_TESTER, 0, 20);
    assert_all_success(&tc.save("N"));
    std::fs::remove_file(tc.table_file("N", PARTITION_TESTER, 1)).unwrap();

    let response = tc.cluster.snapshot_scan(Some(&tc.snapshot_path())).unwrap();
    let row = response.table(0).unwrap().row(0).unwrap();
    assert_eq!(row.get_str("COMPLETE"), Some("FALSE"));
    assert_eq!(row.get_str("TABLES_MISSING"), Some(PARTITION_TESTER));
}

#[test]
fn scan_finds_snapshots_in_subdirectories() {
    let tc = TestCluster::single();
    let nested = tc.snapshot_dir().join("nested");
    assert_all_success(
        &tc.cluster
            .snapshot_save_request(SaveRequest::new(&nested, "DEEP"))
            .unwrap(),
    );
    let response = tc.cluster.snapshot_scan(Some(&tc.snapshot_path())).unwrap();
    let summary = response.table(0).unwrap();
    assert_eq!(summary.row_count(), 1);
    assert_eq!(summary.row(0).unwrap().get_str("NONCE"), Some("DEEP"));
}

#[test]
fn delete_removes_only_the_named_snapshot() {
    let tc = TestCluster::new(2, 1, 0);
    load_table(&tc.cluster, PARTITION_TESTER, 0, 10);
    assert_all_success(&tc.save("M"));
    assert_all_success(&tc.save("D"));

    let path = tc.snapshot_path();
    let response = tc.cluster.snapshot_delete(&[path.as_str()], &["D"]).unwrap();
    let results = first_table(&response);
    // Two tables and one digest per host
    assert_eq!(results.row_count(), 6);
    assert!(results.rows().all(|r| r.get_str("DELETED") == Some("TRUE")));
    assert!(!tc.digest_file("D", 0).exists());
    assert!(!tc.table_file("D", PARTITION_TESTER, 1).exists());

    let scan = tc.cluster.snapshot_scan(Some(&path)).unwrap();
    let nonces: Vec<&str> = scan
        .table(0)
        .unwrap()
        .rows()
        .filter_map(|r| r.get_str("NONCE"))
        .collect();
    assert_eq!(nonces, vec!["M"]);
}

#[test]
fn delete_requires_paired_arguments() {
    let tc = TestCluster::single();
    let path = tc.snapshot_path();
    let err = tc
        .cluster
        .snapshot_delete(&[path.as_str(), path.as_str()], &["A"])
        .unwrap_err();
    assert!(matches!(err, SnapshotError::InvalidParameter(_)));

    let err = tc
        .cluster
        .snapshot_delete(&[path.as_str()], &["A-B"])
        .unwrap_err();
    assert!(matches!(err, SnapshotError::InvalidParameter(_)));
}
