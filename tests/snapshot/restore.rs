//! Restore coordinator: round trip, repartitioning, duplicates, schema
//! evolution, missing and corrupted data

use crate::common::*;
use strata_snapshot::{RESTORE_RESULT_COLUMNS, SNAPSHOT_CORRUPTED, SNAPSHOT_VALID};

#[test]
fn round_trip_reproduces_rows() {
    let tc = TestCluster::single();
    load_table(&tc.cluster, REPLICATED_TESTER, 0, 1000);
    load_table(&tc.cluster, PARTITION_TESTER, 0, 126);
    let replicated = sorted_rows(&tc.cluster, REPLICATED_TESTER);
    let partitioned = sorted_rows(&tc.cluster, PARTITION_TESTER);
    let per_partition = tc.cluster.partition_row_counts(PARTITION_TESTER).unwrap();
    assert_all_success(&tc.save("N"));

    tc.restart(1, 2, 0);
    assert_eq!(tc.cluster.row_count(PARTITION_TESTER).unwrap(), 0);

    let response = tc.restore("N");
    assert_all_success(&response);
    let results = first_table(&response);
    assert_eq!(results.column_count(), RESTORE_RESULT_COLUMNS.len());
    // One row per site per table
    assert_eq!(results.row_count(), 4);
    for row in rows_where(results, "TABLE", REPLICATED_TESTER) {
        assert_eq!(row[4], Value::Integer(-1));
    }

    assert_eq!(tc.cluster.row_count(REPLICATED_TESTER).unwrap(), 1000);
    assert_eq!(tc.cluster.row_count(PARTITION_TESTER).unwrap(), 126);
    assert_eq!(sorted_rows(&tc.cluster, REPLICATED_TESTER), replicated);
    assert_eq!(sorted_rows(&tc.cluster, PARTITION_TESTER), partitioned);
    assert_eq!(
        tc.cluster.partition_row_counts(PARTITION_TESTER).unwrap(),
        per_partition
    );
}

#[test]
fn restore_into_more_partitions() {
    let tc = TestCluster::new(1, 2, 0);
    load_table(&tc.cluster, PARTITION_TESTER, 0, 126);
    assert_all_success(&tc.save("N"));

    tc.restart(2, 3, 0);
    assert_eq!(tc.cluster.partition_count(), 6);
    assert_all_success(&tc.restore("N"));

    assert_eq!(tc.cluster.row_count(PARTITION_TESTER).unwrap(), 126);
    let counts = tc.cluster.partition_row_counts(PARTITION_TESTER).unwrap();
    assert_eq!(counts.len(), 6);
    assert!(counts.iter().filter(|c| **c > 0).count() > 2);
}

#[test]
fn restore_into_fewer_partitions() {
    let tc = TestCluster::new(3, 2, 0);
    load_table(&tc.cluster, PARTITION_TESTER, 0, 126);
    load_table(&tc.cluster, REPLICATED_TESTER, 0, 50);
    assert_all_success(&tc.save("N"));

    tc.restart(1, 1, 0);
    assert_all_success(&tc.restore("N"));
    assert_eq!(tc.cluster.row_count(PARTITION_TESTER).unwrap(), 126);
    assert_eq!(tc.cluster.row_count(REPLICATED_TESTER).unwrap(), 50);
}

#[test]
fn forced_rehash_keeps_rows_on_their_partitions() {
    let tc = TestCluster::new(1, 4, 0);
    load_table(&tc.cluster, PARTITION_TESTER, 0, 80);
    let before = tc.cluster.partition_row_counts(PARTITION_TESTER).unwrap();
    assert_all_success(&tc.save("N"));

    tc.restart(1, 4, 0);
    let request = RestoreRequest::new(tc.snapshot_dir(), Some("N")).with_hashinator(true);
    assert_all_success(&tc.cluster.snapshot_restore_request(request).unwrap());
    assert_eq!(tc.cluster.partition_row_counts(PARTITION_TESTER).unwrap(), before);
}

#[test]
fn duplicate_restore_diverts_rows_to_side_file() {
    let tc = TestCluster::single();
    load_table(&tc.cluster, PARTITION_TESTER, 0, 100);
    load_table(&tc.cluster, REPLICATED_TESTER, 0, 100);
    assert_all_success(&tc.save("N"));

    let dup_dir = tc.dir.path().join("dups");
    let request = RestoreRequest::new(tc.snapshot_dir(), Some("N")).with_duplicates_path(&dup_dir);
    assert_all_success(&tc.cluster.snapshot_restore_request(request).unwrap());

    assert_eq!(tc.cluster.row_count(PARTITION_TESTER).unwrap(), 100);
    assert_eq!(tc.cluster.row_count(REPLICATED_TESTER).unwrap(), 100);
    let side = dup_dir.join("N-PARTITION_TESTER-duplicates.csv");
    assert!(file_size(&side) > 1000, "side file size {}", file_size(&side));
    let text = std::fs::read_to_string(&side).unwrap();
    assert_eq!(text.lines().count(), 100);
}

#[test]
fn restore_into_empty_tables_writes_no_side_file() {
    let tc = TestCluster::single();
    load_table(&tc.cluster, PARTITION_TESTER, 0, 100);
    assert_all_success(&tc.save("N"));
    tc.restart(1, 2, 0);
    assert_all_success(&tc.restore("N"));
    assert!(!tc
        .snapshot_dir()
        .join("N-PARTITION_TESTER-duplicates.csv")
        .exists());
}

#[test]
fn missing_partition_file_fails_only_that_table() {
    let tc = TestCluster::new(2, 1, 0);
    load_table(&tc.cluster, PARTITION_TESTER, 0, 50);
    load_table(&tc.cluster, REPLICATED_TESTER, 0, 50);
    assert_all_success(&tc.save("N"));
    std::fs::remove_file(tc.table_file("N", PARTITION_TESTER, 1)).unwrap();

    tc.restart(2, 1, 0);
    let response = tc.restore("N");
    assert_eq!(response.status, ResponseStatus::OperationalFailure);
    let results = first_table(&response);
    for row in rows_where(results, "TABLE", PARTITION_TESTER) {
        assert_eq!(row[5], Value::from(FAILURE));
        assert_eq!(
            row[6],
            Value::from("Save data contains no information for table PARTITION_TESTER")
        );
    }
    assert_eq!(tc.cluster.row_count(PARTITION_TESTER).unwrap(), 0);
    assert_eq!(tc.cluster.row_count(REPLICATED_TESTER).unwrap(), 50);
}

#[test]
fn corrupted_table_file_is_detected_by_verify_and_restore() {
    let tc = TestCluster::single();
    load_table(&tc.cluster, PARTITION_TESTER, 0, 200);
    load_table(&tc.cluster, REPLICATED_TESTER, 0, 200);
    assert_all_success(&tc.save("N"));

    let reports = strata_snapshot::verify_snapshots(&[tc.snapshot_dir()], &["N".to_string()]);
    assert!(reports[0].text.starts_with(SNAPSHOT_VALID));

    flip_data_byte(&tc.table_file("N", PARTITION_TESTER, 0));
    let reports = strata_snapshot::verify_snapshots(&[tc.snapshot_dir()], &["N".to_string()]);
    assert!(reports[0].text.starts_with(SNAPSHOT_CORRUPTED));

    tc.restart(1, 2, 0);
    let response = tc.restore("N");
    assert_eq!(response.status, ResponseStatus::OperationalFailure);
    let failed = rows_where(first_table(&response), "RESULT", FAILURE);
    assert!(!failed.is_empty());
    assert!(failed.iter().all(|r| r[3] == Value::from(PARTITION_TESTER)));
    assert_eq!(tc.cluster.row_count(PARTITION_TESTER).unwrap(), 0);
    assert_eq!(tc.cluster.row_count(REPLICATED_TESTER).unwrap(), 200);
}

#[test]
fn corrupted_digest_is_an_operational_failure() {
    let tc = TestCluster::single();
    load_table(&tc.cluster, PARTITION_TESTER, 0, 10);
    assert_all_success(&tc.save("N"));
    flip_byte(&tc.digest_file("N", 0), 12);

    let response = tc.restore("N");
    assert_eq!(response.status, ResponseStatus::OperationalFailure);
    let row = first_table(&response).row(0).unwrap();
    assert_eq!(row.get_str("RESULT"), Some(FAILURE));
    assert!(row.get_str("ERR_MSG").unwrap().contains("CRC"));
}

#[test]
fn unknown_nonce_reports_missing_digests() {
    let tc = TestCluster::new(2, 1, 0);
    assert_all_success(&tc.save("N"));

    match tc
        .cluster
        .snapshot_restore_request(RestoreRequest::new(tc.snapshot_dir(), Some("OTHER")))
    {
        Err(SnapshotError::NoDigestsFound { nonce, diagnostics }) => {
            assert_eq!(nonce, "OTHER");
            assert_eq!(diagnostics.row_count(), 2);
            assert!(diagnostics.rows().all(|r| r.get_str("RESULT") == Some(FAILURE)));
        }
        other => panic!("expected NoDigestsFound, got {:?}", other),
    }
}

#[test]
fn schema_changes_are_applied_on_restore() {
    let tc = TestCluster::single();
    tc.cluster
        .create_table(TableSchema::replicated(
            "EVOLVE",
            vec![
                ColumnDef::new("ID", ColumnType::Integer),
                ColumnDef::new("WIDE", ColumnType::BigInt),
                ColumnDef::new("GONE", ColumnType::Varchar),
            ],
        ))
        .unwrap();
    tc.cluster
        .create_table(TableSchema::replicated(
            "OVERFLOW",
            vec![ColumnDef::new("V", ColumnType::BigInt)],
        ))
        .unwrap();
    for i in 0..10 {
        tc.cluster
            .insert(
                "EVOLVE",
                vec![Value::Integer(i), Value::BigInt(i as i64 * 1000), Value::from("x")],
            )
            .unwrap();
    }
    tc.cluster
        .insert("OVERFLOW", vec![Value::BigInt(i64::from(i32::MAX) + 1)])
        .unwrap();
    load_table(&tc.cluster, PARTITION_TESTER, 0, 10);
    assert_all_success(&tc.save("N"));

    tc.restart(1, 2, 0);
    tc.cluster
        .create_table(TableSchema::replicated(
            "EVOLVE",
            vec![
                ColumnDef::new("ID", ColumnType::Integer),
                ColumnDef::new("WIDE", ColumnType::Integer),
                ColumnDef::new("ADDED", ColumnType::Varchar).with_default(Value::from("dflt")),
            ],
        ))
        .unwrap();
    tc.cluster
        .create_table(TableSchema::replicated(
            "OVERFLOW",
            vec![ColumnDef::new("V", ColumnType::Integer)],
        ))
        .unwrap();

    let response = tc.restore("N");
    let results = first_table(&response);
    for row in rows_where(results, "TABLE", "OVERFLOW") {
        assert_eq!(row[5], Value::from(FAILURE));
        let msg = row[6].as_str().unwrap();
        assert!(msg.contains("out of range"), "{}", msg);
    }
    for table in ["EVOLVE", PARTITION_TESTER] {
        for row in rows_where(results, "TABLE", table) {
            assert_eq!(row[5], Value::from(SUCCESS));
        }
    }

    assert_eq!(tc.cluster.row_count("OVERFLOW").unwrap(), 0);
    assert_eq!(tc.cluster.row_count(PARTITION_TESTER).unwrap(), 10);
    let rows = sorted_rows(&tc.cluster, "EVOLVE");
    assert_eq!(rows.len(), 10);
    assert_eq!(
        rows[3],
        vec![Value::Integer(3), Value::Integer(3000), Value::from("dflt")]
    );
}

#[test]
fn saved_tables_missing_from_the_catalog_are_skipped() {
    let tc = TestCluster::single();
    load_table(&tc.cluster, PARTITION_TESTER, 0, 10);
    assert_all_success(&tc.save("N"));

    tc.cluster.restart(config(1, 2, 0)).unwrap();
    tc.cluster.create_table(partition_tester()).unwrap();
    let response = tc.restore("N");
    assert_all_success(&response);
    assert!(rows_where(first_table(&response), "TABLE", REPLICATED_TESTER).is_empty());
    assert_eq!(tc.cluster.row_count(PARTITION_TESTER).unwrap(), 10);
}

#[test]
fn restore_status_entries_are_recorded() {
    let tc = TestCluster::new(2, 1, 0);
    load_table(&tc.cluster, PARTITION_TESTER, 0, 10);
    assert_all_success(&tc.save("N"));
    tc.restart(2, 1, 0);
    assert_all_success(&tc.restore("N"));

    let status = tc.cluster.snapshot_status();
    let restores = rows_where(&status, "TYPE", "RESTORE");
    // Two tables, one file per host each
    assert_eq!(restores.len(), 4);
}
