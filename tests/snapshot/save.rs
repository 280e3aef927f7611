//! Save coordinator: files written, conflicts, filters, formats, faults

use crate::common::*;
use strata_snapshot::{
    SaveFormat, FILE_ALREADY_EXISTS, FILE_LOCATION_UNWRITABLE, SAVE_RESULT_COLUMNS,
};
use strata_durability::{read_digest, TableFileReader, TextFormat};

#[test]
fn save_writes_table_files_and_one_digest_per_host() {
    let tc = TestCluster::new(2, 2, 0);
    load_table(&tc.cluster, REPLICATED_TESTER, 0, 10);
    load_table(&tc.cluster, PARTITION_TESTER, 0, 40);

    let response = tc.save("N");
    assert_all_success(&response);
    let results = first_table(&response);
    assert_eq!(results.column_count(), SAVE_RESULT_COLUMNS.len());
    assert_eq!(results.row_count(), 4);

    for host in 0..2 {
        assert!(tc.digest_file("N", host).exists());
        for table in [PARTITION_TESTER, REPLICATED_TESTER] {
            let path = tc.table_file("N", table, host);
            let reader = TableFileReader::open(&path).unwrap();
            assert!(reader.completed());
            assert_eq!(reader.header().host_id, host);
        }
    }

    // Each host holds its own partitions of the partitioned table
    let rows: usize = (0..2)
        .map(|h| {
            TableFileReader::open(tc.table_file("N", PARTITION_TESTER, h))
                .unwrap()
                .read_chunks()
                .unwrap()
                .row_count()
        })
        .sum();
    assert_eq!(rows, 40);
}

#[test]
fn digests_agree_across_hosts() {
    let tc = TestCluster::new(3, 2, 0);
    load_table(&tc.cluster, PARTITION_TESTER, 0, 30);
    assert_all_success(&tc.save("N"));

    let digests: Vec<_> = (0..3)
        .map(|h| read_digest(&tc.digest_file("N", h)).unwrap())
        .collect();
    let sizes: Vec<u64> = (0..3).map(|h| file_size(&tc.digest_file("N", h))).collect();
    assert!(sizes.windows(2).all(|w| w[0] == w[1]), "sizes {:?}", sizes);

    for d in &digests {
        assert_eq!(d.partition_count, 6);
        assert_eq!(d.partition_transaction_ids.len(), 7);
        assert!(d.partition_transaction_ids.contains_key(&strata_snapshot::MP_INIT_PID));
        assert!(d.complete);
        assert_eq!(d.txn_id, digests[0].txn_id);
        assert_eq!(d.tables, vec![PARTITION_TESTER, REPLICATED_TESTER]);
    }
}

#[test]
fn same_nonce_twice_fails_every_row() {
    let tc = TestCluster::new(2, 1, 0);
    load_table(&tc.cluster, PARTITION_TESTER, 0, 5);
    assert_all_success(&tc.save("N"));

    let second = tc.save("N");
    assert_eq!(second.status, ResponseStatus::OperationalFailure);
    let results = first_table(&second);
    assert_eq!(results.row_count(), 4);
    for row in results.rows() {
        assert_eq!(row.get_str("RESULT"), Some(FAILURE));
        assert_eq!(row.get_str("ERR_MSG"), Some(FILE_ALREADY_EXISTS));
    }
}

#[test]
fn unknown_tables_are_listed_in_one_message() {
    let tc = TestCluster::single();
    let request = SaveRequest::new(tc.snapshot_dir(), "N").with_tables(&[
        PARTITION_TESTER,
        "NOPE",
        "also_nope",
    ]);
    let response = tc.cluster.snapshot_save_request(request).unwrap();

    assert_eq!(response.status, ResponseStatus::OperationalFailure);
    let row = first_table(&response).row(0).unwrap();
    let msg = row.get_str("ERR_MSG").unwrap();
    assert!(msg.contains("NOPE"), "{}", msg);
    assert!(msg.contains("ALSO_NOPE"), "{}", msg);
    assert!(!tc.digest_file("N", 0).exists());
}

#[test]
fn table_filters_limit_the_saved_tables() {
    let tc = TestCluster::single();
    let request =
        SaveRequest::new(tc.snapshot_dir(), "N").with_skip_tables(&[REPLICATED_TESTER]);
    assert_all_success(&tc.cluster.snapshot_save_request(request).unwrap());

    assert!(tc.table_file("N", PARTITION_TESTER, 0).exists());
    assert!(!tc.table_file("N", REPLICATED_TESTER, 0).exists());
    let digest = read_digest(&tc.digest_file("N", 0)).unwrap();
    assert_eq!(digest.tables, vec![PARTITION_TESTER]);
}

#[test]
fn json_and_positional_requests() {
    let tc = TestCluster::single();
    let json = format!(
        r#"{{"uripath":"file://{}","nonce":"J","tables":["partition_tester"],"block":true}}"#,
        tc.snapshot_path()
    );
    assert_all_success(&tc.cluster.snapshot_save(&json).unwrap());
    assert!(tc.table_file("J", PARTITION_TESTER, 0).exists());

    let response = tc
        .cluster
        .snapshot_save_positional(&tc.snapshot_path(), "P", 1)
        .unwrap();
    assert_all_success(&response);
    assert!(tc.digest_file("P", 0).exists());
}

#[test]
fn bad_parameters_are_rejected_before_io() {
    let tc = TestCluster::single();
    let err = tc
        .cluster
        .snapshot_save_positional(&tc.snapshot_path(), "bad,nonce", 1)
        .unwrap_err();
    assert!(matches!(err, SnapshotError::InvalidParameter(_)));

    let err = tc
        .cluster
        .snapshot_save(r#"{"uripath":"http://example.com/snap","nonce":"N"}"#)
        .unwrap_err();
    assert!(matches!(err, SnapshotError::UnsupportedScheme(_)));

    let err = tc.cluster.snapshot_save("not json").unwrap_err();
    assert!(matches!(err, SnapshotError::InvalidParameter(_)));
    assert!(!tc.snapshot_dir().exists());
}

#[test]
fn unwritable_location_is_reported() {
    let tc = TestCluster::single();
    let blocker = tc.dir.path().join("file");
    std::fs::write(&blocker, b"x").unwrap();
    let response = tc
        .cluster
        .snapshot_save_request(SaveRequest::new(blocker.join("below"), "N"))
        .unwrap();
    assert_eq!(response.status, ResponseStatus::OperationalFailure);
    for row in first_table(&response).rows() {
        assert!(row
            .get_str("ERR_MSG")
            .unwrap()
            .starts_with(FILE_LOCATION_UNWRITABLE));
    }
}

#[test]
fn csv_export_writes_one_file_per_table() {
    let tc = TestCluster::single();
    load_table(&tc.cluster, PARTITION_TESTER, 0, 25);
    let request =
        SaveRequest::new(tc.snapshot_dir(), "CSV").with_format(SaveFormat::Text(TextFormat::Csv));
    assert_all_success(&tc.cluster.snapshot_save_request(request).unwrap());

    let text = std::fs::read_to_string(tc.snapshot_dir().join("CSV-PARTITION_TESTER.csv")).unwrap();
    assert_eq!(text.lines().count(), 25);
    assert!(tc.snapshot_dir().join("CSV-REPLICATED_TESTER.csv").exists());
    assert!(!tc.digest_file("CSV", 0).exists());
}

#[test]
fn injected_write_fault_fails_rows_and_status() {
    let tc = TestCluster::single();
    load_table(&tc.cluster, PARTITION_TESTER, 0, 20);
    load_table(&tc.cluster, REPLICATED_TESTER, 0, 20);
    tc.cluster.inject_write_fault("partition_tester");

    let response = tc.save("F");
    assert_eq!(response.status, ResponseStatus::OperationalFailure);
    let results = first_table(&response);
    let failed = rows_where(results, "RESULT", FAILURE);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0][2], Value::from(PARTITION_TESTER));

    let status = tc.cluster.snapshot_status();
    let mut saw_failure = false;
    for row in status.rows() {
        assert_eq!(row.get_str("NONCE"), Some("F"));
        assert_eq!(row.get_str("TYPE"), Some("MANUAL"));
        if row.get_str("TABLE") == Some(PARTITION_TESTER) {
            assert_eq!(row.get_str("RESULT"), Some(FAILURE));
            saw_failure = true;
        } else {
            assert_eq!(row.get_str("RESULT"), Some(SUCCESS));
        }
    }
    assert!(saw_failure);

    let partial = TableFileReader::open(tc.table_file("F", PARTITION_TESTER, 0)).unwrap();
    assert!(!partial.completed());
    assert!(!read_digest(&tc.digest_file("F", 0)).unwrap().complete);

    tc.cluster.clear_write_faults();
    assert_all_success(&tc.save("G"));
}
