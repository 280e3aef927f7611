//! Non-blocking saves and the single-operation gate

use std::sync::Arc;
use std::thread;

use crate::common::*;
use strata_snapshot::{FILE_ALREADY_EXISTS, SNAPSHOT_IN_PROGRESS};

#[test]
fn non_blocking_save_finishes_in_the_background() {
    let tc = TestCluster::new(2, 2, 0);
    load_table(&tc.cluster, PARTITION_TESTER, 0, 2000);
    let request = SaveRequest::new(tc.snapshot_dir(), "BG").with_block(false);
    let response = tc.cluster.snapshot_save_request(request).unwrap();
    assert_all_success(&response);

    tc.cluster.wait_for_snapshots();
    for host in 0..2 {
        assert!(tc.digest_file("BG", host).exists());
        assert!(tc.table_file("BG", PARTITION_TESTER, host).exists());
    }
}

#[test]
fn same_nonce_after_background_save_is_refused() {
    let tc = TestCluster::single();
    load_table(&tc.cluster, PARTITION_TESTER, 0, 5000);
    let request = SaveRequest::new(tc.snapshot_dir(), "X").with_block(false);
    assert_all_success(&tc.cluster.snapshot_save_request(request.clone()).unwrap());

    // Still running or already on disk; either way every row fails
    let second = tc.cluster.snapshot_save_request(request.with_block(true)).unwrap();
    assert_eq!(second.status, ResponseStatus::OperationalFailure);
    for row in first_table(&second).rows() {
        assert_eq!(row.get_str("RESULT"), Some(FAILURE));
        let msg = row.get_str("ERR_MSG").unwrap();
        assert!(msg == SNAPSHOT_IN_PROGRESS || msg == FILE_ALREADY_EXISTS, "{}", msg);
    }
    tc.cluster.wait_for_snapshots();
    assert!(tc.digest_file("X", 0).exists());
}

#[test]
fn sequential_saves_from_other_threads_all_run() {
    let tc = Arc::new(TestCluster::single());
    load_table(&tc.cluster, PARTITION_TESTER, 0, 50);

    for i in 0..3 {
        let tc = Arc::clone(&tc);
        let response = thread::spawn(move || tc.save(&format!("S{}", i)))
            .join()
            .unwrap();
        assert_all_success(&response);
    }
    for i in 0..3 {
        assert!(tc.digest_file(&format!("S{}", i), 0).exists());
    }
}

#[test]
fn restore_waits_for_nothing_when_idle() {
    let tc = TestCluster::single();
    load_table(&tc.cluster, PARTITION_TESTER, 0, 10);
    assert_all_success(&tc.save("N"));
    tc.cluster.wait_for_snapshots();
    assert_all_success(&tc.restore("N"));
}
