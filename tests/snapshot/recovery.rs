//! Transaction id policy, terminal snapshots and latest-snapshot selection

use crate::common::*;
use strata_durability::read_digest;
use strata_snapshot::MP_INIT_PID;

/// Nonce of the snapshot the last restore read, from the status log
fn restored_nonce(tc: &TestCluster) -> String {
    let status = tc.cluster.snapshot_status();
    let nonces: Vec<String> = status
        .rows()
        .filter(|r| r.get_str("TYPE") == Some("RESTORE"))
        .filter_map(|r| r.get_str("NONCE").map(str::to_string))
        .collect();
    assert!(!nonces.is_empty(), "no restore recorded");
    nonces[nonces.len() - 1].clone()
}

#[test]
fn plain_restore_resets_transaction_ids() {
    let tc = TestCluster::single();
    load_table(&tc.cluster, PARTITION_TESTER, 0, 50);
    assert_all_success(&tc.save("N"));
    assert!(tc.cluster.last_txn_ids()[&0].sequence() > 1);

    assert_all_success(&tc.restore("N"));
    for pid in 0..tc.cluster.partition_count() {
        assert_eq!(tc.cluster.next_txn_id(pid).unwrap().sequence(), 1);
    }
    assert_eq!(tc.cluster.next_txn_id(MP_INIT_PID).unwrap().sequence(), 1);
}

#[test]
fn recover_restores_saved_transaction_ids() {
    let tc = TestCluster::new(2, 2, 0);
    load_table(&tc.cluster, PARTITION_TESTER, 0, 100);
    load_table(&tc.cluster, REPLICATED_TESTER, 0, 7);
    assert_all_success(&tc.save("N"));
    let saved = read_digest(&tc.digest_file("N", 0))
        .unwrap()
        .partition_transaction_ids;

    tc.restart(2, 2, 0);
    let request = RestoreRequest::new(tc.snapshot_dir(), Some("N")).recover();
    assert_all_success(&tc.cluster.snapshot_restore_request(request).unwrap());

    assert_eq!(tc.cluster.last_txn_ids(), saved);
    let next = tc.cluster.next_txn_id(1).unwrap();
    assert!(next > saved[&1]);
    assert_eq!(next.partition_id(), 1);
}

#[test]
fn recover_requires_the_saved_partition_count() {
    let tc = TestCluster::new(1, 2, 0);
    load_table(&tc.cluster, PARTITION_TESTER, 0, 10);
    assert_all_success(&tc.save("N"));

    tc.restart(1, 3, 0);
    let request = RestoreRequest::new(tc.snapshot_dir(), Some("N")).recover();
    let err = tc.cluster.snapshot_restore_request(request).unwrap_err();
    assert!(matches!(err, SnapshotError::InvalidParameter(_)));
    assert_eq!(tc.cluster.row_count(PARTITION_TESTER).unwrap(), 0);
}

fn enable_terminal_snapshots(tc: &TestCluster) {
    tc.cluster
        .restart(config(1, 2, 0).with_terminal_snapshot_path(tc.snapshot_dir()))
        .unwrap();
    create_tester_tables(&tc.cluster);
}

fn terminal_nonce(tc: &TestCluster) -> String {
    let response = tc
        .cluster
        .shutdown()
        .unwrap()
        .expect("terminal snapshot configured");
    assert_all_success(&response);
    let entries = std::fs::read_dir(tc.snapshot_dir()).unwrap();
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .find_map(|name| {
            name.strip_suffix("-host_0.digest")
                .filter(|n| n.starts_with("SHUTDOWN_"))
                .map(str::to_string)
        })
        .expect("terminal digest written")
}

#[test]
fn shutdown_writes_a_terminal_snapshot() {
    let tc = TestCluster::single();
    enable_terminal_snapshots(&tc);
    load_table(&tc.cluster, PARTITION_TESTER, 0, 10);

    let nonce = terminal_nonce(&tc);
    let digest = read_digest(&tc.digest_file(&nonce, 0)).unwrap();
    assert!(digest.terminal);
    assert!(digest.complete);
}

#[test]
fn newer_regular_snapshot_wins_over_terminal() {
    let tc = TestCluster::single();
    enable_terminal_snapshots(&tc);
    load_table(&tc.cluster, PARTITION_TESTER, 0, 10);
    terminal_nonce(&tc);

    load_table(&tc.cluster, PARTITION_TESTER, 10, 10);
    assert_all_success(&tc.save("LATER"));

    tc.restart(1, 2, 0);
    assert_all_success(&tc.restore_latest());
    assert_eq!(restored_nonce(&tc), "LATER");
    assert_eq!(tc.cluster.row_count(PARTITION_TESTER).unwrap(), 20);
}

#[test]
fn newer_terminal_snapshot_wins_over_regular() {
    let tc = TestCluster::single();
    enable_terminal_snapshots(&tc);
    load_table(&tc.cluster, PARTITION_TESTER, 0, 10);
    assert_all_success(&tc.save("EARLIER"));
    load_table(&tc.cluster, PARTITION_TESTER, 10, 5);
    let terminal = terminal_nonce(&tc);

    tc.restart(1, 2, 0);
    assert_all_success(&tc.restore_latest());
    assert_eq!(restored_nonce(&tc), terminal);
    assert_eq!(tc.cluster.row_count(PARTITION_TESTER).unwrap(), 15);
}

#[test]
fn latest_snapshot_needs_a_majority_of_complete_hosts() {
    let tc = TestCluster::new(3, 2, 1);
    assert_eq!(tc.cluster.partition_count(), 3);
    load_table(&tc.cluster, PARTITION_TESTER, 0, 30);
    assert_all_success(&tc.save("A"));
    load_table(&tc.cluster, PARTITION_TESTER, 30, 30);
    assert_all_success(&tc.save("B"));

    // Two of three complete hosts still make B the latest
    std::fs::remove_file(tc.digest_file("B", 2)).unwrap();
    tc.restart(3, 2, 1);
    assert_all_success(&tc.restore_latest());
    assert_eq!(restored_nonce(&tc), "B");
    assert_eq!(tc.cluster.row_count(PARTITION_TESTER).unwrap(), 60);

    // One of three does not
    std::fs::remove_file(tc.digest_file("B", 1)).unwrap();
    tc.restart(3, 2, 1);
    assert_all_success(&tc.restore_latest());
    assert_eq!(restored_nonce(&tc), "A");
    assert_eq!(tc.cluster.row_count(PARTITION_TESTER).unwrap(), 30);
}

#[test]
fn empty_directory_has_no_viable_snapshot() {
    let tc = TestCluster::single();
    std::fs::create_dir_all(tc.snapshot_dir()).unwrap();
    let err = tc
        .cluster
        .snapshot_restore_request(RestoreRequest::new(tc.snapshot_dir(), None))
        .unwrap_err();
    assert!(matches!(err, SnapshotError::NoViableSnapshot(_)));
}
