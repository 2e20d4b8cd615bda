#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use std::process::Command;
use tempfile::tempdir;

mod common;

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // 1. First run: set up a group and record one payment
    let journal1 = dir.path().join("first.csv");
    common::write_journal(
        &journal1,
        &[
            ["group", "", "", "", "", "", "Trip"],
            ["member", "1", "", "", "", "", "Alice"],
            ["member", "1", "", "", "", "", "Bob"],
            ["pay", "1", "1", "", "100", "2", "Hotel"],
        ],
    )
    .unwrap();

    let output1 = Command::new(cargo_bin!("split-ledger"))
        .arg(&journal1)
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output1.status.success());
    let stdout1 = String::from_utf8_lossy(&output1.stdout);
    assert!(stdout1.contains("1,1,2,100"), "{stdout1}");

    // 2. Second run: patch the stored payment and add another one
    let journal2 = dir.path().join("second.csv");
    common::write_journal(
        &journal2,
        &[
            ["patch", "1", "", "1", "40", "", ""],
            ["pay", "1", "2", "", "10", "1", "Taxi"],
        ],
    )
    .unwrap();

    let output2 = Command::new(cargo_bin!("split-ledger"))
        .arg(&journal2)
        .arg("--db-path")
        .arg(&db_path)
        .arg("--balances")
        .output()
        .expect("Failed to execute command");
    assert!(output2.status.success());
    let stdout2 = String::from_utf8_lossy(&output2.stdout);

    // Recovered -100/+100, patched down to -40/+40, then Bob pays 10 for Alice
    assert!(stdout2.contains("1,1,Alice,-30"), "{stdout2}");
    assert!(stdout2.contains("1,2,Bob,30"), "{stdout2}");
}
