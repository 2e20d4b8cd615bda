use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use split_ledger::application::ledger::Ledger;
use split_ledger::config::LedgerConfig;
use split_ledger::domain::ports::{LedgerStore, LedgerTransaction};
use split_ledger::domain::payment::PaymentRequest;
use split_ledger::error::LedgerError;
use split_ledger::infrastructure::in_memory::InMemoryLedgerStore;
use std::sync::Arc;
use std::time::Duration;

mod common;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_payments_on_one_group() {
    let ledger = Arc::new(common::in_memory_ledger());
    let (group, members) = common::seed_group(&ledger, &["A", "B", "C"]).await;

    let mut handles = Vec::new();
    for i in 0..50 {
        let ledger = ledger.clone();
        let members = members.clone();
        handles.push(tokio::spawn(async move {
            let payer = members[i % members.len()];
            ledger
                .add_payment(group, PaymentRequest::new(payer, members, dec!(10)))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(ledger.payments(group).await.unwrap().len(), 50);
    assert_eq!(common::balance_sum(&ledger, group).await, Decimal::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_groups_are_independent() {
    let ledger = Arc::new(common::in_memory_ledger());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            let (group, m) = common::seed_group(&ledger, &["A", "B"]).await;
            for _ in 0..20 {
                ledger
                    .add_payment(group, PaymentRequest::new(m[0], vec![m[1]], dec!(2.5)))
                    .await
                    .unwrap();
            }
            group
        }));
    }

    for handle in handles {
        let group = handle.await.unwrap();
        let members = ledger.members(group).await.unwrap();
        assert_eq!(members[0].balance.value(), dec!(-50));
        assert_eq!(members[1].balance.value(), dec!(50));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lock_wait_counts_against_deadline() {
    let store = InMemoryLedgerStore::new();
    let ledger = Ledger::new(
        Box::new(store.clone()),
        LedgerConfig::default().with_deadline(Duration::from_millis(50)),
    );
    let (group, m) = common::seed_group(&ledger, &["A", "B"]).await;

    // An open writer holds the group for longer than the ledger's deadline.
    let mut blocker = store.begin().await.unwrap();
    blocker.lock_group(group).await.unwrap();

    let err = ledger
        .add_payment(group, PaymentRequest::new(m[0], vec![m[1]], dec!(5)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::DeadlineExceeded {
            operation: "add_payment",
            ..
        }
    ));

    // Reads never wait for the lock.
    assert_eq!(ledger.members(group).await.unwrap().len(), 2);

    blocker.rollback().await.unwrap();
    ledger
        .add_payment(group, PaymentRequest::new(m[0], vec![m[1]], dec!(5)))
        .await
        .unwrap();
    assert_eq!(ledger.payments(group).await.unwrap().len(), 1);
}
