#![allow(dead_code)]

use rust_decimal::Decimal;
use split_ledger::application::ledger::Ledger;
use split_ledger::config::LedgerConfig;
use split_ledger::domain::group::{GroupId, MemberId};
use split_ledger::infrastructure::in_memory::InMemoryLedgerStore;
use std::io::Error;
use std::path::Path;

pub const JOURNAL_HEADER: [&str; 7] = [
    "command", "group", "member", "payment", "amount", "payees", "text",
];

pub fn in_memory_ledger() -> Ledger {
    Ledger::new(Box::new(InMemoryLedgerStore::new()), LedgerConfig::default())
}

/// Creates a group with one member per name, returning ids in creation order.
pub async fn seed_group(ledger: &Ledger, names: &[&str]) -> (GroupId, Vec<MemberId>) {
    let group = ledger.create_group("Trip").await.unwrap();
    let mut members = Vec::with_capacity(names.len());
    for name in names {
        members.push(ledger.add_member(group.id, name).await.unwrap().id);
    }
    (group.id, members)
}

pub async fn balance_sum(ledger: &Ledger, group: GroupId) -> Decimal {
    ledger
        .members(group)
        .await
        .unwrap()
        .iter()
        .map(|m| m.balance.value())
        .sum()
}

pub fn write_journal(path: &Path, rows: &[[&str; 7]]) -> Result<(), Error> {
    let mut wtr = csv::WriterBuilder::new().from_path(path)?;
    wtr.write_record(JOURNAL_HEADER)?;
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(())
}
