use super::staged::{GroupLocks, GroupSlice, IdSequence, SliceBackend, StagedTransaction};
use crate::domain::group::{GroupId, MemberId, PaymentId};
use crate::domain::ports::{LedgerStore, LedgerTransactionBox};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    groups: BTreeMap<GroupId, GroupSlice>,
    member_groups: HashMap<MemberId, GroupId>,
    payment_groups: HashMap<PaymentId, GroupId>,
}

impl Tables {
    fn unindex(&mut self, group_id: GroupId) {
        self.member_groups.retain(|_, g| *g != group_id);
        self.payment_groups.retain(|_, g| *g != group_id);
    }
}

#[derive(Default)]
pub struct InMemoryBackend {
    tables: RwLock<Tables>,
    ids: IdSequence,
}

#[async_trait]
impl SliceBackend for InMemoryBackend {
    async fn load(&self, group_id: GroupId) -> Result<Option<GroupSlice>> {
        let tables = self.tables.read().await;
        Ok(tables.groups.get(&group_id).cloned())
    }

    async fn group_ids(&self) -> Result<Vec<GroupId>> {
        let tables = self.tables.read().await;
        Ok(tables.groups.keys().copied().collect())
    }

    async fn locate_member(&self, member_id: MemberId) -> Result<Option<GroupId>> {
        let tables = self.tables.read().await;
        Ok(tables.member_groups.get(&member_id).copied())
    }

    async fn locate_payment(&self, payment_id: PaymentId) -> Result<Option<GroupId>> {
        let tables = self.tables.read().await;
        Ok(tables.payment_groups.get(&payment_id).copied())
    }

    async fn persist(&self, changes: Vec<(GroupId, Option<GroupSlice>)>) -> Result<()> {
        let mut tables = self.tables.write().await;
        for (group_id, slice) in changes {
            tables.unindex(group_id);
            match slice {
                Some(slice) => {
                    for member_id in slice.members.keys() {
                        tables.member_groups.insert(*member_id, group_id);
                    }
                    for payment_id in slice.payments.keys() {
                        tables.payment_groups.insert(*payment_id, group_id);
                    }
                    tables.groups.insert(group_id, slice);
                }
                None => {
                    tables.groups.remove(&group_id);
                }
            }
        }
        Ok(())
    }

    fn ids(&self) -> &IdSequence {
        &self.ids
    }
}

/// A thread-safe in-memory ledger store.
///
/// Committed rows live behind a `tokio::sync::RwLock`; writers take a per-group
/// lock for the whole transaction, so groups never contend with each other.
/// Ideal for testing or for short-lived replays where persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    backend: Arc<InMemoryBackend>,
    locks: Arc<GroupLocks>,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<LedgerTransactionBox> {
        Ok(Box::new(StagedTransaction::new(
            self.backend.clone(),
            self.locks.clone(),
        )))
    }
}
