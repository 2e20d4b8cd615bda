use crate::domain::group::{Group, GroupId, Member, MemberId, PaymentId};
use crate::domain::money::{Amount, Balance};
use crate::domain::payment::{NewPayment, Patch, Payment};
use crate::domain::ports::LedgerTransaction;
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Every row belonging to one group. The unit a transaction locks and rewrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSlice {
    pub group: Group,
    pub members: BTreeMap<MemberId, Member>,
    pub payments: BTreeMap<PaymentId, Payment>,
}

impl GroupSlice {
    pub fn new(group: Group) -> Self {
        Self {
            group,
            members: BTreeMap::new(),
            payments: BTreeMap::new(),
        }
    }
}

/// Per-group exclusive locks, held for the lifetime of a transaction.
#[derive(Default)]
pub struct GroupLocks {
    locks: Mutex<HashMap<GroupId, Arc<Mutex<()>>>>,
}

impl GroupLocks {
    pub async fn acquire(&self, group_id: GroupId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // A lock only the map refers to has no holder and no waiter.
            locks.retain(|id, lock| *id == group_id || Arc::strong_count(lock) > 1);
            locks.entry(group_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

/// Monotonic id allocation. Ids burnt by rolled-back transactions are not reused.
#[derive(Debug)]
pub struct IdSequence {
    groups: AtomicU64,
    members: AtomicU64,
    payments: AtomicU64,
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::starting_after(0, 0, 0)
    }
}

impl IdSequence {
    pub fn starting_after(groups: u64, members: u64, payments: u64) -> Self {
        Self {
            groups: AtomicU64::new(groups + 1),
            members: AtomicU64::new(members + 1),
            payments: AtomicU64::new(payments + 1),
        }
    }

    pub fn next_group(&self) -> GroupId {
        GroupId(self.groups.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_member(&self) -> MemberId {
        MemberId(self.members.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_payment(&self) -> PaymentId {
        PaymentId(self.payments.fetch_add(1, Ordering::Relaxed))
    }

    /// Highest group, member and payment ids handed out so far (0 when none).
    pub fn high_water(&self) -> (u64, u64, u64) {
        (
            self.groups.load(Ordering::Relaxed) - 1,
            self.members.load(Ordering::Relaxed) - 1,
            self.payments.load(Ordering::Relaxed) - 1,
        )
    }
}

/// Committed storage underneath a [`StagedTransaction`].
///
/// Backends only read and replace whole group slices; locking and row-level
/// semantics live in the transaction.
#[async_trait]
pub trait SliceBackend: Send + Sync + 'static {
    async fn load(&self, group_id: GroupId) -> Result<Option<GroupSlice>>;
    async fn group_ids(&self) -> Result<Vec<GroupId>>;
    async fn locate_member(&self, member_id: MemberId) -> Result<Option<GroupId>>;
    async fn locate_payment(&self, payment_id: PaymentId) -> Result<Option<GroupId>>;
    /// Atomically replaces each listed group (`None` deletes it).
    async fn persist(&self, changes: Vec<(GroupId, Option<GroupSlice>)>) -> Result<()>;
    fn ids(&self) -> &IdSequence;
}

struct Staged {
    _guard: OwnedMutexGuard<()>,
    slice: Option<GroupSlice>,
    dirty: bool,
}

/// A transaction that copies each group it writes to into a private working set.
///
/// The copy is taken under the group's lock, so nobody else can change those rows
/// until commit writes the copies back in one `persist` call.
pub struct StagedTransaction<B: SliceBackend> {
    backend: Arc<B>,
    locks: Arc<GroupLocks>,
    staged: BTreeMap<GroupId, Staged>,
}

impl<B: SliceBackend> StagedTransaction<B> {
    pub fn new(backend: Arc<B>, locks: Arc<GroupLocks>) -> Self {
        Self {
            backend,
            locks,
            staged: BTreeMap::new(),
        }
    }

    async fn locked(&mut self, group_id: GroupId) -> Result<&mut Staged> {
        if !self.staged.contains_key(&group_id) {
            let guard = self.locks.acquire(group_id).await;
            let slice = self.backend.load(group_id).await?;
            self.staged.insert(
                group_id,
                Staged {
                    _guard: guard,
                    slice,
                    dirty: false,
                },
            );
        }
        self.staged
            .get_mut(&group_id)
            .ok_or_else(|| LedgerError::internal("staged group vanished"))
    }

    /// Locked, writable view of a group, or `None` if it does not exist.
    async fn writable(&mut self, group_id: GroupId) -> Result<Option<&mut GroupSlice>> {
        let staged = self.locked(group_id).await?;
        staged.dirty = true;
        Ok(staged.slice.as_mut())
    }

    async fn view(&self, group_id: GroupId) -> Result<Option<GroupSlice>> {
        match self.staged.get(&group_id) {
            Some(staged) => Ok(staged.slice.clone()),
            None => self.backend.load(group_id).await,
        }
    }

    async fn member_group(&self, member_id: MemberId) -> Result<Option<GroupId>> {
        let staged = self.staged.iter().find_map(|(id, staged)| {
            staged
                .slice
                .as_ref()
                .filter(|slice| slice.members.contains_key(&member_id))
                .map(|_| *id)
        });
        match staged {
            Some(group_id) => Ok(Some(group_id)),
            None => self.backend.locate_member(member_id).await,
        }
    }

    async fn payment_group(&self, payment_id: PaymentId) -> Result<Option<GroupId>> {
        let staged = self.staged.iter().find_map(|(id, staged)| {
            staged
                .slice
                .as_ref()
                .filter(|slice| slice.payments.contains_key(&payment_id))
                .map(|_| *id)
        });
        match staged {
            Some(group_id) => Ok(Some(group_id)),
            None => self.backend.locate_payment(payment_id).await,
        }
    }

    async fn writable_member(&mut self, member_id: MemberId) -> Result<Option<&mut GroupSlice>> {
        match self.member_group(member_id).await? {
            Some(group_id) => self.writable(group_id).await,
            None => Ok(None),
        }
    }

    async fn writable_payment(&mut self, payment_id: PaymentId) -> Result<Option<&mut GroupSlice>> {
        match self.payment_group(payment_id).await? {
            Some(group_id) => self.writable(group_id).await,
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<B: SliceBackend> LedgerTransaction for StagedTransaction<B> {
    async fn lock_group(&mut self, group_id: GroupId) -> Result<u64> {
        let staged = self.locked(group_id).await?;
        Ok(staged.slice.is_some() as u64)
    }

    async fn insert_group(&mut self, name: &str) -> Result<Group> {
        let group = Group {
            id: self.backend.ids().next_group(),
            name: name.to_string(),
        };
        let staged = self.locked(group.id).await?;
        staged.slice = Some(GroupSlice::new(group.clone()));
        staged.dirty = true;
        Ok(group)
    }

    async fn group(&mut self, group_id: GroupId) -> Result<Option<Group>> {
        Ok(self.view(group_id).await?.map(|slice| slice.group))
    }

    async fn groups(&mut self) -> Result<Vec<Group>> {
        let mut ids = self.backend.group_ids().await?;
        ids.extend(self.staged.keys().copied());
        ids.sort();
        ids.dedup();

        let mut groups = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(slice) = self.view(id).await? {
                groups.push(slice.group);
            }
        }
        Ok(groups)
    }

    async fn rename_group(&mut self, group_id: GroupId, name: &str) -> Result<u64> {
        match self.writable(group_id).await? {
            Some(slice) => {
                slice.group.name = name.to_string();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_group(&mut self, group_id: GroupId) -> Result<u64> {
        let staged = self.locked(group_id).await?;
        staged.dirty = true;
        Ok(staged.slice.take().is_some() as u64)
    }

    async fn insert_member(&mut self, group_id: GroupId, name: &str) -> Result<Member> {
        let member_id = self.backend.ids().next_member();
        let slice = self
            .writable(group_id)
            .await?
            .ok_or_else(|| LedgerError::conflict(format!("group {group_id} does not exist")))?;
        let member = Member::new(member_id, group_id, name);
        slice.members.insert(member.id, member.clone());
        Ok(member)
    }

    async fn member(&mut self, member_id: MemberId) -> Result<Option<Member>> {
        let Some(group_id) = self.member_group(member_id).await? else {
            return Ok(None);
        };
        Ok(self
            .view(group_id)
            .await?
            .and_then(|mut slice| slice.members.remove(&member_id)))
    }

    async fn members(&mut self, group_id: GroupId) -> Result<Vec<Member>> {
        Ok(self
            .view(group_id)
            .await?
            .map(|slice| slice.members.into_values().collect())
            .unwrap_or_default())
    }

    async fn rename_member(&mut self, member_id: MemberId, name: &str) -> Result<u64> {
        let Some(slice) = self.writable_member(member_id).await? else {
            return Ok(0);
        };
        match slice.members.get_mut(&member_id) {
            Some(member) => {
                member.name = name.to_string();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_member(&mut self, member_id: MemberId) -> Result<u64> {
        let Some(slice) = self.writable_member(member_id).await? else {
            return Ok(0);
        };
        if let Some(payment) = slice.payments.values().find(|p| p.involves(member_id)) {
            return Err(LedgerError::conflict(format!(
                "member {member_id} is referenced by payment {}",
                payment.id
            )));
        }
        Ok(slice.members.remove(&member_id).is_some() as u64)
    }

    async fn adjust_balance(&mut self, member_id: MemberId, delta: Decimal) -> Result<u64> {
        let Some(slice) = self.writable_member(member_id).await? else {
            return Ok(0);
        };
        match slice.members.get_mut(&member_id) {
            Some(member) => {
                member.balance = member
                    .balance
                    .checked_add(Balance::new(delta))
                    .ok_or_else(|| {
                        LedgerError::validation(format!("balance of member {member_id} out of range"))
                    })?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn reset_balances(&mut self, group_id: GroupId) -> Result<u64> {
        let Some(slice) = self.writable(group_id).await? else {
            return Ok(0);
        };
        for member in slice.members.values_mut() {
            member.balance = Balance::ZERO;
        }
        Ok(slice.members.len() as u64)
    }

    async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment> {
        let payment_id = self.backend.ids().next_payment();
        let group_id = payment.group_id;
        let slice = self
            .writable(group_id)
            .await?
            .ok_or_else(|| LedgerError::conflict(format!("group {group_id} does not exist")))?;

        let missing = std::iter::once(&payment.payer)
            .chain(payment.payees.iter())
            .find(|id| !slice.members.contains_key(*id));
        if let Some(member_id) = missing {
            return Err(LedgerError::conflict(format!(
                "member {member_id} is not part of group {group_id}"
            )));
        }

        let payment = Payment {
            id: payment_id,
            group_id,
            description: payment.description,
            amount: payment.amount,
            payer: payment.payer,
            payees: payment.payees,
        };
        slice.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn payment(&mut self, payment_id: PaymentId) -> Result<Option<Payment>> {
        let Some(group_id) = self.payment_group(payment_id).await? else {
            return Ok(None);
        };
        Ok(self
            .view(group_id)
            .await?
            .and_then(|mut slice| slice.payments.remove(&payment_id)))
    }

    async fn payment_for_update(&mut self, payment_id: PaymentId) -> Result<Option<Payment>> {
        let Some(group_id) = self.payment_group(payment_id).await? else {
            return Ok(None);
        };
        let staged = self.locked(group_id).await?;
        Ok(staged
            .slice
            .as_ref()
            .and_then(|slice| slice.payments.get(&payment_id).cloned()))
    }

    async fn payments(&mut self, group_id: GroupId) -> Result<Vec<Payment>> {
        Ok(self
            .view(group_id)
            .await?
            .map(|slice| slice.payments.into_values().collect())
            .unwrap_or_default())
    }

    async fn update_payment(
        &mut self,
        payment_id: PaymentId,
        amount: Option<Amount>,
        description: Patch<String>,
    ) -> Result<u64> {
        let Some(slice) = self.writable_payment(payment_id).await? else {
            return Ok(0);
        };
        let Some(payment) = slice.payments.get_mut(&payment_id) else {
            return Ok(0);
        };
        if let Some(amount) = amount {
            payment.amount = amount;
        }
        description.apply_to(&mut payment.description);
        Ok(1)
    }

    async fn delete_payment(&mut self, payment_id: PaymentId) -> Result<u64> {
        let Some(slice) = self.writable_payment(payment_id).await? else {
            return Ok(0);
        };
        Ok(slice.payments.remove(&payment_id).is_some() as u64)
    }

    async fn delete_payments(&mut self, group_id: GroupId) -> Result<u64> {
        let Some(slice) = self.writable(group_id).await? else {
            return Ok(0);
        };
        let removed = slice.payments.len() as u64;
        slice.payments.clear();
        Ok(removed)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let changes: Vec<_> = self
            .staged
            .iter()
            .filter(|(_, staged)| staged.dirty)
            .map(|(id, staged)| (*id, staged.slice.clone()))
            .collect();
        if !changes.is_empty() {
            self.backend.persist(changes).await?;
        }
        // Group locks are released when `self` drops here.
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
