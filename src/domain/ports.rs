use super::group::{Group, GroupId, Member, MemberId, PaymentId};
use super::money::Amount;
use super::payment::{NewPayment, Patch, Payment};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One open transaction against a ledger store.
///
/// Mutations return the number of rows they affected so callers can detect
/// mismatches. Any write to a group's rows locks that group until the
/// transaction ends; plain reads never lock and see committed state (plus this
/// transaction's own writes). Dropping a transaction without calling
/// [`commit`](LedgerTransaction::commit) discards all of its writes.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Locks the group row for the rest of the transaction. Returns 0 if it does not exist.
    async fn lock_group(&mut self, group_id: GroupId) -> Result<u64>;
    async fn insert_group(&mut self, name: &str) -> Result<Group>;
    async fn group(&mut self, group_id: GroupId) -> Result<Option<Group>>;
    async fn groups(&mut self) -> Result<Vec<Group>>;
    async fn rename_group(&mut self, group_id: GroupId, name: &str) -> Result<u64>;
    /// Deletes the group together with its members and payments.
    async fn delete_group(&mut self, group_id: GroupId) -> Result<u64>;

    async fn insert_member(&mut self, group_id: GroupId, name: &str) -> Result<Member>;
    async fn member(&mut self, member_id: MemberId) -> Result<Option<Member>>;
    /// Members of a group in ascending id order.
    async fn members(&mut self, group_id: GroupId) -> Result<Vec<Member>>;
    async fn rename_member(&mut self, member_id: MemberId, name: &str) -> Result<u64>;
    /// Fails with `Conflict` while any payment still references the member.
    async fn delete_member(&mut self, member_id: MemberId) -> Result<u64>;
    /// `balance = balance + delta` on a single member row.
    async fn adjust_balance(&mut self, member_id: MemberId, delta: Decimal) -> Result<u64>;
    /// `balance = 0` on every member of the group.
    async fn reset_balances(&mut self, group_id: GroupId) -> Result<u64>;

    async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment>;
    async fn payment(&mut self, payment_id: PaymentId) -> Result<Option<Payment>>;
    /// Reads a payment and locks its group.
    async fn payment_for_update(&mut self, payment_id: PaymentId) -> Result<Option<Payment>>;
    /// Payments of a group in ascending id order.
    async fn payments(&mut self, group_id: GroupId) -> Result<Vec<Payment>>;
    async fn update_payment(
        &mut self,
        payment_id: PaymentId,
        amount: Option<Amount>,
        description: Patch<String>,
    ) -> Result<u64>;
    async fn delete_payment(&mut self, payment_id: PaymentId) -> Result<u64>;
    async fn delete_payments(&mut self, group_id: GroupId) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> Result<LedgerTransactionBox>;
}

pub type LedgerTransactionBox = Box<dyn LedgerTransaction>;
pub type LedgerStoreBox = Box<dyn LedgerStore>;
