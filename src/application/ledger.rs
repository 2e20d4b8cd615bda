use super::scope::TransactionScope;
use crate::config::LedgerConfig;
use crate::domain::group::{Group, GroupId, Member, MemberId, PaymentId, validated_name};
use crate::domain::money::{Amount, Balance};
use crate::domain::payment::{NewPayment, Patch, PatchOutcome, Payment, PaymentPatch, PaymentRequest};
use crate::domain::ports::{LedgerStoreBox, LedgerTransactionBox};
use crate::domain::settlement::{Settlement, calculate_settlement};
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use tracing::{info, instrument};

/// The balance ledger for every group held by one store.
///
/// Each operation runs in its own [`TransactionScope`]; balance changes, payment
/// rows and their payee associations commit together or not at all. Writes lock
/// the affected group first, so concurrent calls on one group are serialized
/// while different groups proceed in parallel.
pub struct Ledger {
    scope: TransactionScope,
}

impl Ledger {
    pub fn new(store: LedgerStoreBox, config: LedgerConfig) -> Self {
        Self {
            scope: TransactionScope::new(store, config.deadline),
        }
    }

    /// Records a payment and moves its amount from the payer onto the payees.
    ///
    /// The payer is debited the full amount and each payee is credited an equal
    /// share; any indivisible remainder goes to the payee with the lowest id.
    #[instrument(skip(self, request), fields(payer = %request.payer, amount = %request.amount))]
    pub async fn add_payment(&self, group_id: GroupId, request: PaymentRequest) -> Result<Payment> {
        let amount = Amount::new(request.amount)?;
        let payees = distinct_payees(request.payees)?;
        let new_payment = NewPayment {
            group_id,
            description: request.description,
            amount,
            payer: request.payer,
            payees,
        };

        let payment = self
            .scope
            .run("add_payment", move |tx| Box::pin(record_payment(tx, new_payment)))
            .await?;
        info!(payment = %payment.id, payees = payment.payees.len(), "payment recorded");
        Ok(payment)
    }

    /// Changes a payment's amount and/or description.
    ///
    /// An amount change re-applies only the difference, split across the payees
    /// stored with the payment. An empty patch returns [`PatchOutcome::Unchanged`]
    /// without touching the store.
    #[instrument(skip(self, patch))]
    pub async fn patch_payment(
        &self,
        group_id: GroupId,
        payment_id: PaymentId,
        patch: PaymentPatch,
    ) -> Result<PatchOutcome> {
        if patch.is_empty() {
            return Ok(PatchOutcome::Unchanged);
        }
        let amount = patch.amount.map(Amount::new).transpose()?;
        let description = patch.description;

        let payment = self
            .scope
            .run("patch_payment", move |tx| {
                Box::pin(amend_payment(tx, group_id, payment_id, amount, description))
            })
            .await?;
        info!(amount = %payment.amount.value(), "payment patched");
        Ok(PatchOutcome::Updated(payment))
    }

    /// Deletes a payment, reversing exactly what recording it did.
    #[instrument(skip(self))]
    pub async fn delete_payment(&self, group_id: GroupId, payment_id: PaymentId) -> Result<Payment> {
        let payment = self
            .scope
            .run("delete_payment", move |tx| {
                Box::pin(reverse_payment(tx, group_id, payment_id))
            })
            .await?;
        info!(amount = %payment.amount.value(), "payment deleted");
        Ok(payment)
    }

    /// Deletes every payment in the group and resets all member balances to zero.
    ///
    /// Balances are reset directly rather than by reversing each payment, which
    /// also clears any rounding residue left behind by amended payments.
    #[instrument(skip(self))]
    pub async fn delete_all_payments(&self, group_id: GroupId) -> Result<u64> {
        let removed = self
            .scope
            .run("delete_all_payments", move |tx| {
                Box::pin(clear_payments(tx, group_id))
            })
            .await?;
        info!(removed, "all payments deleted");
        Ok(removed)
    }

    /// Suggests transfers that would settle every balance in the group.
    ///
    /// Reads committed balances without locking; the result is advisory when
    /// computed alongside concurrent writes.
    #[instrument(skip(self))]
    pub async fn compute_settlement(&self, group_id: GroupId) -> Result<Settlement> {
        let members = self.members(group_id).await?;
        let balances: Vec<(MemberId, Balance)> =
            members.iter().map(|m| (m.id, m.balance)).collect();
        Ok(Settlement {
            group_id,
            transfers: calculate_settlement(&balances),
        })
    }

    pub async fn create_group(&self, name: &str) -> Result<Group> {
        let name = validated_name(name)?;
        self.scope
            .run("create_group", move |tx| {
                Box::pin(async move { tx.insert_group(&name).await })
            })
            .await
    }

    pub async fn group(&self, group_id: GroupId) -> Result<Group> {
        self.scope
            .run("group", move |tx| Box::pin(require_group(tx, group_id)))
            .await
    }

    pub async fn groups(&self) -> Result<Vec<Group>> {
        self.scope
            .run("groups", |tx| Box::pin(async move { tx.groups().await }))
            .await
    }

    pub async fn rename_group(&self, group_id: GroupId, name: &str) -> Result<Group> {
        let name = validated_name(name)?;
        self.scope
            .run("rename_group", move |tx| {
                Box::pin(async move {
                    let affected = tx.rename_group(group_id, &name).await?;
                    if affected == 0 {
                        return Err(LedgerError::not_found("group", group_id));
                    }
                    expect_rows(affected, 1, "group rename")?;
                    Ok(Group { id: group_id, name })
                })
            })
            .await
    }

    /// Deletes a group along with all of its members and payments.
    pub async fn delete_group(&self, group_id: GroupId) -> Result<()> {
        self.scope
            .run("delete_group", move |tx| {
                Box::pin(async move {
                    let affected = tx.delete_group(group_id).await?;
                    if affected == 0 {
                        return Err(LedgerError::not_found("group", group_id));
                    }
                    expect_rows(affected, 1, "group delete")
                })
            })
            .await
    }

    /// Adds a member with a zero balance.
    pub async fn add_member(&self, group_id: GroupId, name: &str) -> Result<Member> {
        let name = validated_name(name)?;
        self.scope
            .run("add_member", move |tx| {
                Box::pin(async move {
                    lock_group(tx, group_id).await?;
                    tx.insert_member(group_id, &name).await
                })
            })
            .await
    }

    /// Members of the group in ascending id order.
    pub async fn members(&self, group_id: GroupId) -> Result<Vec<Member>> {
        self.scope
            .run("members", move |tx| {
                Box::pin(async move {
                    require_group(tx, group_id).await?;
                    tx.members(group_id).await
                })
            })
            .await
    }

    pub async fn rename_member(
        &self,
        group_id: GroupId,
        member_id: MemberId,
        name: &str,
    ) -> Result<Member> {
        let name = validated_name(name)?;
        self.scope
            .run("rename_member", move |tx| {
                Box::pin(async move {
                    lock_group(tx, group_id).await?;
                    let mut member = require_member(tx, group_id, member_id).await?;
                    expect_rows(tx.rename_member(member_id, &name).await?, 1, "member rename")?;
                    member.name = name;
                    Ok(member)
                })
            })
            .await
    }

    /// Removes a member. Fails with `Conflict` while any payment references it.
    pub async fn remove_member(&self, group_id: GroupId, member_id: MemberId) -> Result<()> {
        self.scope
            .run("remove_member", move |tx| {
                Box::pin(async move {
                    lock_group(tx, group_id).await?;
                    require_member(tx, group_id, member_id).await?;
                    expect_rows(tx.delete_member(member_id).await?, 1, "member delete")
                })
            })
            .await
    }

    /// Payments of the group in ascending id order.
    pub async fn payments(&self, group_id: GroupId) -> Result<Vec<Payment>> {
        self.scope
            .run("payments", move |tx| {
                Box::pin(async move {
                    require_group(tx, group_id).await?;
                    tx.payments(group_id).await
                })
            })
            .await
    }

    pub async fn payment(&self, group_id: GroupId, payment_id: PaymentId) -> Result<Payment> {
        self.scope
            .run("payment", move |tx| {
                Box::pin(async move {
                    tx.payment(payment_id)
                        .await?
                        .filter(|p| p.group_id == group_id)
                        .ok_or_else(|| LedgerError::not_found("payment", payment_id))
                })
            })
            .await
    }
}

async fn record_payment(tx: &mut LedgerTransactionBox, new_payment: NewPayment) -> Result<Payment> {
    let group_id = new_payment.group_id;
    lock_group(tx, group_id).await?;
    require_member(tx, group_id, new_payment.payer).await?;
    for payee in &new_payment.payees {
        require_member(tx, group_id, *payee).await?;
    }

    let payment = tx.insert_payment(new_payment).await?;
    let amount = payment.amount.value();
    apply_balance(tx, payment.payer, -amount, "payer").await?;
    for (payee, share) in payment.shares_of(amount) {
        apply_balance(tx, payee, share, "payee").await?;
    }
    Ok(payment)
}

async fn amend_payment(
    tx: &mut LedgerTransactionBox,
    group_id: GroupId,
    payment_id: PaymentId,
    amount: Option<Amount>,
    description: Patch<String>,
) -> Result<Payment> {
    let mut payment = payment_for_update(tx, group_id, payment_id).await?;

    if !description.is_keep() {
        let affected = tx
            .update_payment(payment_id, None, description.clone())
            .await?;
        expect_rows(affected, 1, "payment description")?;
        description.apply_to(&mut payment.description);
    }

    if let Some(amount) = amount.filter(|a| *a != payment.amount) {
        let diff = amount.value() - payment.amount.value();
        let affected = tx
            .update_payment(payment_id, Some(amount), Patch::Keep)
            .await?;
        expect_rows(affected, 1, "payment amount")?;

        apply_balance(tx, payment.payer, -diff, "payer").await?;
        for (payee, share) in payment.shares_of(diff) {
            apply_balance(tx, payee, share, "payee").await?;
        }
        payment.amount = amount;
    }

    Ok(payment)
}

async fn reverse_payment(
    tx: &mut LedgerTransactionBox,
    group_id: GroupId,
    payment_id: PaymentId,
) -> Result<Payment> {
    let payment = payment_for_update(tx, group_id, payment_id).await?;
    let amount = payment.amount.value();

    for (payee, share) in payment.shares_of(amount) {
        apply_balance(tx, payee, -share, "payee").await?;
    }
    apply_balance(tx, payment.payer, amount, "payer").await?;
    expect_rows(tx.delete_payment(payment_id).await?, 1, "payment delete")?;
    Ok(payment)
}

async fn clear_payments(tx: &mut LedgerTransactionBox, group_id: GroupId) -> Result<u64> {
    lock_group(tx, group_id).await?;
    let removed = tx.delete_payments(group_id).await?;
    tx.reset_balances(group_id).await?;
    Ok(removed)
}

async fn lock_group(tx: &mut LedgerTransactionBox, group_id: GroupId) -> Result<()> {
    match tx.lock_group(group_id).await? {
        0 => Err(LedgerError::not_found("group", group_id)),
        affected => expect_rows(affected, 1, "group lock"),
    }
}

async fn require_group(tx: &mut LedgerTransactionBox, group_id: GroupId) -> Result<Group> {
    tx.group(group_id)
        .await?
        .ok_or_else(|| LedgerError::not_found("group", group_id))
}

async fn require_member(
    tx: &mut LedgerTransactionBox,
    group_id: GroupId,
    member_id: MemberId,
) -> Result<Member> {
    tx.member(member_id)
        .await?
        .filter(|m| m.group_id == group_id)
        .ok_or_else(|| LedgerError::not_found("member", member_id))
}

async fn payment_for_update(
    tx: &mut LedgerTransactionBox,
    group_id: GroupId,
    payment_id: PaymentId,
) -> Result<Payment> {
    tx.payment_for_update(payment_id)
        .await?
        .filter(|p| p.group_id == group_id)
        .ok_or_else(|| LedgerError::not_found("payment", payment_id))
}

async fn apply_balance(
    tx: &mut LedgerTransactionBox,
    member_id: MemberId,
    delta: Decimal,
    role: &'static str,
) -> Result<()> {
    let affected = tx.adjust_balance(member_id, delta).await?;
    if affected != 1 {
        return Err(LedgerError::conflict(format!(
            "{role} balance update for member {member_id} affected {affected} rows"
        )));
    }
    Ok(())
}

fn expect_rows(affected: u64, expected: u64, what: &str) -> Result<()> {
    if affected != expected {
        return Err(LedgerError::conflict(format!(
            "{what} affected {affected} rows, expected {expected}"
        )));
    }
    Ok(())
}

/// Sorts payees by id and rejects empty or repeated entries.
fn distinct_payees(mut payees: Vec<MemberId>) -> Result<Vec<MemberId>> {
    if payees.is_empty() {
        return Err(LedgerError::validation("Payment needs at least one payee"));
    }
    let requested = payees.len();
    payees.sort_unstable();
    payees.dedup();
    if payees.len() != requested {
        return Err(LedgerError::validation("Payee list contains duplicates"));
    }
    Ok(payees)
}
