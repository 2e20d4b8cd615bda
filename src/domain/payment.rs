use super::group::{GroupId, MemberId, PaymentId};
use super::money::{Amount, split_evenly};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A recorded expense: `payer` covered `amount` on behalf of `payees`.
///
/// `payees` is kept sorted by member id. Split remainders are assigned by that order,
/// so every share computation over the same payment is reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub group_id: GroupId,
    pub description: Option<String>,
    pub amount: Amount,
    pub payer: MemberId,
    pub payees: Vec<MemberId>,
}

impl Payment {
    /// Pairs every payee with its share of `total`.
    pub fn shares_of(&self, total: Decimal) -> Vec<(MemberId, Decimal)> {
        self.payees
            .iter()
            .copied()
            .zip(split_evenly(total, self.payees.len()))
            .collect()
    }

    /// Whether `member` takes part in this payment as payer or payee.
    pub fn involves(&self, member: MemberId) -> bool {
        self.payer == member || self.payees.contains(&member)
    }
}

/// A validated payment ready to be written by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub group_id: GroupId,
    pub description: Option<String>,
    pub amount: Amount,
    pub payer: MemberId,
    pub payees: Vec<MemberId>,
}

/// Caller input for recording a payment. Validated by the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    pub payer: MemberId,
    pub payees: Vec<MemberId>,
    pub amount: Decimal,
    pub description: Option<String>,
}

impl PaymentRequest {
    pub fn new(payer: MemberId, payees: Vec<MemberId>, amount: Decimal) -> Self {
        Self {
            payer,
            payees,
            amount,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A field update that distinguishes "leave alone" from "set to nothing".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Patch<T> {
    #[default]
    Keep,
    Clear,
    Set(T),
}

impl<T> Patch<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }

    /// Applies the patch to an optional field in place.
    pub fn apply_to(self, field: &mut Option<T>) {
        match self {
            Patch::Keep => {}
            Patch::Clear => *field = None,
            Patch::Set(value) => *field = Some(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PaymentPatch {
    pub amount: Option<Decimal>,
    pub description: Patch<String>,
}

impl PaymentPatch {
    pub fn amount(amount: Decimal) -> Self {
        Self {
            amount: Some(amount),
            ..Self::default()
        }
    }

    pub fn description(description: Patch<String>) -> Self {
        Self {
            amount: None,
            description,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.amount.is_none() && self.description.is_keep()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Neither field was requested; nothing was read or written.
    Unchanged,
    Updated(Payment),
}
