use super::group::{GroupId, MemberId};
use super::money::Balance;
use rust_decimal::Decimal;
use serde::Serialize;

/// A suggested payoff: `from` sends `amount` to `to`. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transfer {
    pub from: MemberId,
    pub to: MemberId,
    pub amount: Decimal,
}

/// Settlement report for one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settlement {
    pub group_id: GroupId,
    pub transfers: Vec<Transfer>,
}

impl Settlement {
    /// Sum of all transfer amounts, or `None` if it exceeds the `Decimal` range.
    pub fn total(&self) -> Option<Decimal> {
        self.transfers
            .iter()
            .try_fold(Decimal::ZERO, |sum, t| sum.checked_add(t.amount))
    }
}

struct Remaining {
    member: MemberId,
    amount: Decimal,
}

/// Turns a balance snapshot into payoff transfers with a single greedy pass.
///
/// `balances` must be in a fixed order (ascending member id); the output is
/// deterministic for a given order. Members with a positive balance are the
/// creditors here and receive transfers, members with a negative balance send them.
/// The result is correct but not necessarily the fewest possible transfers.
pub fn calculate_settlement(balances: &[(MemberId, Balance)]) -> Vec<Transfer> {
    let mut creditors = Vec::new();
    let mut debtors = Vec::new();
    for &(member, balance) in balances {
        let amount = balance.value();
        if amount > Decimal::ZERO {
            creditors.push(Remaining { member, amount });
        } else if amount < Decimal::ZERO {
            debtors.push(Remaining {
                member,
                amount: amount.abs(),
            });
        }
    }

    let mut transfers = Vec::with_capacity(creditors.len() + debtors.len());
    let (mut c, mut d) = (0, 0);
    while c < creditors.len() && d < debtors.len() {
        let amount = creditors[c].amount.min(debtors[d].amount);
        transfers.push(Transfer {
            from: debtors[d].member,
            to: creditors[c].member,
            amount,
        });

        creditors[c].amount -= amount;
        debtors[d].amount -= amount;
        if creditors[c].amount.is_zero() {
            c += 1;
        }
        if debtors[d].amount.is_zero() {
            d += 1;
        }
    }

    transfers
}
