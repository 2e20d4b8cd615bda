use crate::domain::group::{GroupId, Member, MemberId};
use crate::domain::settlement::Settlement;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct TransferRow {
    group: GroupId,
    from: MemberId,
    to: MemberId,
    amount: Decimal,
}

#[derive(Serialize)]
struct BalanceRow<'a> {
    group: GroupId,
    member: MemberId,
    name: &'a str,
    balance: Decimal,
}

/// Writes ledger reports as CSV. Amounts are normalized (`30.0000` becomes `30`).
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            // Headers are written explicitly so empty reports still carry them.
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(sink),
        }
    }

    /// One `group,from,to,amount` row per suggested transfer.
    pub fn write_settlements(&mut self, settlements: &[Settlement]) -> Result<()> {
        self.writer.write_record(["group", "from", "to", "amount"])?;
        for settlement in settlements {
            for transfer in &settlement.transfers {
                self.writer.serialize(TransferRow {
                    group: settlement.group_id,
                    from: transfer.from,
                    to: transfer.to,
                    amount: transfer.amount.normalize(),
                })?;
            }
        }
        self.writer.flush()?;
        Ok(())
    }

    /// One `group,member,name,balance` row per member.
    pub fn write_balances(&mut self, members: &[Member]) -> Result<()> {
        self.writer
            .write_record(["group", "member", "name", "balance"])?;
        for member in members {
            self.writer.serialize(BalanceRow {
                group: member.group_id,
                member: member.id,
                name: &member.name,
                balance: member.balance.value().normalize(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Balance;
    use crate::domain::settlement::Transfer;
    use rust_decimal_macros::dec;

    fn written<F>(write: F) -> String
    where
        F: FnOnce(&mut ReportWriter<&mut Vec<u8>>) -> Result<()>,
    {
        let mut buffer = Vec::new();
        let mut writer = ReportWriter::new(&mut buffer);
        write(&mut writer).unwrap();
        drop(writer);
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_write_settlements() {
        let settlement = Settlement {
            group_id: GroupId(1),
            transfers: vec![Transfer {
                from: MemberId(3),
                to: MemberId(1),
                amount: dec!(60.0000),
            }],
        };
        let output = written(|w| w.write_settlements(&[settlement]));
        assert_eq!(output, "group,from,to,amount\n1,3,1,60\n");
    }

    #[test]
    fn test_write_balances() {
        let mut alice = Member::new(MemberId(1), GroupId(2), "Alice");
        alice.balance = Balance::new(dec!(-3.3300));
        let bob = Member::new(MemberId(2), GroupId(2), "Bob");

        let output = written(|w| w.write_balances(&[alice, bob]));
        assert_eq!(output, "group,member,name,balance\n2,1,Alice,-3.33\n2,2,Bob,0\n");
    }
}
