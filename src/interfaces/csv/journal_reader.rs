use crate::domain::group::{GroupId, MemberId, PaymentId};
use crate::domain::payment::{Patch, PaymentPatch, PaymentRequest};
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// Marker in the `text` column of a `patch` row that clears the description.
pub const CLEAR_TEXT: &str = "-";

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum JournalCommand {
    Group,
    Member,
    Pay,
    Patch,
    Delete,
    Clear,
}

/// One raw journal line: `command,group,member,payment,amount,payees,text`.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct JournalRecord {
    pub command: JournalCommand,
    pub group: Option<u64>,
    pub member: Option<u64>,
    pub payment: Option<u64>,
    pub amount: Option<Decimal>,
    pub payees: Option<String>,
    pub text: Option<String>,
}

/// A journal line resolved into the ledger call it stands for.
#[derive(Debug, PartialEq, Clone)]
pub enum JournalEntry {
    CreateGroup {
        name: String,
    },
    AddMember {
        group: GroupId,
        name: String,
    },
    Pay {
        group: GroupId,
        request: PaymentRequest,
    },
    Patch {
        group: GroupId,
        payment: PaymentId,
        patch: PaymentPatch,
    },
    Delete {
        group: GroupId,
        payment: PaymentId,
    },
    Clear {
        group: GroupId,
    },
}

fn required<T>(value: Option<T>, column: &str, command: JournalCommand) -> Result<T> {
    value.ok_or_else(|| {
        LedgerError::validation(format!("{command:?} row is missing the '{column}' column"))
    })
}

fn parse_payees(raw: &str) -> Result<Vec<MemberId>> {
    raw.split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>()
                .map(MemberId)
                .map_err(|_| LedgerError::validation(format!("Invalid payee id '{part}'")))
        })
        .collect()
}

impl TryFrom<JournalRecord> for JournalEntry {
    type Error = LedgerError;

    fn try_from(record: JournalRecord) -> Result<Self> {
        let command = record.command;
        let group = || required(record.group, "group", command).map(GroupId);
        let payment = || required(record.payment, "payment", command).map(PaymentId);

        let entry = match command {
            JournalCommand::Group => JournalEntry::CreateGroup {
                name: required(record.text.clone(), "text", command)?,
            },
            JournalCommand::Member => JournalEntry::AddMember {
                group: group()?,
                name: required(record.text.clone(), "text", command)?,
            },
            JournalCommand::Pay => {
                let payer = MemberId(required(record.member, "member", command)?);
                let amount = required(record.amount, "amount", command)?;
                let payees = parse_payees(record.payees.as_deref().unwrap_or_default())?;
                let mut request = PaymentRequest::new(payer, payees, amount);
                request.description = record.text.clone();
                JournalEntry::Pay {
                    group: group()?,
                    request,
                }
            }
            JournalCommand::Patch => {
                let description = match record.text.as_deref() {
                    None => Patch::Keep,
                    Some(CLEAR_TEXT) => Patch::Clear,
                    Some(text) => Patch::Set(text.to_string()),
                };
                JournalEntry::Patch {
                    group: group()?,
                    payment: payment()?,
                    patch: PaymentPatch {
                        amount: record.amount,
                        description,
                    },
                }
            }
            JournalCommand::Delete => JournalEntry::Delete {
                group: group()?,
                payment: payment()?,
            },
            JournalCommand::Clear => JournalEntry::Clear { group: group()? },
        };
        Ok(entry)
    }
}

/// Reads ledger commands from a CSV journal.
///
/// This reader wraps `csv::Reader` and provides an iterator over `Result<JournalEntry>`.
/// It handles whitespace trimming and flexible record lengths automatically, so
/// trailing empty columns may be omitted.
pub struct JournalReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> JournalReader<R> {
    /// Creates a new `JournalReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and resolves journal lines.
    pub fn entries(self) -> impl Iterator<Item = Result<JournalEntry>> {
        self.reader
            .into_deserialize::<JournalRecord>()
            .map(|result| result.map_err(LedgerError::from).and_then(JournalEntry::try_from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const HEADER: &str = "command,group,member,payment,amount,payees,text\n";

    fn read(rows: &str) -> Vec<Result<JournalEntry>> {
        let data = format!("{HEADER}{rows}");
        JournalReader::new(data.as_bytes()).entries().collect()
    }

    #[test]
    fn test_reader_valid_stream() {
        let results = read(
            "group,,,,,,Trip\n\
             member, 1,,,,, Alice\n\
             pay,1,1,,90.5,3; 2 ,Dinner\n\
             patch,1,,4,60,,\n\
             patch,1,,4,,,-\n\
             delete,1,,4\n\
             clear,1\n",
        );
        let entries: Vec<JournalEntry> = results.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(
            entries[0],
            JournalEntry::CreateGroup {
                name: "Trip".to_string()
            }
        );
        assert_eq!(
            entries[1],
            JournalEntry::AddMember {
                group: GroupId(1),
                name: "Alice".to_string()
            }
        );
        assert_eq!(
            entries[2],
            JournalEntry::Pay {
                group: GroupId(1),
                request: PaymentRequest::new(MemberId(1), vec![MemberId(3), MemberId(2)], dec!(90.5))
                    .with_description("Dinner"),
            }
        );
        assert_eq!(
            entries[3],
            JournalEntry::Patch {
                group: GroupId(1),
                payment: PaymentId(4),
                patch: PaymentPatch::amount(dec!(60)),
            }
        );
        assert_eq!(
            entries[4],
            JournalEntry::Patch {
                group: GroupId(1),
                payment: PaymentId(4),
                patch: PaymentPatch::description(Patch::Clear),
            }
        );
        assert_eq!(
            entries[5],
            JournalEntry::Delete {
                group: GroupId(1),
                payment: PaymentId(4)
            }
        );
        assert_eq!(entries[6], JournalEntry::Clear { group: GroupId(1) });
    }

    #[test]
    fn test_reader_malformed_line() {
        let results = read("refund,1,1,,5,,\npay,1,,,5,2,\npay,1,1,,5,x,\nclear,1\n");

        assert!(matches!(results[0], Err(LedgerError::CsvError(_))));
        assert!(matches!(results[1], Err(LedgerError::ValidationError(_))));
        assert!(matches!(results[2], Err(LedgerError::ValidationError(_))));
        assert!(results[3].is_ok());
    }
}
