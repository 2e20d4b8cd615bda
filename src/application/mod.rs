//! Application layer: the payment ledger and the transaction scope it runs in.
//!
//! Every [`ledger::Ledger`] operation is a unit of work executed by
//! [`scope::TransactionScope`], which commits on success and rolls back on
//! error or when the configured deadline expires.

pub mod ledger;
pub mod scope;
