//! Core ledger types and the storage ports the application layer depends on.

pub mod group;
pub mod money;
pub mod payment;
pub mod ports;
pub mod settlement;
