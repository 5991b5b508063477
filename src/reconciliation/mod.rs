//! Reconciliation of the physical cash book against the ledger

pub mod cash_book;

pub use cash_book::*;
