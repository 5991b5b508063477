//! Ledger module containing the loan engine, cash accounts, cash flow and reversals

pub mod balance;
pub mod cash_flow;
pub mod core;
pub mod loan;
pub mod locks;
pub mod reversal;

pub use balance::*;
pub use cash_flow::*;
pub use self::core::*;
pub use loan::*;
pub use locks::*;
pub use reversal::*;
