//! # Factory Ledger
//!
//! Financial ledger core for a small factory: loans with simple-interest
//! accrual, cash and bank accounts with an append-only balance history, daily
//! cash flow and a reconciled cash book.
//!
//! ## Features
//!
//! - **Loan engine**: issuance, daily simple-interest accrual, interest-first payment allocation
//! - **Cash accounts**: every balance change goes through one service and leaves a history row
//! - **Cash flow**: per-day inflow and outflow across inventory, loans, wages and expenses
//! - **Cash book**: opening balances, expected closings and physical cash counts
//! - **Reversal and restore**: deletes undo their effects exactly; restores replay them
//! - **Storage abstraction**: every mutation is one atomic batch against a `LedgerStorage`
//!
//! ## Quick Start
//!
//! ```rust
//! use factory_ledger::{LedgerBuilder, MemoryPartyDirectory, MemoryStorage};
//!
//! let parties = MemoryPartyDirectory::new();
//! parties.add_party("p1", "Cotton Supplier");
//! let ledger = LedgerBuilder::new(MemoryStorage::new(), parties)
//!     .build()
//!     .expect("default config is valid");
//! assert_eq!(ledger.config().interest.days_in_year, 365);
//! ```

pub mod config;
pub mod ledger;
pub mod reconciliation;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use self::config::{InterestConfig, LedgerConfig, PostingConfig};
pub use ledger::*;
pub use reconciliation::*;
pub use traits::*;
pub use types::*;
pub use utils::{EmptyFeed, FixedClock, MemoryFeeds, MemoryPartyDirectory, MemoryStorage, SystemClock};
