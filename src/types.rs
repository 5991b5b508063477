//! Core types and data structures for the ledger

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Which side of a lending relationship the factory is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoanDirection {
    /// The factory lent money to the party
    Given,
    /// The factory borrowed money from the party
    Taken,
}

impl LoanDirection {
    /// Transaction type emitted when a loan in this direction is issued
    pub fn issue_type(self) -> FinancialTransactionType {
        match self {
            LoanDirection::Given => FinancialTransactionType::LoanGiven,
            LoanDirection::Taken => FinancialTransactionType::LoanTaken,
        }
    }

    /// Transaction type emitted when interest accrues on a loan in this direction
    pub fn interest_type(self) -> FinancialTransactionType {
        match self {
            LoanDirection::Given => FinancialTransactionType::InterestReceived,
            LoanDirection::Taken => FinancialTransactionType::InterestPaid,
        }
    }

    /// Transaction type emitted when a payment is recorded against a loan in this direction
    pub fn payment_type(self) -> FinancialTransactionType {
        match self {
            LoanDirection::Given => FinancialTransactionType::LoanRepayment,
            LoanDirection::Taken => FinancialTransactionType::LoanPayment,
        }
    }
}

/// Lifecycle status of a loan, always derived from its outstanding values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoanStatus {
    Active,
    PartiallyPaid,
    Overdue,
    Closed,
}

/// How a transaction moves money
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMode {
    Cash,
    Bank,
    /// Pure loan-ledger entry with no immediate cash effect
    Loan,
}

impl PaymentMode {
    /// Cash account type that receives postings in this mode, if any
    pub fn account_type(self) -> Option<CashAccountType> {
        match self {
            PaymentMode::Cash => Some(CashAccountType::Cash),
            PaymentMode::Bank => Some(CashAccountType::Bank),
            PaymentMode::Loan => None,
        }
    }
}

/// Kind of ledger event recorded by a [`FinancialTransaction`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FinancialTransactionType {
    LoanGiven,
    LoanTaken,
    LoanRepayment,
    LoanPayment,
    InterestReceived,
    InterestPaid,
}

impl FinancialTransactionType {
    pub fn is_issue(self) -> bool {
        matches!(
            self,
            FinancialTransactionType::LoanGiven | FinancialTransactionType::LoanTaken
        )
    }

    pub fn is_interest(self) -> bool {
        matches!(
            self,
            FinancialTransactionType::InterestReceived | FinancialTransactionType::InterestPaid
        )
    }

    pub fn is_payment(self) -> bool {
        matches!(
            self,
            FinancialTransactionType::LoanRepayment | FinancialTransactionType::LoanPayment
        )
    }

    /// Whether money comes into the factory when this event is settled in cash
    pub fn is_inflow(self) -> bool {
        matches!(
            self,
            FinancialTransactionType::LoanRepayment
                | FinancialTransactionType::InterestReceived
                | FinancialTransactionType::LoanTaken
        )
    }
}

/// Type of a physical money pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CashAccountType {
    Cash,
    Bank,
}

/// Reason recorded on a balance history row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BalanceChangeType {
    Deposit,
    Withdrawal,
    Adjustment,
    /// Cash effect of a loan-engine transaction
    LoanPosting,
    /// Compensating entry for a deleted transaction
    Reversal,
}

/// One lending relationship with accruing simple interest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanAccount {
    pub id: String,
    /// Counterparty id in the party directory
    pub party_id: String,
    pub direction: LoanDirection,
    pub original_amount: BigDecimal,
    /// Annual percentage rate, simple interest
    pub interest_rate: BigDecimal,
    pub start_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub outstanding_principal: BigDecimal,
    pub outstanding_interest: BigDecimal,
    pub total_outstanding: BigDecimal,
    pub status: LoanStatus,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl LoanAccount {
    /// Recompute `total_outstanding` from its parts
    pub fn recompute_total(&mut self) {
        self.total_outstanding = &self.outstanding_principal + &self.outstanding_interest;
    }

    /// Status implied by the current outstanding values on `today`
    pub fn derive_status(&self, today: NaiveDate) -> LoanStatus {
        let zero = BigDecimal::from(0);
        if self.total_outstanding <= zero {
            LoanStatus::Closed
        } else if self.total_outstanding < self.original_amount {
            LoanStatus::PartiallyPaid
        } else if self.due_date.is_some_and(|due| today > due) {
            LoanStatus::Overdue
        } else {
            LoanStatus::Active
        }
    }

    /// Whether the total still equals principal plus interest
    pub fn is_consistent(&self) -> bool {
        self.total_outstanding == &self.outstanding_principal + &self.outstanding_interest
    }
}

/// Input for issuing a new loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLoan {
    pub party_id: String,
    pub direction: LoanDirection,
    pub amount: BigDecimal,
    pub interest_rate: BigDecimal,
    pub start_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Immutable record of one ledger event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialTransaction {
    pub id: String,
    pub transaction_type: FinancialTransactionType,
    /// Cash amount of the event; zero for interest accruals
    pub amount: BigDecimal,
    pub interest_rate: Option<BigDecimal>,
    /// Accrued interest for accruals, interest portion of the allocation for payments
    pub interest_amount: Option<BigDecimal>,
    pub date: NaiveDateTime,
    /// Weak reference to the owning loan
    pub loan_id: Option<String>,
    pub party_id: Option<String>,
    pub payment_mode: PaymentMode,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: NaiveDateTime,
}

impl FinancialTransaction {
    /// Signed effect on the cash or bank pool the transaction settles in
    pub fn signed_cash_amount(&self) -> BigDecimal {
        if self.transaction_type.is_inflow() {
            self.amount.clone()
        } else {
            -self.amount.clone()
        }
    }

    /// Whether settling this transaction moves money in a cash or bank account
    pub fn moves_money(&self) -> bool {
        self.payment_mode != PaymentMode::Loan && self.amount != BigDecimal::from(0)
    }

    /// Interest portion carried by the transaction, zero when absent
    pub fn interest_portion(&self) -> BigDecimal {
        self.interest_amount
            .clone()
            .unwrap_or_else(|| BigDecimal::from(0))
    }
}

/// One physical pool of money
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashAccount {
    pub id: String,
    pub name: String,
    pub account_type: CashAccountType,
    /// Fixed at creation
    pub opening_balance: BigDecimal,
    pub current_balance: BigDecimal,
    pub created_by: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Append-only audit row for a balance change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceHistory {
    pub id: String,
    pub account_id: String,
    pub change_type: BalanceChangeType,
    pub previous_balance: BigDecimal,
    /// Signed
    pub change_amount: BigDecimal,
    pub new_balance: BigDecimal,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
    pub changed_by: String,
    pub changed_at: NaiveDateTime,
}

/// Physical count recorded against a day's expected cash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashReconciliation {
    pub actual_cash_counted: BigDecimal,
    /// Counted minus expected; positive is a surplus, negative a shortage
    pub discrepancy: BigDecimal,
    pub reconciled_at: NaiveDateTime,
    pub reconciled_by: String,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

/// Where a day sits in the cash book lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CashBookState {
    Uninitialized,
    Computed,
    Reconciled,
}

/// Daily cash book record, at most one per date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashBalance {
    pub id: String,
    pub date: NaiveDate,
    pub opening_balance: BigDecimal,
    pub total_cash_in: BigDecimal,
    pub total_cash_out: BigDecimal,
    pub expected_closing_balance: BigDecimal,
    pub reconciliation: Option<CashReconciliation>,
    pub created_by: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl CashBalance {
    /// The balance the next day opens with: counted cash when reconciled, expected otherwise
    pub fn closing_balance(&self) -> &BigDecimal {
        self.reconciliation
            .as_ref()
            .map(|r| &r.actual_cash_counted)
            .unwrap_or(&self.expected_closing_balance)
    }

    pub fn state(&self) -> CashBookState {
        if self.reconciliation.is_some() {
            CashBookState::Reconciled
        } else {
            CashBookState::Computed
        }
    }

    pub fn is_reconciled(&self) -> bool {
        self.reconciliation.is_some()
    }

    pub fn discrepancy(&self) -> Option<&BigDecimal> {
        self.reconciliation.as_ref().map(|r| &r.discrepancy)
    }
}

/// Inventory trade kinds as reported by the inventory subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeType {
    Buy,
    Sell,
    Processing,
    Wastage,
}

/// Read-only inventory trade from the inventory feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryTrade {
    pub id: String,
    pub trade_type: TradeType,
    pub total_amount: BigDecimal,
    pub payment_mode: PaymentMode,
    pub date: NaiveDateTime,
}

/// Wage transaction kinds as reported by the wage subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WageTransactionType {
    Wage,
    Advance,
    /// Negative amounts are advances returned by the worker
    AdvanceAdjustment,
}

/// Read-only wage transaction from the wage feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WageTransaction {
    pub id: String,
    pub transaction_type: WageTransactionType,
    pub amount: BigDecimal,
    pub payment_mode: PaymentMode,
    pub date: NaiveDateTime,
}

/// Read-only operational expense from the expense feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationalExpense {
    pub id: String,
    pub category: String,
    pub amount: BigDecimal,
    pub payment_mode: PaymentMode,
    pub date: NaiveDateTime,
}

/// Inflow and outflow pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowTotals {
    pub cash_in: BigDecimal,
    pub cash_out: BigDecimal,
}

impl Default for FlowTotals {
    fn default() -> Self {
        Self {
            cash_in: BigDecimal::from(0),
            cash_out: BigDecimal::from(0),
        }
    }
}

impl FlowTotals {
    pub fn net(&self) -> BigDecimal {
        &self.cash_in - &self.cash_out
    }
}

/// Cash flow contributed by each transaction source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CashFlowBreakdown {
    pub inventory: FlowTotals,
    pub financial: FlowTotals,
    pub wages: FlowTotals,
    pub expenses: FlowTotals,
}

/// Cash-mode inflow and outflow for one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCashFlow {
    pub date: NaiveDate,
    pub total_cash_in: BigDecimal,
    pub total_cash_out: BigDecimal,
    pub breakdown: CashFlowBreakdown,
}

impl DailyCashFlow {
    pub fn net(&self) -> BigDecimal {
        &self.total_cash_in - &self.total_cash_out
    }
}

/// Cash flow over an inclusive date range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashFlowSummary {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: Vec<DailyCashFlow>,
    pub total_cash_in: BigDecimal,
    pub total_cash_out: BigDecimal,
    pub net_cash_flow: BigDecimal,
}

/// Aggregate view of one cash account's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account: CashAccount,
    pub total_credits: BigDecimal,
    pub total_debits: BigDecimal,
    pub change_count: usize,
    pub last_change_at: Option<NaiveDateTime>,
}

/// Totals across all cash accounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountsOverview {
    pub total_cash: BigDecimal,
    pub total_bank: BigDecimal,
    pub accounts: Vec<CashAccount>,
}

/// Outstanding totals across all loans
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanPortfolioSummary {
    pub total_given_outstanding: BigDecimal,
    pub total_taken_outstanding: BigDecimal,
    pub active_count: usize,
    pub partially_paid_count: usize,
    pub overdue_count: usize,
    pub closed_count: usize,
}

/// Snapshot of a deleted loan, sufficient to restore it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedLoan {
    pub loan: LoanAccount,
    pub transactions: Vec<FinancialTransaction>,
}

/// Errors that can occur in the ledger
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Loan not found: {0}")]
    LoanNotFound(String),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Party not found: {0}")]
    PartyNotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Already done: {0}")]
    AlreadyDone(String),
    #[error("Integrity guard: {0}")]
    IntegrityGuard(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// Whether the error means an id could not be resolved
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LedgerError::LoanNotFound(_)
                | LedgerError::TransactionNotFound(_)
                | LedgerError::AccountNotFound(_)
                | LedgerError::PartyNotFound(_)
        )
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
