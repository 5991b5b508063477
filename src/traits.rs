//! Traits for storage abstraction and the collaborators around the ledger

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use crate::types::*;

/// A single write inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Fails if the loan id already exists
    InsertLoan(LoanAccount),
    /// Fails if the loan id does not exist
    UpdateLoan(LoanAccount),
    DeleteLoan(String),
    /// Fails if the transaction id already exists
    InsertTransaction(FinancialTransaction),
    DeleteTransaction(String),
    InsertAccount(CashAccount),
    UpdateAccount(CashAccount),
    /// History rows can only be appended
    AppendHistory(BalanceHistory),
    /// Fails if a record for that date already exists
    InsertCashBalance(CashBalance),
    UpsertCashBalance(CashBalance),
}

/// Unit of work committed atomically by [`LedgerStorage::commit`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Storage abstraction for the ledger
///
/// Reads are plain queries. Every mutation goes through [`commit`](Self::commit),
/// which must apply the whole batch or leave storage untouched, so a balance
/// update can never be persisted without its history row.
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    /// Apply every op in the batch, or none of them
    async fn commit(&self, batch: WriteBatch) -> LedgerResult<()>;

    async fn get_loan(&self, loan_id: &str) -> LedgerResult<Option<LoanAccount>>;

    async fn list_loans(&self) -> LedgerResult<Vec<LoanAccount>>;

    async fn get_transaction(&self, transaction_id: &str)
        -> LedgerResult<Option<FinancialTransaction>>;

    /// Transactions linked to a loan, ascending by date
    async fn get_loan_transactions(&self, loan_id: &str) -> LedgerResult<Vec<FinancialTransaction>>;

    /// Transactions with `start <= date < end`, ascending by date
    async fn get_transactions(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> LedgerResult<Vec<FinancialTransaction>>;

    async fn get_account(&self, account_id: &str) -> LedgerResult<Option<CashAccount>>;

    /// Accounts ascending by creation time, optionally filtered by type
    async fn list_accounts(
        &self,
        account_type: Option<CashAccountType>,
    ) -> LedgerResult<Vec<CashAccount>>;

    /// History rows of an account with `start <= changed_at < end`, in append order
    async fn get_balance_history(
        &self,
        account_id: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> LedgerResult<Vec<BalanceHistory>>;

    /// History rows linked to a transaction, in append order
    async fn get_transaction_history(&self, transaction_id: &str)
        -> LedgerResult<Vec<BalanceHistory>>;

    async fn get_cash_balance(&self, date: NaiveDate) -> LedgerResult<Option<CashBalance>>;

    /// Latest record strictly before `date`
    async fn get_latest_cash_balance_before(
        &self,
        date: NaiveDate,
    ) -> LedgerResult<Option<CashBalance>>;

    async fn get_latest_cash_balance(&self) -> LedgerResult<Option<CashBalance>>;

    /// Records with `start <= date <= end`, ascending by date
    async fn list_cash_balances(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> LedgerResult<Vec<CashBalance>>;
}

/// Name lookup for counterparties, owned by the party subsystem
#[async_trait]
pub trait PartyDirectory: Send + Sync {
    async fn party_name(&self, party_id: &str) -> LedgerResult<Option<String>>;
}

/// Inventory trades in `[start, end)`
#[async_trait]
pub trait InventoryFeed: Send + Sync {
    async fn trades_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> LedgerResult<Vec<InventoryTrade>>;
}

/// Wage transactions in `[start, end)`
#[async_trait]
pub trait WageFeed: Send + Sync {
    async fn wage_transactions_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> LedgerResult<Vec<WageTransaction>>;
}

/// Operational expenses in `[start, end)`
#[async_trait]
pub trait ExpenseFeed: Send + Sync {
    async fn expenses_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> LedgerResult<Vec<OperationalExpense>>;
}

/// Source of the current local time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Trait for implementing custom loan validation rules
pub trait LoanValidator: Send + Sync {
    /// Validate a loan before it is issued
    fn validate_new_loan(&self, loan: &NewLoan) -> LedgerResult<()>;

    /// Validate a payment before it is allocated
    fn validate_payment(&self, loan: &LoanAccount, amount: &bigdecimal::BigDecimal)
        -> LedgerResult<()>;
}

/// Default loan validator with the basic lending rules
pub struct DefaultLoanValidator;

impl LoanValidator for DefaultLoanValidator {
    fn validate_new_loan(&self, loan: &NewLoan) -> LedgerResult<()> {
        crate::utils::validation::validate_positive_amount(&loan.amount)?;
        crate::utils::validation::validate_rate(&loan.interest_rate)?;

        if loan.party_id.trim().is_empty() {
            return Err(LedgerError::Validation(
                "Party ID cannot be empty".to_string(),
            ));
        }

        if let Some(due_date) = loan.due_date {
            if due_date < loan.start_date {
                return Err(LedgerError::Validation(format!(
                    "Due date {} is before start date {}",
                    due_date, loan.start_date
                )));
            }
        }

        Ok(())
    }

    fn validate_payment(
        &self,
        loan: &LoanAccount,
        amount: &bigdecimal::BigDecimal,
    ) -> LedgerResult<()> {
        if loan.status == LoanStatus::Closed {
            return Err(LedgerError::InvalidState(format!(
                "Loan '{}' is closed",
                loan.id
            )));
        }

        if *amount <= bigdecimal::BigDecimal::from(0) {
            return Err(LedgerError::InvalidState(
                "Payment amount must be positive".to_string(),
            ));
        }

        if *amount > loan.total_outstanding {
            return Err(LedgerError::InvalidState(format!(
                "Payment {} exceeds total outstanding {} on loan '{}'",
                amount, loan.total_outstanding, loan.id
            )));
        }

        Ok(())
    }
}
