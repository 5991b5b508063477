//! Main ledger orchestrator that wires the loan engine, cash accounts, cash
//! flow and the cash book around one storage backend

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::config::LedgerConfig;
use crate::ledger::balance::{BalanceChange, BalanceManager};
use crate::ledger::cash_flow::CashFlowAggregator;
use crate::ledger::loan::LoanManager;
use crate::ledger::locks::EntityLocks;
use crate::ledger::reversal::ReversalCoordinator;
use crate::reconciliation::CashBookReconciler;
use crate::traits::*;
use crate::types::*;
use crate::utils::{EmptyFeed, SystemClock};

/// Shared handles every component works against
pub(crate) struct LedgerContext<S: LedgerStorage> {
    pub(crate) storage: Arc<S>,
    pub(crate) locks: Arc<EntityLocks>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: Arc<LedgerConfig>,
}

impl<S: LedgerStorage> Clone for LedgerContext<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            locks: self.locks.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
        }
    }
}

/// Builder for [`Ledger`]
///
/// Only storage and the party directory are required. The clock defaults to
/// [`SystemClock`], the transaction feeds to empty feeds and the config to
/// [`LedgerConfig::default`].
pub struct LedgerBuilder<S: LedgerStorage> {
    storage: S,
    parties: Arc<dyn PartyDirectory>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
    inventory: Arc<dyn InventoryFeed>,
    wages: Arc<dyn WageFeed>,
    expenses: Arc<dyn ExpenseFeed>,
    loan_validator: Option<Box<dyn LoanValidator>>,
}

impl<S: LedgerStorage> LedgerBuilder<S> {
    pub fn new(storage: S, parties: impl PartyDirectory + 'static) -> Self {
        Self {
            storage,
            parties: Arc::new(parties),
            clock: Arc::new(SystemClock),
            config: LedgerConfig::default(),
            inventory: Arc::new(EmptyFeed),
            wages: Arc::new(EmptyFeed),
            expenses: Arc::new(EmptyFeed),
            loan_validator: None,
        }
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(mut self, config: LedgerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn inventory_feed(mut self, feed: impl InventoryFeed + 'static) -> Self {
        self.inventory = Arc::new(feed);
        self
    }

    pub fn wage_feed(mut self, feed: impl WageFeed + 'static) -> Self {
        self.wages = Arc::new(feed);
        self
    }

    pub fn expense_feed(mut self, feed: impl ExpenseFeed + 'static) -> Self {
        self.expenses = Arc::new(feed);
        self
    }

    /// Replace the default lending rules
    pub fn loan_validator(mut self, validator: Box<dyn LoanValidator>) -> Self {
        self.loan_validator = Some(validator);
        self
    }

    /// Assemble the ledger, rejecting an invalid config with `LedgerError::Config`
    pub fn build(self) -> LedgerResult<Ledger<S>> {
        self.config.validate()?;

        let ctx = LedgerContext {
            storage: Arc::new(self.storage),
            locks: Arc::new(EntityLocks::new()),
            clock: self.clock,
            config: Arc::new(self.config),
        };

        let accounts = BalanceManager::new(ctx.clone());
        let loans = match self.loan_validator {
            Some(validator) => LoanManager::with_validator(
                ctx.clone(),
                accounts.clone(),
                self.parties.clone(),
                validator,
            ),
            None => LoanManager::new(ctx.clone(), accounts.clone(), self.parties.clone()),
        };
        let reversals = ReversalCoordinator::new(ctx.clone(), accounts.clone(), self.parties);
        let cash_flow =
            CashFlowAggregator::new(ctx.clone(), self.inventory, self.wages, self.expenses);
        let cash_book = CashBookReconciler::new(ctx.clone(), cash_flow.clone());

        Ok(Ledger {
            ctx,
            loans,
            accounts,
            reversals,
            cash_flow,
            cash_book,
        })
    }
}

/// Main ledger system that orchestrates all financial operations
///
/// Every mutating call takes the acting operator explicitly; the ledger keeps
/// no notion of a current user.
pub struct Ledger<S: LedgerStorage> {
    ctx: LedgerContext<S>,
    loans: LoanManager<S>,
    accounts: BalanceManager<S>,
    reversals: ReversalCoordinator<S>,
    cash_flow: CashFlowAggregator<S>,
    cash_book: CashBookReconciler<S>,
}

impl<S: LedgerStorage> Ledger<S> {
    pub fn loans(&self) -> &LoanManager<S> {
        &self.loans
    }

    pub fn accounts(&self) -> &BalanceManager<S> {
        &self.accounts
    }

    pub fn reversals(&self) -> &ReversalCoordinator<S> {
        &self.reversals
    }

    pub fn cash_flow(&self) -> &CashFlowAggregator<S> {
        &self.cash_flow
    }

    pub fn cash_book(&self) -> &CashBookReconciler<S> {
        &self.cash_book
    }

    pub fn storage(&self) -> &S {
        &self.ctx.storage
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.ctx.config
    }

    // Loan operations
    /// Issue a new loan
    pub async fn create_loan(
        &self,
        loan: NewLoan,
        payment_mode: PaymentMode,
        actor: &str,
    ) -> LedgerResult<LoanAccount> {
        self.loans.create_loan(loan, payment_mode, actor).await
    }

    /// Record a payment against a loan
    pub async fn record_payment(
        &self,
        loan_id: &str,
        amount: BigDecimal,
        payment_mode: PaymentMode,
        notes: Option<&str>,
        actor: &str,
    ) -> LedgerResult<FinancialTransaction> {
        self.loans
            .record_payment(loan_id, amount, payment_mode, notes, actor)
            .await
    }

    /// Accrue interest on a loan up to now
    pub async fn accrue_interest(
        &self,
        loan_id: &str,
        actor: &str,
    ) -> LedgerResult<FinancialTransaction> {
        self.loans.accrue_interest(loan_id, actor).await
    }

    pub async fn refresh_overdue_statuses(&self, actor: &str) -> LedgerResult<usize> {
        self.loans.refresh_overdue_statuses(actor).await
    }

    /// Get a loan by ID
    pub async fn get_loan(&self, loan_id: &str) -> LedgerResult<Option<LoanAccount>> {
        self.loans.get_loan(loan_id).await
    }

    pub async fn get_loans_by_party(&self, party_id: &str) -> LedgerResult<Vec<LoanAccount>> {
        self.loans.get_loans_by_party(party_id).await
    }

    pub async fn get_loans_by_status(&self, status: LoanStatus) -> LedgerResult<Vec<LoanAccount>> {
        self.loans.get_loans_by_status(status).await
    }

    /// Get a financial transaction by ID
    pub async fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> LedgerResult<Option<FinancialTransaction>> {
        self.loans.get_transaction(transaction_id).await
    }

    pub async fn get_loan_transactions(
        &self,
        loan_id: &str,
    ) -> LedgerResult<Vec<FinancialTransaction>> {
        self.loans.get_loan_transactions(loan_id).await
    }

    pub async fn get_transactions_by_party(
        &self,
        party_id: &str,
    ) -> LedgerResult<Vec<FinancialTransaction>> {
        self.loans.get_transactions_by_party(party_id).await
    }

    pub async fn get_transactions_by_type(
        &self,
        transaction_type: FinancialTransactionType,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> LedgerResult<Vec<FinancialTransaction>> {
        self.loans
            .get_transactions_by_type(transaction_type, start, end)
            .await
    }

    pub async fn get_loan_portfolio_summary(&self) -> LedgerResult<LoanPortfolioSummary> {
        self.loans.get_portfolio_summary().await
    }

    // Reversal and restore operations
    /// Delete a loan that has no transactions besides its issue
    pub async fn delete_loan(&self, loan_id: &str, actor: &str) -> LedgerResult<DeletedLoan> {
        self.reversals.delete_loan(loan_id, actor).await
    }

    /// Delete a payment or interest transaction, reversing its effect
    pub async fn delete_financial_transaction(
        &self,
        transaction_id: &str,
        actor: &str,
    ) -> LedgerResult<FinancialTransaction> {
        self.reversals
            .delete_financial_transaction(transaction_id, actor)
            .await
    }

    pub async fn restore_loan(&self, snapshot: DeletedLoan, actor: &str) -> LedgerResult<LoanAccount> {
        self.reversals.restore_loan(snapshot, actor).await
    }

    pub async fn restore_financial_transaction(
        &self,
        transaction: FinancialTransaction,
        actor: &str,
    ) -> LedgerResult<FinancialTransaction> {
        self.reversals
            .restore_financial_transaction(transaction, actor)
            .await
    }

    // Cash account operations
    /// Create a new cash or bank account
    pub async fn create_account(
        &self,
        name: &str,
        account_type: CashAccountType,
        opening_balance: BigDecimal,
        actor: &str,
    ) -> LedgerResult<CashAccount> {
        self.accounts
            .create_account(name, account_type, opening_balance, actor)
            .await
    }

    /// Apply a signed change to an account balance
    pub async fn update_balance(
        &self,
        account_id: &str,
        change: BalanceChange<'_>,
    ) -> LedgerResult<BalanceHistory> {
        self.accounts.apply_balance_change(account_id, change).await
    }

    pub async fn get_current_balance(&self, account_id: &str) -> LedgerResult<BigDecimal> {
        self.accounts.get_current_balance(account_id).await
    }

    pub async fn get_balance_history(
        &self,
        account_id: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> LedgerResult<Vec<BalanceHistory>> {
        self.accounts
            .get_balance_history(account_id, start, end)
            .await
    }

    pub async fn get_account_summary(&self, account_id: &str) -> LedgerResult<AccountSummary> {
        self.accounts.get_account_summary(account_id).await
    }

    pub async fn get_accounts_overview(&self) -> LedgerResult<AccountsOverview> {
        self.accounts.get_accounts_overview().await
    }

    // Cash book operations
    /// Seed the cash book with a counted opening balance
    pub async fn set_opening_balance(
        &self,
        date: NaiveDate,
        amount: BigDecimal,
        actor: &str,
    ) -> LedgerResult<CashBalance> {
        self.cash_book.set_opening_balance(date, amount, actor).await
    }

    /// Compute or refresh the daily record for `date`
    pub async fn create_or_update_daily_record(
        &self,
        date: NaiveDate,
        actor: &str,
    ) -> LedgerResult<CashBalance> {
        self.cash_book.recompute_daily(date, actor).await
    }

    pub async fn reconcile_cash(
        &self,
        date: NaiveDate,
        actual_cash_counted: BigDecimal,
        actor: &str,
        reason: Option<&str>,
        notes: Option<&str>,
    ) -> LedgerResult<CashBalance> {
        self.cash_book
            .reconcile(date, actual_cash_counted, actor, reason, notes)
            .await
    }

    pub async fn get_cash_flow_for_date(&self, date: NaiveDate) -> LedgerResult<DailyCashFlow> {
        self.cash_flow.compute_cash_flow(date).await
    }

    pub async fn get_cash_flow_summary(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> LedgerResult<CashFlowSummary> {
        self.cash_flow.get_cash_flow_summary(start, end).await
    }

    pub async fn get_unreconciled_days(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> LedgerResult<Vec<CashBalance>> {
        self.cash_book.get_unreconciled_days(start, end).await
    }

    pub async fn get_days_with_discrepancies(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> LedgerResult<Vec<CashBalance>> {
        self.cash_book.get_days_with_discrepancies(start, end).await
    }

    /// Validate the integrity of the ledger
    pub async fn validate_integrity(&self) -> LedgerResult<LedgerIntegrityReport> {
        let mut issues = Vec::new();

        let loans = self.ctx.storage.list_loans().await?;
        for loan in &loans {
            if !loan.is_consistent() {
                issues.push(format!(
                    "Loan '{}' total {} != principal {} + interest {}",
                    loan.id,
                    loan.total_outstanding,
                    loan.outstanding_principal,
                    loan.outstanding_interest
                ));
            }
        }

        let accounts = self.ctx.storage.list_accounts(None).await?;
        for account in &accounts {
            let history = self
                .ctx
                .storage
                .get_balance_history(&account.id, None, None)
                .await?;
            let changes: BigDecimal = history.iter().map(|h| &h.change_amount).sum();
            let expected = &account.opening_balance + &changes;
            if account.current_balance != expected {
                issues.push(format!(
                    "Account '{}' balance {} != opening {} + history {}",
                    account.id, account.current_balance, account.opening_balance, changes
                ));
            }
        }

        for issue in &issues {
            warn!(issue = %issue, "Ledger integrity violation");
        }

        Ok(LedgerIntegrityReport {
            checked_at: self.ctx.clock.now(),
            is_valid: issues.is_empty(),
            issues,
            loans_checked: loans.len(),
            accounts_checked: accounts.len(),
        })
    }
}

/// Report on ledger integrity and validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerIntegrityReport {
    pub checked_at: NaiveDateTime,
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub loans_checked: usize,
    pub accounts_checked: usize,
}
