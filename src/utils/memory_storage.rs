//! In-memory storage implementation for testing

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::traits::*;
use crate::types::*;

#[derive(Debug, Clone, Default)]
struct State {
    loans: HashMap<String, LoanAccount>,
    transactions: HashMap<String, FinancialTransaction>,
    accounts: HashMap<String, CashAccount>,
    history: Vec<BalanceHistory>,
    history_ids: HashSet<String>,
    cash_balances: BTreeMap<NaiveDate, CashBalance>,
}

impl State {
    fn apply(&mut self, op: WriteOp) -> LedgerResult<()> {
        match op {
            WriteOp::InsertLoan(loan) => {
                if self.loans.contains_key(&loan.id) {
                    return Err(LedgerError::Storage(format!(
                        "Loan '{}' already exists",
                        loan.id
                    )));
                }
                self.loans.insert(loan.id.clone(), loan);
            }
            WriteOp::UpdateLoan(loan) => {
                if !self.loans.contains_key(&loan.id) {
                    return Err(LedgerError::LoanNotFound(loan.id));
                }
                self.loans.insert(loan.id.clone(), loan);
            }
            WriteOp::DeleteLoan(loan_id) => {
                if self.loans.remove(&loan_id).is_none() {
                    return Err(LedgerError::LoanNotFound(loan_id));
                }
            }
            WriteOp::InsertTransaction(transaction) => {
                if self.transactions.contains_key(&transaction.id) {
                    return Err(LedgerError::Storage(format!(
                        "Transaction '{}' already exists",
                        transaction.id
                    )));
                }
                self.transactions
                    .insert(transaction.id.clone(), transaction);
            }
            WriteOp::DeleteTransaction(transaction_id) => {
                if self.transactions.remove(&transaction_id).is_none() {
                    return Err(LedgerError::TransactionNotFound(transaction_id));
                }
            }
            WriteOp::InsertAccount(account) => {
                if self.accounts.contains_key(&account.id) {
                    return Err(LedgerError::Storage(format!(
                        "Account '{}' already exists",
                        account.id
                    )));
                }
                self.accounts.insert(account.id.clone(), account);
            }
            WriteOp::UpdateAccount(account) => {
                if !self.accounts.contains_key(&account.id) {
                    return Err(LedgerError::AccountNotFound(account.id));
                }
                self.accounts.insert(account.id.clone(), account);
            }
            WriteOp::AppendHistory(entry) => {
                if !self.accounts.contains_key(&entry.account_id) {
                    return Err(LedgerError::AccountNotFound(entry.account_id));
                }
                if !self.history_ids.insert(entry.id.clone()) {
                    return Err(LedgerError::Storage(format!(
                        "History entry '{}' already exists",
                        entry.id
                    )));
                }
                self.history.push(entry);
            }
            WriteOp::InsertCashBalance(record) => {
                if self.cash_balances.contains_key(&record.date) {
                    return Err(LedgerError::InvalidState(format!(
                        "A cash book record for {} already exists",
                        record.date
                    )));
                }
                self.cash_balances.insert(record.date, record);
            }
            WriteOp::UpsertCashBalance(record) => {
                self.cash_balances.insert(record.date, record);
            }
        }
        Ok(())
    }
}

fn in_range(at: NaiveDateTime, start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> bool {
    start.is_none_or(|s| at >= s) && end.is_none_or(|e| at < e)
}

/// In-memory storage implementation for testing and development
///
/// Each commit is staged on a copy of the current state and swapped in only
/// when every op succeeds.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<RwLock<State>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail with a storage error before touching any data
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of history rows across all accounts
    pub fn history_len(&self) -> usize {
        self.state.read().unwrap().history.len()
    }
}

#[async_trait]
impl LedgerStorage for MemoryStorage {
    async fn commit(&self, batch: WriteBatch) -> LedgerResult<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(LedgerError::Storage("Simulated commit failure".to_string()));
        }

        let mut state = self.state.write().unwrap();
        let mut staged = state.clone();
        for op in batch.into_ops() {
            staged.apply(op)?;
        }
        *state = staged;
        Ok(())
    }

    async fn get_loan(&self, loan_id: &str) -> LedgerResult<Option<LoanAccount>> {
        Ok(self.state.read().unwrap().loans.get(loan_id).cloned())
    }

    async fn list_loans(&self) -> LedgerResult<Vec<LoanAccount>> {
        let state = self.state.read().unwrap();
        let mut loans: Vec<LoanAccount> = state.loans.values().cloned().collect();
        loans.sort_by(|a, b| {
            (a.start_date, a.created_at, &a.id).cmp(&(b.start_date, b.created_at, &b.id))
        });
        Ok(loans)
    }

    async fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> LedgerResult<Option<FinancialTransaction>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .transactions
            .get(transaction_id)
            .cloned())
    }

    async fn get_loan_transactions(&self, loan_id: &str) -> LedgerResult<Vec<FinancialTransaction>> {
        let state = self.state.read().unwrap();
        let mut transactions: Vec<FinancialTransaction> = state
            .transactions
            .values()
            .filter(|txn| txn.loan_id.as_deref() == Some(loan_id))
            .cloned()
            .collect();
        transactions.sort_by(|a, b| (a.date, a.created_at).cmp(&(b.date, b.created_at)));
        Ok(transactions)
    }

    async fn get_transactions(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> LedgerResult<Vec<FinancialTransaction>> {
        let state = self.state.read().unwrap();
        let mut transactions: Vec<FinancialTransaction> = state
            .transactions
            .values()
            .filter(|txn| in_range(txn.date, start, end))
            .cloned()
            .collect();
        transactions.sort_by(|a, b| (a.date, a.created_at).cmp(&(b.date, b.created_at)));
        Ok(transactions)
    }

    async fn get_account(&self, account_id: &str) -> LedgerResult<Option<CashAccount>> {
        Ok(self.state.read().unwrap().accounts.get(account_id).cloned())
    }

    async fn list_accounts(
        &self,
        account_type: Option<CashAccountType>,
    ) -> LedgerResult<Vec<CashAccount>> {
        let state = self.state.read().unwrap();
        let mut accounts: Vec<CashAccount> = state
            .accounts
            .values()
            .filter(|account| account_type.is_none_or(|t| account.account_type == t))
            .cloned()
            .collect();
        accounts.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(accounts)
    }

    async fn get_balance_history(
        &self,
        account_id: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> LedgerResult<Vec<BalanceHistory>> {
        let state = self.state.read().unwrap();
        Ok(state
            .history
            .iter()
            .filter(|entry| entry.account_id == account_id)
            .filter(|entry| in_range(entry.changed_at, start, end))
            .cloned()
            .collect())
    }

    async fn get_transaction_history(
        &self,
        transaction_id: &str,
    ) -> LedgerResult<Vec<BalanceHistory>> {
        let state = self.state.read().unwrap();
        Ok(state
            .history
            .iter()
            .filter(|entry| entry.transaction_id.as_deref() == Some(transaction_id))
            .cloned()
            .collect())
    }

    async fn get_cash_balance(&self, date: NaiveDate) -> LedgerResult<Option<CashBalance>> {
        Ok(self.state.read().unwrap().cash_balances.get(&date).cloned())
    }

    async fn get_latest_cash_balance_before(
        &self,
        date: NaiveDate,
    ) -> LedgerResult<Option<CashBalance>> {
        let state = self.state.read().unwrap();
        Ok(state
            .cash_balances
            .range(..date)
            .next_back()
            .map(|(_, record)| record.clone()))
    }

    async fn get_latest_cash_balance(&self) -> LedgerResult<Option<CashBalance>> {
        let state = self.state.read().unwrap();
        Ok(state
            .cash_balances
            .values()
            .next_back()
            .cloned())
    }

    async fn list_cash_balances(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> LedgerResult<Vec<CashBalance>> {
        let state = self.state.read().unwrap();
        Ok(state
            .cash_balances
            .values()
            .filter(|record| start.is_none_or(|s| record.date >= s))
            .filter(|record| end.is_none_or(|e| record.date <= e))
            .cloned()
            .collect())
    }
}
