//! Forward/reverse effects of ledger events and the delete/restore coordinator
//!
//! Every mutable entity exposes one [`Reversible`] implementation. Live
//! operations and restores go through `apply`, deletes go through `reverse`,
//! so the arithmetic for both directions lives in one place.

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

use crate::ledger::balance::{stage_posting, stage_reversal, BalanceManager};
use crate::ledger::core::LedgerContext;
use crate::ledger::locks::{account_key, loan_key};
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::validate_actor;

/// An entity whose state is changed by events of type `E`
pub trait Reversible<E> {
    /// Apply the forward effect of `event` and re-derive dependent state
    fn apply(&mut self, event: &E, at: NaiveDateTime) -> LedgerResult<()>;

    /// Undo the effect of `event` and re-derive dependent state
    fn reverse(&mut self, event: &E, at: NaiveDateTime) -> LedgerResult<()>;
}

impl LoanAccount {
    fn check_owns(&self, transaction: &FinancialTransaction) -> LedgerResult<()> {
        if transaction.loan_id.as_deref() != Some(self.id.as_str()) {
            return Err(LedgerError::InvalidState(format!(
                "Transaction '{}' does not belong to loan '{}'",
                transaction.id, self.id
            )));
        }
        Ok(())
    }

    fn settle(&mut self, at: NaiveDateTime) {
        self.recompute_total();
        self.status = self.derive_status(at.date());
        self.updated_at = at;
    }
}

impl Reversible<FinancialTransaction> for LoanAccount {
    fn apply(&mut self, transaction: &FinancialTransaction, at: NaiveDateTime) -> LedgerResult<()> {
        self.check_owns(transaction)?;

        let kind = transaction.transaction_type;
        if kind.is_issue() {
            self.outstanding_principal = transaction.amount.clone();
            self.outstanding_interest = BigDecimal::from(0);
        } else if kind.is_interest() {
            self.outstanding_interest += transaction.interest_portion();
        } else if kind.is_payment() {
            let interest = transaction.interest_portion();
            let principal = &transaction.amount - &interest;
            self.outstanding_interest -= interest;
            self.outstanding_principal -= principal;
        }

        self.settle(at);
        Ok(())
    }

    fn reverse(
        &mut self,
        transaction: &FinancialTransaction,
        at: NaiveDateTime,
    ) -> LedgerResult<()> {
        self.check_owns(transaction)?;

        let kind = transaction.transaction_type;
        if kind.is_issue() {
            return Err(LedgerError::InvalidState(format!(
                "Transaction '{}' issued loan '{}'; delete the loan instead",
                transaction.id, self.id
            )));
        } else if kind.is_interest() {
            let remaining = &self.outstanding_interest - transaction.interest_portion();
            self.outstanding_interest = remaining.max(BigDecimal::from(0));
        } else if kind.is_payment() {
            let interest = transaction.interest_portion();
            let principal = &transaction.amount - &interest;
            self.outstanding_interest += interest;
            self.outstanding_principal += principal;
        }

        self.settle(at);
        Ok(())
    }
}

impl Reversible<BalanceHistory> for CashAccount {
    fn apply(&mut self, entry: &BalanceHistory, at: NaiveDateTime) -> LedgerResult<()> {
        if entry.account_id != self.id {
            return Err(LedgerError::InvalidState(format!(
                "History entry '{}' belongs to account '{}', not '{}'",
                entry.id, entry.account_id, self.id
            )));
        }
        self.current_balance += &entry.change_amount;
        self.updated_at = at;
        Ok(())
    }

    fn reverse(&mut self, entry: &BalanceHistory, at: NaiveDateTime) -> LedgerResult<()> {
        if entry.account_id != self.id {
            return Err(LedgerError::InvalidState(format!(
                "History entry '{}' belongs to account '{}', not '{}'",
                entry.id, entry.account_id, self.id
            )));
        }
        self.current_balance -= &entry.change_amount;
        self.updated_at = at;
        Ok(())
    }
}

/// Deletes ledger entities by reversing their effects, and restores them by replay
pub struct ReversalCoordinator<S: LedgerStorage> {
    ctx: LedgerContext<S>,
    accounts: BalanceManager<S>,
    parties: Arc<dyn PartyDirectory>,
}

impl<S: LedgerStorage> ReversalCoordinator<S> {
    pub(crate) fn new(
        ctx: LedgerContext<S>,
        accounts: BalanceManager<S>,
        parties: Arc<dyn PartyDirectory>,
    ) -> Self {
        Self {
            ctx,
            accounts,
            parties,
        }
    }

    /// Delete a payment or interest transaction, undoing its effect on the loan and on cash
    pub async fn delete_financial_transaction(
        &self,
        transaction_id: &str,
        actor: &str,
    ) -> LedgerResult<FinancialTransaction> {
        validate_actor(actor)?;

        let transaction = self.get_transaction_required(transaction_id).await?;
        if transaction.transaction_type.is_issue() && transaction.loan_id.is_some() {
            return Err(LedgerError::InvalidState(format!(
                "Transaction '{}' issued a loan; delete the loan instead",
                transaction_id
            )));
        }

        let postings = self.postings_by_account(transaction_id).await?;
        let mut keys: Vec<String> = postings.keys().map(|id| account_key(id)).collect();
        if let Some(loan_id) = &transaction.loan_id {
            keys.push(loan_key(loan_id));
        }
        let _guard = self.ctx.locks.lock_all(keys).await;

        // Re-read under the lock in case a concurrent delete got there first
        let transaction = self.get_transaction_required(transaction_id).await?;
        if transaction.transaction_type.is_interest() {
            self.check_interest_unsettled(&transaction).await?;
        }
        let now = self.ctx.clock.now();
        let mut batch = WriteBatch::new();

        if let Some(loan_id) = &transaction.loan_id {
            let mut loan = self.get_loan_required(loan_id).await?;
            loan.reverse(&transaction, now)?;
            batch.push(WriteOp::UpdateLoan(loan));
        }
        self.stage_posting_reversals(&mut batch, &postings, transaction_id, actor, now)
            .await?;
        batch.push(WriteOp::DeleteTransaction(transaction_id.to_string()));

        self.ctx.storage.commit(batch).await?;

        info!(
            transaction_id,
            transaction_type = ?transaction.transaction_type,
            amount = %transaction.amount,
            actor,
            "Financial transaction deleted"
        );
        Ok(transaction)
    }

    /// Delete a loan that has no transactions besides the one that issued it
    pub async fn delete_loan(&self, loan_id: &str, actor: &str) -> LedgerResult<DeletedLoan> {
        validate_actor(actor)?;

        let transactions = self.ctx.storage.get_loan_transactions(loan_id).await?;
        let mut postings = BTreeMap::new();
        for transaction in &transactions {
            for (account_id, rows) in self.postings_by_account(&transaction.id).await? {
                postings
                    .entry(account_id)
                    .or_insert_with(Vec::new)
                    .push((transaction.id.clone(), rows));
            }
        }

        let mut keys: Vec<String> = postings.keys().map(|id| account_key(id)).collect();
        keys.push(loan_key(loan_id));
        let _guard = self.ctx.locks.lock_all(keys).await;

        let loan = self.get_loan_required(loan_id).await?;
        let transactions = self.ctx.storage.get_loan_transactions(loan_id).await?;
        if let Some(other) = transactions
            .iter()
            .find(|t| !t.transaction_type.is_issue())
        {
            return Err(LedgerError::IntegrityGuard(format!(
                "Loan '{}' still has transaction '{}' ({:?}); delete its transactions first",
                loan_id, other.id, other.transaction_type
            )));
        }

        let now = self.ctx.clock.now();
        let mut batch = WriteBatch::new();
        for (account_id, per_transaction) in &postings {
            let mut account = self.accounts.get_account_required(account_id).await?;
            for (transaction_id, rows) in per_transaction {
                stage_reversal(&mut batch, &mut account, rows, transaction_id, actor, now)?;
            }
        }
        for transaction in &transactions {
            batch.push(WriteOp::DeleteTransaction(transaction.id.clone()));
        }
        batch.push(WriteOp::DeleteLoan(loan_id.to_string()));

        self.ctx.storage.commit(batch).await?;

        info!(
            loan_id,
            party_id = %loan.party_id,
            original_amount = %loan.original_amount,
            actor,
            "Loan deleted"
        );
        Ok(DeletedLoan { loan, transactions })
    }

    /// Re-insert a previously deleted transaction and replay its effects
    pub async fn restore_financial_transaction(
        &self,
        transaction: FinancialTransaction,
        actor: &str,
    ) -> LedgerResult<FinancialTransaction> {
        validate_actor(actor)?;

        if transaction.transaction_type.is_issue() && transaction.loan_id.is_some() {
            return Err(LedgerError::InvalidState(format!(
                "Transaction '{}' issued a loan; restore the loan instead",
                transaction.id
            )));
        }

        let posting_account = self.accounts.posting_account_id(&transaction).await?;
        let mut keys: Vec<String> = posting_account.iter().map(|id| account_key(id)).collect();
        if let Some(loan_id) = &transaction.loan_id {
            keys.push(loan_key(loan_id));
        }
        let _guard = self.ctx.locks.lock_all(keys).await;

        if self
            .ctx
            .storage
            .get_transaction(&transaction.id)
            .await?
            .is_some()
        {
            return Err(LedgerError::InvalidState(format!(
                "Transaction '{}' already exists",
                transaction.id
            )));
        }

        let now = self.ctx.clock.now();
        let mut batch = WriteBatch::new();
        if let Some(loan_id) = &transaction.loan_id {
            let mut loan = self.get_loan_required(loan_id).await?;
            loan.apply(&transaction, now)?;
            batch.push(WriteOp::UpdateLoan(loan));
        }
        batch.push(WriteOp::InsertTransaction(transaction.clone()));
        if let Some(account_id) = &posting_account {
            let mut account = self.accounts.get_account_required(account_id).await?;
            stage_posting(&mut batch, &mut account, &transaction, actor, now)?;
        }

        self.ctx.storage.commit(batch).await?;

        info!(
            transaction_id = %transaction.id,
            transaction_type = ?transaction.transaction_type,
            actor,
            "Financial transaction restored"
        );
        Ok(transaction)
    }

    /// Re-create a deleted loan by replaying its transactions in date order
    pub async fn restore_loan(&self, snapshot: DeletedLoan, actor: &str) -> LedgerResult<LoanAccount> {
        validate_actor(actor)?;

        let DeletedLoan {
            loan: original,
            mut transactions,
        } = snapshot;

        if self.parties.party_name(&original.party_id).await?.is_none() {
            return Err(LedgerError::PartyNotFound(original.party_id.clone()));
        }
        if transactions
            .iter()
            .any(|t| t.loan_id.as_deref() != Some(original.id.as_str()))
        {
            return Err(LedgerError::Validation(format!(
                "Snapshot of loan '{}' contains transactions of another loan",
                original.id
            )));
        }
        if !transactions.iter().any(|t| t.transaction_type.is_issue()) {
            return Err(LedgerError::Validation(format!(
                "Snapshot of loan '{}' has no issuing transaction",
                original.id
            )));
        }

        // Issuing transaction first on its date, then chronological
        transactions.sort_by(|a, b| {
            (a.date, !a.transaction_type.is_issue(), a.created_at).cmp(&(
                b.date,
                !b.transaction_type.is_issue(),
                b.created_at,
            ))
        });

        let mut posting_accounts = BTreeMap::new();
        for transaction in &transactions {
            if let Some(account_id) = self.accounts.posting_account_id(transaction).await? {
                posting_accounts.insert(transaction.id.clone(), account_id);
            }
        }
        let account_ids: BTreeSet<&String> = posting_accounts.values().collect();
        let mut keys: Vec<String> = account_ids.iter().map(|id| account_key(id)).collect();
        keys.push(loan_key(&original.id));
        let _guard = self.ctx.locks.lock_all(keys).await;

        if self.ctx.storage.get_loan(&original.id).await?.is_some() {
            return Err(LedgerError::InvalidState(format!(
                "Loan '{}' already exists",
                original.id
            )));
        }
        for transaction in &transactions {
            if self
                .ctx
                .storage
                .get_transaction(&transaction.id)
                .await?
                .is_some()
            {
                return Err(LedgerError::InvalidState(format!(
                    "Transaction '{}' already exists",
                    transaction.id
                )));
            }
        }

        let now = self.ctx.clock.now();
        let mut loan = original.clone();
        loan.outstanding_principal = original.original_amount.clone();
        loan.outstanding_interest = BigDecimal::from(0);
        for transaction in &transactions {
            loan.apply(transaction, now)?;
        }

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::InsertLoan(loan.clone()));
        let mut accounts: BTreeMap<String, CashAccount> = BTreeMap::new();
        for transaction in &transactions {
            batch.push(WriteOp::InsertTransaction(transaction.clone()));
            if let Some(account_id) = posting_accounts.get(&transaction.id) {
                if !accounts.contains_key(account_id) {
                    let account = self.accounts.get_account_required(account_id).await?;
                    accounts.insert(account_id.clone(), account);
                }
                if let Some(account) = accounts.get_mut(account_id) {
                    stage_posting(&mut batch, account, transaction, actor, now)?;
                }
            }
        }

        self.ctx.storage.commit(batch).await?;

        info!(
            loan_id = %loan.id,
            transactions = transactions.len(),
            total_outstanding = %loan.total_outstanding,
            actor,
            "Loan restored"
        );
        Ok(loan)
    }

    /// An accrual can only be undone exactly while no later payment has settled interest
    async fn check_interest_unsettled(&self, accrual: &FinancialTransaction) -> LedgerResult<()> {
        let Some(loan_id) = &accrual.loan_id else {
            return Ok(());
        };
        let zero = BigDecimal::from(0);
        let settled_by = self
            .ctx
            .storage
            .get_loan_transactions(loan_id)
            .await?
            .into_iter()
            .find(|t| {
                t.id != accrual.id
                    && t.transaction_type.is_payment()
                    && (t.date, t.created_at) >= (accrual.date, accrual.created_at)
                    && t.interest_portion() != zero
            });

        match settled_by {
            Some(payment) => Err(LedgerError::InvalidState(format!(
                "Interest transaction '{}' was settled by payment '{}'; delete the payment first",
                accrual.id, payment.id
            ))),
            None => Ok(()),
        }
    }

    async fn get_transaction_required(
        &self,
        transaction_id: &str,
    ) -> LedgerResult<FinancialTransaction> {
        self.ctx
            .storage
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(transaction_id.to_string()))
    }

    async fn get_loan_required(&self, loan_id: &str) -> LedgerResult<LoanAccount> {
        self.ctx
            .storage
            .get_loan(loan_id)
            .await?
            .ok_or_else(|| LedgerError::LoanNotFound(loan_id.to_string()))
    }

    /// History rows linked to a transaction, grouped by account
    async fn postings_by_account(
        &self,
        transaction_id: &str,
    ) -> LedgerResult<BTreeMap<String, Vec<BalanceHistory>>> {
        let mut grouped: BTreeMap<String, Vec<BalanceHistory>> = BTreeMap::new();
        for row in self
            .ctx
            .storage
            .get_transaction_history(transaction_id)
            .await?
        {
            grouped.entry(row.account_id.clone()).or_default().push(row);
        }
        Ok(grouped)
    }

    async fn stage_posting_reversals(
        &self,
        batch: &mut WriteBatch,
        postings: &BTreeMap<String, Vec<BalanceHistory>>,
        transaction_id: &str,
        actor: &str,
        now: NaiveDateTime,
    ) -> LedgerResult<()> {
        for (account_id, rows) in postings {
            let mut account = self.accounts.get_account_required(account_id).await?;
            stage_reversal(batch, &mut account, rows, transaction_id, actor, now)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_time(NaiveTime::MIN)
    }

    fn loan() -> LoanAccount {
        LoanAccount {
            id: "loan-1".to_string(),
            party_id: "party-1".to_string(),
            direction: LoanDirection::Given,
            original_amount: BigDecimal::from(10000),
            interest_rate: BigDecimal::from(12),
            start_date: at(1).date(),
            due_date: None,
            outstanding_principal: BigDecimal::from(0),
            outstanding_interest: BigDecimal::from(0),
            total_outstanding: BigDecimal::from(0),
            status: LoanStatus::Active,
            notes: None,
            created_by: "operator".to_string(),
            created_at: at(1),
            updated_at: at(1),
        }
    }

    fn transaction(
        id: &str,
        transaction_type: FinancialTransactionType,
        amount: i64,
        interest: Option<i64>,
    ) -> FinancialTransaction {
        FinancialTransaction {
            id: id.to_string(),
            transaction_type,
            amount: BigDecimal::from(amount),
            interest_rate: None,
            interest_amount: interest.map(BigDecimal::from),
            date: at(2),
            loan_id: Some("loan-1".to_string()),
            party_id: Some("party-1".to_string()),
            payment_mode: PaymentMode::Cash,
            notes: None,
            created_by: "operator".to_string(),
            created_at: at(2),
        }
    }

    #[test]
    fn test_payment_reverse_is_exact_inverse() {
        let mut loan = loan();
        loan.apply(
            &transaction("t0", FinancialTransactionType::LoanGiven, 10000, None),
            at(1),
        )
        .unwrap();
        loan.apply(
            &transaction("t1", FinancialTransactionType::InterestReceived, 0, Some(500)),
            at(2),
        )
        .unwrap();
        let before = loan.clone();

        let payment = transaction("t2", FinancialTransactionType::LoanRepayment, 3000, Some(500));
        loan.apply(&payment, at(3)).unwrap();
        assert_eq!(loan.outstanding_interest, BigDecimal::from(0));
        assert_eq!(loan.outstanding_principal, BigDecimal::from(7500));
        assert_eq!(loan.status, LoanStatus::PartiallyPaid);

        loan.reverse(&payment, at(3)).unwrap();
        assert_eq!(loan.outstanding_principal, before.outstanding_principal);
        assert_eq!(loan.outstanding_interest, before.outstanding_interest);
        assert_eq!(loan.total_outstanding, before.total_outstanding);
        assert_eq!(loan.status, before.status);
    }

    #[test]
    fn test_legacy_payment_reverses_into_principal() {
        let mut loan = loan();
        loan.apply(
            &transaction("t0", FinancialTransactionType::LoanGiven, 10000, None),
            at(1),
        )
        .unwrap();
        let payment = transaction("t1", FinancialTransactionType::LoanRepayment, 2000, None);
        loan.apply(&payment, at(2)).unwrap();
        loan.reverse(&payment, at(2)).unwrap();
        assert_eq!(loan.outstanding_principal, BigDecimal::from(10000));
        assert!(loan.is_consistent());
    }

    #[test]
    fn test_interest_reversal_floors_at_zero() {
        let mut loan = loan();
        loan.apply(
            &transaction("t0", FinancialTransactionType::LoanGiven, 10000, None),
            at(1),
        )
        .unwrap();
        loan.apply(
            &transaction("t1", FinancialTransactionType::InterestReceived, 0, Some(100)),
            at(2),
        )
        .unwrap();

        loan.reverse(
            &transaction("t2", FinancialTransactionType::InterestReceived, 0, Some(250)),
            at(2),
        )
        .unwrap();
        assert_eq!(loan.outstanding_interest, BigDecimal::from(0));
        assert_eq!(loan.total_outstanding, BigDecimal::from(10000));
    }

    #[test]
    fn test_issue_transaction_cannot_be_reversed() {
        let mut loan = loan();
        let issue = transaction("t0", FinancialTransactionType::LoanGiven, 10000, None);
        loan.apply(&issue, at(1)).unwrap();
        assert!(matches!(
            loan.reverse(&issue, at(1)),
            Err(LedgerError::InvalidState(_))
        ));
    }

    #[test]
    fn test_foreign_transaction_rejected() {
        let mut loan = loan();
        let mut foreign = transaction("t0", FinancialTransactionType::LoanGiven, 10000, None);
        foreign.loan_id = Some("other".to_string());
        assert!(loan.apply(&foreign, at(1)).is_err());
    }
}
