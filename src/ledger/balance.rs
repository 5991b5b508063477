//! Cash account management and the balance mutation service

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ledger::core::LedgerContext;
use crate::ledger::locks::account_key;
use crate::ledger::reversal::Reversible;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::*;

/// Parameters of a single balance change
#[derive(Debug, Clone)]
pub struct BalanceChange<'a> {
    pub amount: BigDecimal,
    pub change_type: BalanceChangeType,
    pub notes: Option<&'a str>,
    pub actor: &'a str,
    pub transaction_id: Option<&'a str>,
}

/// Account manager owning every write to `CashAccount::current_balance`
pub struct BalanceManager<S: LedgerStorage> {
    ctx: LedgerContext<S>,
}

impl<S: LedgerStorage> Clone for BalanceManager<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<S: LedgerStorage> BalanceManager<S> {
    pub(crate) fn new(ctx: LedgerContext<S>) -> Self {
        Self { ctx }
    }

    /// Create a new cash or bank account
    pub async fn create_account(
        &self,
        name: &str,
        account_type: CashAccountType,
        opening_balance: BigDecimal,
        actor: &str,
    ) -> LedgerResult<CashAccount> {
        validate_account_name(name)?;
        validate_actor(actor)?;

        let now = self.ctx.clock.now();
        let account = CashAccount {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            account_type,
            opening_balance: opening_balance.clone(),
            current_balance: opening_balance,
            created_by: actor.to_string(),
            created_at: now,
            updated_at: now,
        };

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::InsertAccount(account.clone()));
        self.ctx.storage.commit(batch).await?;

        info!(
            account_id = %account.id,
            account_type = ?account.account_type,
            opening_balance = %account.opening_balance,
            actor,
            "Cash account created"
        );
        Ok(account)
    }

    /// Apply a signed amount to an account and append its history row atomically
    pub async fn apply_balance_change(
        &self,
        account_id: &str,
        change: BalanceChange<'_>,
    ) -> LedgerResult<BalanceHistory> {
        validate_non_zero_amount(&change.amount)?;
        validate_actor(change.actor)?;
        validate_notes(change.notes)?;

        let _guard = self.ctx.locks.lock(account_key(account_id)).await;
        let mut account = self.get_account_required(account_id).await?;

        let mut batch = WriteBatch::new();
        let entry = stage_change(&mut batch, &mut account, &change, self.ctx.clock.now())?;
        self.ctx.storage.commit(batch).await?;

        info!(
            account_id,
            change_type = ?entry.change_type,
            change_amount = %entry.change_amount,
            new_balance = %entry.new_balance,
            actor = change.actor,
            "Balance updated"
        );
        Ok(entry)
    }

    /// Get an account by ID
    pub async fn get_account(&self, account_id: &str) -> LedgerResult<Option<CashAccount>> {
        self.ctx.storage.get_account(account_id).await
    }

    /// Get an account by ID, returning an error if not found
    pub async fn get_account_required(&self, account_id: &str) -> LedgerResult<CashAccount> {
        self.ctx
            .storage
            .get_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
    }

    /// List accounts, optionally by type
    pub async fn list_accounts(
        &self,
        account_type: Option<CashAccountType>,
    ) -> LedgerResult<Vec<CashAccount>> {
        self.ctx.storage.list_accounts(account_type).await
    }

    pub async fn get_current_balance(&self, account_id: &str) -> LedgerResult<BigDecimal> {
        Ok(self.get_account_required(account_id).await?.current_balance)
    }

    /// History rows of an account, oldest first
    pub async fn get_balance_history(
        &self,
        account_id: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> LedgerResult<Vec<BalanceHistory>> {
        self.get_account_required(account_id).await?;
        self.ctx
            .storage
            .get_balance_history(account_id, start, end)
            .await
    }

    pub async fn get_account_summary(&self, account_id: &str) -> LedgerResult<AccountSummary> {
        let account = self.get_account_required(account_id).await?;
        let history = self
            .ctx
            .storage
            .get_balance_history(account_id, None, None)
            .await?;

        let zero = BigDecimal::from(0);
        let total_credits: BigDecimal = history
            .iter()
            .filter(|h| h.change_amount > zero)
            .map(|h| &h.change_amount)
            .sum();
        let total_debits: BigDecimal = history
            .iter()
            .filter(|h| h.change_amount < zero)
            .map(|h| h.change_amount.abs())
            .sum();

        Ok(AccountSummary {
            total_credits,
            total_debits,
            change_count: history.len(),
            last_change_at: history.iter().map(|h| h.changed_at).max(),
            account,
        })
    }

    pub async fn get_accounts_overview(&self) -> LedgerResult<AccountsOverview> {
        let accounts = self.list_accounts(None).await?;
        let total_of = |account_type: CashAccountType| -> BigDecimal {
            accounts
                .iter()
                .filter(|a| a.account_type == account_type)
                .map(|a| &a.current_balance)
                .sum()
        };

        Ok(AccountsOverview {
            total_cash: total_of(CashAccountType::Cash),
            total_bank: total_of(CashAccountType::Bank),
            accounts,
        })
    }

    /// Account that receives the cash effect of a transaction, if any
    pub async fn posting_account_id(
        &self,
        transaction: &FinancialTransaction,
    ) -> LedgerResult<Option<String>> {
        if !transaction.moves_money() {
            return Ok(None);
        }
        self.posting_account_for(transaction.payment_mode).await
    }

    /// Account that receives postings made in `mode`, if any
    ///
    /// A configured account id must exist; otherwise the oldest account of the
    /// matching type is used.
    pub async fn posting_account_for(&self, mode: PaymentMode) -> LedgerResult<Option<String>> {
        if !self.ctx.config.posting.enabled {
            return Ok(None);
        }
        let Some(account_type) = mode.account_type() else {
            return Ok(None);
        };

        if let Some(configured) = self.ctx.config.posting.account_for(account_type) {
            self.get_account_required(configured).await?;
            return Ok(Some(configured.to_string()));
        }

        let candidate = self
            .list_accounts(Some(account_type))
            .await?
            .into_iter()
            .next()
            .map(|account| account.id);

        if candidate.is_none() {
            debug!(
                payment_mode = ?mode,
                "No account to post {:?} transactions to, skipping", account_type
            );
        }
        Ok(candidate)
    }
}

/// Build a history row for `change`, apply it to `account` and stage both writes
pub(crate) fn stage_change(
    batch: &mut WriteBatch,
    account: &mut CashAccount,
    change: &BalanceChange<'_>,
    now: NaiveDateTime,
) -> LedgerResult<BalanceHistory> {
    let entry = BalanceHistory {
        id: Uuid::new_v4().to_string(),
        account_id: account.id.clone(),
        change_type: change.change_type,
        previous_balance: account.current_balance.clone(),
        change_amount: change.amount.clone(),
        new_balance: &account.current_balance + &change.amount,
        transaction_id: change.transaction_id.map(str::to_string),
        notes: change.notes.map(str::to_string),
        changed_by: change.actor.to_string(),
        changed_at: now,
    };

    account.apply(&entry, now)?;
    batch.push(WriteOp::UpdateAccount(account.clone()));
    batch.push(WriteOp::AppendHistory(entry.clone()));
    Ok(entry)
}

/// Post the cash effect of a loan-engine transaction to `account`
pub(crate) fn stage_posting(
    batch: &mut WriteBatch,
    account: &mut CashAccount,
    transaction: &FinancialTransaction,
    actor: &str,
    now: NaiveDateTime,
) -> LedgerResult<BalanceHistory> {
    let notes = format!("{:?} {}", transaction.transaction_type, transaction.id);
    stage_change(
        batch,
        account,
        &BalanceChange {
            amount: transaction.signed_cash_amount(),
            change_type: BalanceChangeType::LoanPosting,
            notes: Some(&notes),
            actor,
            transaction_id: Some(&transaction.id),
        },
        now,
    )
}

/// Undo every history row in `rows` on `account` with one compensating entry
///
/// Returns `None` when the rows already net to zero.
pub(crate) fn stage_reversal(
    batch: &mut WriteBatch,
    account: &mut CashAccount,
    rows: &[BalanceHistory],
    transaction_id: &str,
    actor: &str,
    now: NaiveDateTime,
) -> LedgerResult<Option<BalanceHistory>> {
    let mut reversed = account.clone();
    for row in rows {
        reversed.reverse(row, now)?;
    }

    let amount = &reversed.current_balance - &account.current_balance;
    if amount == BigDecimal::from(0) {
        return Ok(None);
    }

    let notes = format!("Reversal of {transaction_id}");
    stage_change(
        batch,
        account,
        &BalanceChange {
            amount,
            change_type: BalanceChangeType::Reversal,
            notes: Some(&notes),
            actor,
            transaction_id: Some(transaction_id),
        },
        now,
    )
    .map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::core::LedgerBuilder;
    use crate::utils::{MemoryPartyDirectory, MemoryStorage};

    fn change(amount: i64, change_type: BalanceChangeType) -> BalanceChange<'static> {
        BalanceChange {
            amount: BigDecimal::from(amount),
            change_type,
            notes: None,
            actor: "operator",
            transaction_id: None,
        }
    }

    #[tokio::test]
    async fn test_balance_equals_opening_plus_history() {
        let storage = MemoryStorage::new();
        let ledger = LedgerBuilder::new(storage, MemoryPartyDirectory::new())
            .build()
            .unwrap();
        let accounts = ledger.accounts();

        let till = accounts
            .create_account("Till", CashAccountType::Cash, BigDecimal::from(1000), "operator")
            .await
            .unwrap();

        accounts
            .apply_balance_change(&till.id, change(250, BalanceChangeType::Deposit))
            .await
            .unwrap();
        let entry = accounts
            .apply_balance_change(&till.id, change(-400, BalanceChangeType::Withdrawal))
            .await
            .unwrap();

        assert_eq!(entry.previous_balance, BigDecimal::from(1250));
        assert_eq!(entry.new_balance, BigDecimal::from(850));

        let account = accounts.get_account_required(&till.id).await.unwrap();
        let history = accounts.get_balance_history(&till.id, None, None).await.unwrap();
        let sum: BigDecimal = history.iter().map(|h| &h.change_amount).sum();
        assert_eq!(account.current_balance, &account.opening_balance + &sum);

        let summary = accounts.get_account_summary(&till.id).await.unwrap();
        assert_eq!(summary.total_credits, BigDecimal::from(250));
        assert_eq!(summary.total_debits, BigDecimal::from(400));
        assert_eq!(summary.change_count, 2);
    }

    #[tokio::test]
    async fn test_unknown_account_is_not_found() {
        let ledger = LedgerBuilder::new(MemoryStorage::new(), MemoryPartyDirectory::new())
            .build()
            .unwrap();
        let result = ledger
            .accounts()
            .apply_balance_change("missing", change(10, BalanceChangeType::Deposit))
            .await;
        assert!(matches!(result, Err(LedgerError::AccountNotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_balance_and_history_unchanged() {
        let storage = MemoryStorage::new();
        let ledger = LedgerBuilder::new(storage.clone(), MemoryPartyDirectory::new())
            .build()
            .unwrap();
        let till = ledger
            .accounts()
            .create_account("Till", CashAccountType::Cash, BigDecimal::from(100), "operator")
            .await
            .unwrap();

        storage.fail_next_commit();
        let result = ledger
            .accounts()
            .apply_balance_change(&till.id, change(50, BalanceChangeType::Deposit))
            .await;

        assert!(matches!(result, Err(LedgerError::Storage(_))));
        assert_eq!(
            ledger.accounts().get_current_balance(&till.id).await.unwrap(),
            BigDecimal::from(100)
        );
        assert_eq!(storage.history_len(), 0);
    }

    #[tokio::test]
    async fn test_overview_totals_by_type() {
        let ledger = LedgerBuilder::new(MemoryStorage::new(), MemoryPartyDirectory::new())
            .build()
            .unwrap();
        let accounts = ledger.accounts();
        accounts
            .create_account("Till", CashAccountType::Cash, BigDecimal::from(300), "operator")
            .await
            .unwrap();
        accounts
            .create_account("Safe", CashAccountType::Cash, BigDecimal::from(200), "operator")
            .await
            .unwrap();
        accounts
            .create_account("Current", CashAccountType::Bank, BigDecimal::from(5000), "operator")
            .await
            .unwrap();

        let overview = accounts.get_accounts_overview().await.unwrap();
        assert_eq!(overview.total_cash, BigDecimal::from(500));
        assert_eq!(overview.total_bank, BigDecimal::from(5000));
        assert_eq!(overview.accounts.len(), 3);
    }
}
