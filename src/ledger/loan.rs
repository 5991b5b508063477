//! Loan accrual engine: issuance, simple-interest accrual and payment allocation

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{NaiveDateTime, NaiveTime};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ledger::balance::{stage_posting, BalanceManager};
use crate::ledger::core::LedgerContext;
use crate::ledger::locks::{account_key, loan_key};
use crate::ledger::reversal::Reversible;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::*;

/// Simple interest on `principal` at an annual `rate` percent for `days` days
pub fn simple_interest(
    principal: &BigDecimal,
    rate: &BigDecimal,
    days: i64,
    days_in_year: u32,
    scale: i64,
) -> BigDecimal {
    let numerator = principal * rate * BigDecimal::from(days);
    let denominator = BigDecimal::from(i64::from(days_in_year) * 100);
    (numerator / denominator).with_scale_round(scale, RoundingMode::HalfUp)
}

/// Result of trying to accrue interest on a loan at a point in time
#[derive(Debug, Clone, PartialEq)]
enum Accrual {
    /// Interest transaction ready to apply
    Accrued(FinancialTransaction),
    /// Less than a whole day since the last accrual
    AlreadyAccrued { last: NaiveDateTime },
    /// Zero principal or zero rate
    NothingToAccrue,
}

/// Loan manager handling issuance, accrual, payments and loan queries
pub struct LoanManager<S: LedgerStorage> {
    ctx: LedgerContext<S>,
    accounts: BalanceManager<S>,
    parties: Arc<dyn PartyDirectory>,
    validator: Box<dyn LoanValidator>,
}

impl<S: LedgerStorage> LoanManager<S> {
    pub(crate) fn new(
        ctx: LedgerContext<S>,
        accounts: BalanceManager<S>,
        parties: Arc<dyn PartyDirectory>,
    ) -> Self {
        Self::with_validator(ctx, accounts, parties, Box::new(DefaultLoanValidator))
    }

    pub(crate) fn with_validator(
        ctx: LedgerContext<S>,
        accounts: BalanceManager<S>,
        parties: Arc<dyn PartyDirectory>,
        validator: Box<dyn LoanValidator>,
    ) -> Self {
        Self {
            ctx,
            accounts,
            parties,
            validator,
        }
    }

    /// Issue a new loan and record the transaction for its full amount
    pub async fn create_loan(
        &self,
        new_loan: NewLoan,
        payment_mode: PaymentMode,
        actor: &str,
    ) -> LedgerResult<LoanAccount> {
        self.validator.validate_new_loan(&new_loan)?;
        validate_actor(actor)?;
        validate_notes(new_loan.notes.as_deref())?;

        if self.parties.party_name(&new_loan.party_id).await?.is_none() {
            return Err(LedgerError::PartyNotFound(new_loan.party_id));
        }

        let now = self.ctx.clock.now();
        let mut loan = LoanAccount {
            id: Uuid::new_v4().to_string(),
            party_id: new_loan.party_id,
            direction: new_loan.direction,
            original_amount: new_loan.amount.clone(),
            interest_rate: new_loan.interest_rate.clone(),
            start_date: new_loan.start_date,
            due_date: new_loan.due_date,
            outstanding_principal: BigDecimal::from(0),
            outstanding_interest: BigDecimal::from(0),
            total_outstanding: BigDecimal::from(0),
            status: LoanStatus::Active,
            notes: new_loan.notes,
            created_by: actor.to_string(),
            created_at: now,
            updated_at: now,
        };

        let issue = FinancialTransaction {
            id: Uuid::new_v4().to_string(),
            transaction_type: loan.direction.issue_type(),
            amount: new_loan.amount,
            interest_rate: Some(new_loan.interest_rate),
            interest_amount: None,
            date: loan.start_date.and_time(NaiveTime::MIN),
            loan_id: Some(loan.id.clone()),
            party_id: Some(loan.party_id.clone()),
            payment_mode,
            notes: loan.notes.clone(),
            created_by: actor.to_string(),
            created_at: now,
        };
        loan.apply(&issue, now)?;

        let posting_account = self.accounts.posting_account_id(&issue).await?;
        let mut keys = vec![loan_key(&loan.id)];
        keys.extend(posting_account.iter().map(|id| account_key(id)));
        let _guard = self.ctx.locks.lock_all(keys).await;

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::InsertLoan(loan.clone()));
        batch.push(WriteOp::InsertTransaction(issue.clone()));
        if let Some(account_id) = &posting_account {
            let mut account = self.accounts.get_account_required(account_id).await?;
            stage_posting(&mut batch, &mut account, &issue, actor, now)?;
        }
        self.ctx.storage.commit(batch).await?;

        info!(
            loan_id = %loan.id,
            party_id = %loan.party_id,
            direction = ?loan.direction,
            amount = %loan.original_amount,
            rate = %loan.interest_rate,
            payment_mode = ?payment_mode,
            actor,
            "Loan created"
        );
        Ok(loan)
    }

    /// Accrue simple interest since the last accrual (or the start date)
    ///
    /// Fails with `AlreadyDone` when less than a day has passed and with
    /// `InvalidState` when the computed interest is zero.
    pub async fn accrue_interest(
        &self,
        loan_id: &str,
        actor: &str,
    ) -> LedgerResult<FinancialTransaction> {
        validate_actor(actor)?;

        let _guard = self.ctx.locks.lock(loan_key(loan_id)).await;
        let mut loan = self.get_loan_required(loan_id).await?;
        let now = self.ctx.clock.now();

        let transaction = match self.compute_accrual(&loan, now, actor).await? {
            Accrual::Accrued(transaction) => transaction,
            Accrual::AlreadyAccrued { last } => {
                return Err(LedgerError::AlreadyDone(format!(
                    "Interest on loan '{}' was already accrued today (last accrual {})",
                    loan_id, last
                )));
            }
            Accrual::NothingToAccrue => {
                return Err(LedgerError::InvalidState(format!(
                    "No interest to accrue on loan '{}' (principal {}, rate {})",
                    loan_id, loan.outstanding_principal, loan.interest_rate
                )));
            }
        };
        loan.apply(&transaction, now)?;

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::UpdateLoan(loan.clone()));
        batch.push(WriteOp::InsertTransaction(transaction.clone()));
        self.ctx.storage.commit(batch).await?;

        info!(
            loan_id,
            interest = %transaction.interest_portion(),
            outstanding_interest = %loan.outstanding_interest,
            status = ?loan.status,
            actor,
            "Interest accrued"
        );
        Ok(transaction)
    }

    /// Record a payment, settling outstanding interest before principal
    pub async fn record_payment(
        &self,
        loan_id: &str,
        amount: BigDecimal,
        payment_mode: PaymentMode,
        notes: Option<&str>,
        actor: &str,
    ) -> LedgerResult<FinancialTransaction> {
        validate_actor(actor)?;
        validate_notes(notes)?;

        let loan = self.get_loan_required(loan_id).await?;
        self.validator.validate_payment(&loan, &amount)?;

        // The lock set includes the posting account, so resolve it before locking
        let posting_account = self.accounts.posting_account_for(payment_mode).await?;
        let mut keys = vec![loan_key(loan_id)];
        keys.extend(posting_account.iter().map(|id| account_key(id)));
        let _guard = self.ctx.locks.lock_all(keys).await;

        let mut loan = self.get_loan_required(loan_id).await?;
        self.validator.validate_payment(&loan, &amount)?;

        let now = self.ctx.clock.now();
        let mut batch = WriteBatch::new();

        match self.compute_accrual(&loan, now, actor).await? {
            Accrual::Accrued(accrual) => {
                loan.apply(&accrual, now)?;
                batch.push(WriteOp::InsertTransaction(accrual));
            }
            Accrual::AlreadyAccrued { .. } | Accrual::NothingToAccrue => {
                debug!(loan_id, "No interest accrued before payment");
            }
        }

        let interest_portion = amount
            .clone()
            .min(loan.outstanding_interest.clone())
            .max(BigDecimal::from(0));

        let payment = FinancialTransaction {
            id: Uuid::new_v4().to_string(),
            transaction_type: loan.direction.payment_type(),
            amount,
            interest_rate: Some(loan.interest_rate.clone()),
            interest_amount: Some(interest_portion),
            date: now,
            loan_id: Some(loan.id.clone()),
            party_id: Some(loan.party_id.clone()),
            payment_mode,
            notes: notes.map(str::to_string),
            created_by: actor.to_string(),
            created_at: now,
        };
        loan.apply(&payment, now)?;

        batch.push(WriteOp::UpdateLoan(loan.clone()));
        batch.push(WriteOp::InsertTransaction(payment.clone()));
        if let Some(account_id) = &posting_account {
            let mut account = self.accounts.get_account_required(account_id).await?;
            stage_posting(&mut batch, &mut account, &payment, actor, now)?;
        }
        self.ctx.storage.commit(batch).await?;

        info!(
            loan_id,
            amount = %payment.amount,
            interest_portion = %payment.interest_portion(),
            total_outstanding = %loan.total_outstanding,
            status = ?loan.status,
            actor,
            "Loan payment recorded"
        );
        Ok(payment)
    }

    /// Re-derive the status of every open loan against today; returns how many changed
    pub async fn refresh_overdue_statuses(&self, actor: &str) -> LedgerResult<usize> {
        validate_actor(actor)?;

        let mut updated = 0;
        for candidate in self.ctx.storage.list_loans().await? {
            if candidate.status == LoanStatus::Closed {
                continue;
            }

            let _guard = self.ctx.locks.lock(loan_key(&candidate.id)).await;
            let Some(mut loan) = self.ctx.storage.get_loan(&candidate.id).await? else {
                continue;
            };
            let now = self.ctx.clock.now();
            let status = loan.derive_status(now.date());
            if status == loan.status {
                continue;
            }

            debug!(loan_id = %loan.id, from = ?loan.status, to = ?status, "Loan status changed");
            loan.status = status;
            loan.updated_at = now;
            let mut batch = WriteBatch::new();
            batch.push(WriteOp::UpdateLoan(loan));
            self.ctx.storage.commit(batch).await?;
            updated += 1;
        }

        if updated > 0 {
            info!(updated, actor, "Loan statuses refreshed");
        }
        Ok(updated)
    }

    /// Get a loan by ID
    pub async fn get_loan(&self, loan_id: &str) -> LedgerResult<Option<LoanAccount>> {
        self.ctx.storage.get_loan(loan_id).await
    }

    /// Get a loan by ID, returning an error if not found
    pub async fn get_loan_required(&self, loan_id: &str) -> LedgerResult<LoanAccount> {
        self.ctx
            .storage
            .get_loan(loan_id)
            .await?
            .ok_or_else(|| LedgerError::LoanNotFound(loan_id.to_string()))
    }

    pub async fn list_loans(&self) -> LedgerResult<Vec<LoanAccount>> {
        self.ctx.storage.list_loans().await
    }

    pub async fn get_loans_by_party(&self, party_id: &str) -> LedgerResult<Vec<LoanAccount>> {
        Ok(self
            .list_loans()
            .await?
            .into_iter()
            .filter(|loan| loan.party_id == party_id)
            .collect())
    }

    pub async fn get_loans_by_status(&self, status: LoanStatus) -> LedgerResult<Vec<LoanAccount>> {
        Ok(self
            .list_loans()
            .await?
            .into_iter()
            .filter(|loan| loan.status == status)
            .collect())
    }

    pub async fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> LedgerResult<Option<FinancialTransaction>> {
        self.ctx.storage.get_transaction(transaction_id).await
    }

    /// Transactions of a loan in date order
    pub async fn get_loan_transactions(
        &self,
        loan_id: &str,
    ) -> LedgerResult<Vec<FinancialTransaction>> {
        self.get_loan_required(loan_id).await?;
        self.ctx.storage.get_loan_transactions(loan_id).await
    }

    pub async fn get_transactions_by_party(
        &self,
        party_id: &str,
    ) -> LedgerResult<Vec<FinancialTransaction>> {
        Ok(self
            .ctx
            .storage
            .get_transactions(None, None)
            .await?
            .into_iter()
            .filter(|t| t.party_id.as_deref() == Some(party_id))
            .collect())
    }

    pub async fn get_transactions_by_type(
        &self,
        transaction_type: FinancialTransactionType,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> LedgerResult<Vec<FinancialTransaction>> {
        Ok(self
            .ctx
            .storage
            .get_transactions(start, end)
            .await?
            .into_iter()
            .filter(|t| t.transaction_type == transaction_type)
            .collect())
    }

    pub async fn get_transactions(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> LedgerResult<Vec<FinancialTransaction>> {
        self.ctx.storage.get_transactions(start, end).await
    }

    pub async fn get_portfolio_summary(&self) -> LedgerResult<LoanPortfolioSummary> {
        let mut summary = LoanPortfolioSummary {
            total_given_outstanding: BigDecimal::from(0),
            total_taken_outstanding: BigDecimal::from(0),
            active_count: 0,
            partially_paid_count: 0,
            overdue_count: 0,
            closed_count: 0,
        };

        for loan in self.list_loans().await? {
            match loan.status {
                LoanStatus::Active => summary.active_count += 1,
                LoanStatus::PartiallyPaid => summary.partially_paid_count += 1,
                LoanStatus::Overdue => summary.overdue_count += 1,
                LoanStatus::Closed => summary.closed_count += 1,
            }
            match loan.direction {
                LoanDirection::Given => summary.total_given_outstanding += &loan.total_outstanding,
                LoanDirection::Taken => summary.total_taken_outstanding += &loan.total_outstanding,
            }
        }

        Ok(summary)
    }

    /// Timestamp interest was last accrued up to
    async fn last_accrual_at(&self, loan: &LoanAccount) -> LedgerResult<NaiveDateTime> {
        let last_interest = self
            .ctx
            .storage
            .get_loan_transactions(&loan.id)
            .await?
            .into_iter()
            .filter(|t| t.transaction_type.is_interest())
            .map(|t| t.date)
            .max();

        Ok(last_interest.unwrap_or_else(|| loan.start_date.and_time(NaiveTime::MIN)))
    }

    async fn compute_accrual(
        &self,
        loan: &LoanAccount,
        now: NaiveDateTime,
        actor: &str,
    ) -> LedgerResult<Accrual> {
        let last = self.last_accrual_at(loan).await?;
        let days = (now - last).num_days();
        if days <= 0 {
            return Ok(Accrual::AlreadyAccrued { last });
        }

        let interest = simple_interest(
            &loan.outstanding_principal,
            &loan.interest_rate,
            days,
            self.ctx.config.interest.days_in_year,
            self.ctx.config.interest.scale,
        );
        if interest <= BigDecimal::from(0) {
            return Ok(Accrual::NothingToAccrue);
        }

        Ok(Accrual::Accrued(FinancialTransaction {
            id: Uuid::new_v4().to_string(),
            transaction_type: loan.direction.interest_type(),
            amount: BigDecimal::from(0),
            interest_rate: Some(loan.interest_rate.clone()),
            interest_amount: Some(interest),
            date: now,
            loan_id: Some(loan.id.clone()),
            party_id: Some(loan.party_id.clone()),
            payment_mode: PaymentMode::Loan,
            notes: Some(format!("Interest for {days} day(s)")),
            created_by: actor.to_string(),
            created_at: now,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::ledger::core::{Ledger, LedgerBuilder};
    use crate::utils::{FixedClock, MemoryPartyDirectory, MemoryStorage};
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn dec(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    fn setup() -> (Ledger<MemoryStorage>, FixedClock, MemoryStorage) {
        let storage = MemoryStorage::new();
        let parties = MemoryPartyDirectory::new();
        parties.add_party("supplier-1", "Supplier One");
        let clock = FixedClock::new(
            NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
        );
        let ledger = LedgerBuilder::new(storage.clone(), parties)
            .clock(clock.clone())
            .build()
            .unwrap();
        (ledger, clock, storage)
    }

    fn new_loan(amount: i64, rate: &str) -> NewLoan {
        NewLoan {
            party_id: "supplier-1".to_string(),
            direction: LoanDirection::Given,
            amount: BigDecimal::from(amount),
            interest_rate: dec(rate),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2024, 12, 31),
            notes: None,
        }
    }

    #[test]
    fn test_simple_interest_rounds_half_up() {
        let interest = simple_interest(&BigDecimal::from(10000), &dec("5.5"), 30, 365, 2);
        assert_eq!(interest, dec("45.21"));
        let none = simple_interest(&BigDecimal::from(0), &dec("5.5"), 30, 365, 2);
        assert_eq!(none, BigDecimal::from(0));
    }

    #[tokio::test]
    async fn test_create_loan_initializes_outstanding() {
        let (ledger, _clock, _storage) = setup();
        let loan = ledger
            .loans()
            .create_loan(new_loan(10000, "5.5"), PaymentMode::Cash, "operator")
            .await
            .unwrap();

        assert_eq!(loan.outstanding_principal, BigDecimal::from(10000));
        assert_eq!(loan.outstanding_interest, BigDecimal::from(0));
        assert_eq!(loan.total_outstanding, BigDecimal::from(10000));
        assert_eq!(loan.status, LoanStatus::Active);

        let transactions = ledger.loans().get_loan_transactions(&loan.id).await.unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(
            transactions[0].transaction_type,
            FinancialTransactionType::LoanGiven
        );
        assert_eq!(transactions[0].amount, BigDecimal::from(10000));
    }

    #[tokio::test]
    async fn test_create_loan_requires_known_party() {
        let (ledger, _clock, _storage) = setup();
        let mut loan = new_loan(10000, "5.5");
        loan.party_id = "stranger".to_string();

        let result = ledger
            .loans()
            .create_loan(loan, PaymentMode::Cash, "operator")
            .await;
        assert!(matches!(result, Err(LedgerError::PartyNotFound(_))));
    }

    #[tokio::test]
    async fn test_accrual_after_thirty_days_then_already_done() {
        let (ledger, clock, _storage) = setup();
        let loan = ledger
            .loans()
            .create_loan(new_loan(10000, "5.5"), PaymentMode::Cash, "operator")
            .await
            .unwrap();

        clock.advance_days(30);
        let accrual = ledger.loans().accrue_interest(&loan.id, "operator").await.unwrap();
        assert_eq!(accrual.interest_portion(), dec("45.21"));
        assert_eq!(accrual.amount, BigDecimal::from(0));
        assert_eq!(accrual.payment_mode, PaymentMode::Loan);

        let loan = ledger.loans().get_loan_required(&loan.id).await.unwrap();
        assert_eq!(loan.outstanding_interest, dec("45.21"));
        assert_eq!(loan.total_outstanding, dec("10045.21"));

        let again = ledger.loans().accrue_interest(&loan.id, "operator").await;
        assert!(matches!(again, Err(LedgerError::AlreadyDone(_))));
    }

    #[tokio::test]
    async fn test_zero_rate_accrual_is_invalid_but_payment_proceeds() {
        let (ledger, clock, _storage) = setup();
        let loan = ledger
            .loans()
            .create_loan(new_loan(1000, "0"), PaymentMode::Loan, "operator")
            .await
            .unwrap();

        clock.advance_days(10);
        let accrual = ledger.loans().accrue_interest(&loan.id, "operator").await;
        assert!(matches!(accrual, Err(LedgerError::InvalidState(_))));

        ledger
            .loans()
            .record_payment(&loan.id, BigDecimal::from(400), PaymentMode::Loan, None, "operator")
            .await
            .unwrap();
        let loan = ledger.loans().get_loan_required(&loan.id).await.unwrap();
        assert_eq!(loan.outstanding_principal, BigDecimal::from(600));
        assert_eq!(loan.status, LoanStatus::PartiallyPaid);
    }

    #[tokio::test]
    async fn test_payment_accrues_first_and_pays_interest_before_principal() {
        let (ledger, clock, _storage) = setup();
        let loan = ledger
            .loans()
            .create_loan(new_loan(10000, "18.25"), PaymentMode::Loan, "operator")
            .await
            .unwrap();

        clock.advance_days(100);
        let payment = ledger
            .loans()
            .record_payment(&loan.id, BigDecimal::from(3000), PaymentMode::Loan, None, "operator")
            .await
            .unwrap();
        assert_eq!(payment.interest_portion(), BigDecimal::from(500));

        let loan = ledger.loans().get_loan_required(&loan.id).await.unwrap();
        assert_eq!(loan.outstanding_interest, BigDecimal::from(0));
        assert_eq!(loan.outstanding_principal, BigDecimal::from(7500));
        assert_eq!(loan.total_outstanding, BigDecimal::from(7500));
        assert_eq!(loan.status, LoanStatus::PartiallyPaid);

        let types: Vec<_> = ledger
            .loans()
            .get_loan_transactions(&loan.id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.transaction_type)
            .collect();
        assert!(types.contains(&FinancialTransactionType::InterestReceived));
        assert!(types.contains(&FinancialTransactionType::LoanRepayment));
    }

    #[tokio::test]
    async fn test_small_payment_only_reduces_interest() {
        let (ledger, clock, _storage) = setup();
        let loan = ledger
            .loans()
            .create_loan(new_loan(10000, "18.25"), PaymentMode::Loan, "operator")
            .await
            .unwrap();
        clock.advance_days(100);
        ledger.loans().accrue_interest(&loan.id, "operator").await.unwrap();

        ledger
            .loans()
            .record_payment(&loan.id, BigDecimal::from(200), PaymentMode::Loan, None, "operator")
            .await
            .unwrap();

        let loan = ledger.loans().get_loan_required(&loan.id).await.unwrap();
        assert_eq!(loan.outstanding_interest, BigDecimal::from(300));
        assert_eq!(loan.outstanding_principal, BigDecimal::from(10000));
        assert!(loan.is_consistent());
    }

    #[tokio::test]
    async fn test_payment_rules() {
        let (ledger, _clock, _storage) = setup();
        let loan = ledger
            .loans()
            .create_loan(new_loan(10000, "5.5"), PaymentMode::Loan, "operator")
            .await
            .unwrap();

        let too_much = ledger
            .loans()
            .record_payment(&loan.id, BigDecimal::from(12000), PaymentMode::Cash, None, "operator")
            .await;
        assert!(matches!(too_much, Err(LedgerError::InvalidState(_))));

        let zero = ledger
            .loans()
            .record_payment(&loan.id, BigDecimal::from(0), PaymentMode::Cash, None, "operator")
            .await;
        assert!(matches!(zero, Err(LedgerError::InvalidState(_))));

        ledger
            .loans()
            .record_payment(&loan.id, BigDecimal::from(10000), PaymentMode::Loan, None, "operator")
            .await
            .unwrap();
        let closed = ledger.loans().get_loan_required(&loan.id).await.unwrap();
        assert_eq!(closed.status, LoanStatus::Closed);

        let after_close = ledger
            .loans()
            .record_payment(&loan.id, BigDecimal::from(1), PaymentMode::Loan, None, "operator")
            .await;
        assert!(matches!(after_close, Err(LedgerError::InvalidState(_))));

        let missing = ledger
            .loans()
            .record_payment("missing", BigDecimal::from(1), PaymentMode::Loan, None, "operator")
            .await;
        assert!(matches!(missing, Err(LedgerError::LoanNotFound(_))));
    }

    #[tokio::test]
    async fn test_payment_checks_loan_before_posting_account() {
        let storage = MemoryStorage::new();
        let parties = MemoryPartyDirectory::new();
        parties.add_party("supplier-1", "Supplier One");
        let mut config = LedgerConfig::default();
        config.posting.cash_account_id = Some("retired-till".to_string());
        let ledger = LedgerBuilder::new(storage, parties)
            .clock(FixedClock::new(
                NaiveDate::from_ymd_opt(2024, 1, 1)
                    .unwrap()
                    .and_hms_opt(10, 0, 0)
                    .unwrap(),
            ))
            .config(config)
            .build()
            .unwrap();
        let loan = ledger
            .loans()
            .create_loan(new_loan(1000, "5"), PaymentMode::Loan, "operator")
            .await
            .unwrap();

        let missing = ledger
            .loans()
            .record_payment("missing", BigDecimal::from(100), PaymentMode::Cash, None, "operator")
            .await;
        assert!(matches!(missing, Err(LedgerError::LoanNotFound(_))));

        let too_much = ledger
            .loans()
            .record_payment(&loan.id, BigDecimal::from(5000), PaymentMode::Cash, None, "operator")
            .await;
        assert!(matches!(too_much, Err(LedgerError::InvalidState(_))));

        // A valid cash payment still needs the configured till
        let valid = ledger
            .loans()
            .record_payment(&loan.id, BigDecimal::from(100), PaymentMode::Cash, None, "operator")
            .await;
        assert!(matches!(valid, Err(LedgerError::AccountNotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_payment_commit_keeps_loan_unchanged() {
        let (ledger, clock, storage) = setup();
        let loan = ledger
            .loans()
            .create_loan(new_loan(10000, "18.25"), PaymentMode::Loan, "operator")
            .await
            .unwrap();
        clock.advance_days(100);

        storage.fail_next_commit();
        let result = ledger
            .loans()
            .record_payment(&loan.id, BigDecimal::from(3000), PaymentMode::Loan, None, "operator")
            .await;
        assert!(matches!(result, Err(LedgerError::Storage(_))));

        let unchanged = ledger.loans().get_loan_required(&loan.id).await.unwrap();
        assert_eq!(unchanged, loan);
        assert_eq!(
            ledger.loans().get_loan_transactions(&loan.id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_refresh_overdue_statuses() {
        let (ledger, clock, _storage) = setup();
        let mut short = new_loan(5000, "10");
        short.due_date = NaiveDate::from_ymd_opt(2024, 1, 15);
        let loan = ledger
            .loans()
            .create_loan(short, PaymentMode::Loan, "operator")
            .await
            .unwrap();
        ledger
            .loans()
            .create_loan(new_loan(1000, "10"), PaymentMode::Loan, "operator")
            .await
            .unwrap();

        clock.advance_days(20);
        let updated = ledger.loans().refresh_overdue_statuses("operator").await.unwrap();
        assert_eq!(updated, 1);
        let loan = ledger.loans().get_loan_required(&loan.id).await.unwrap();
        assert_eq!(loan.status, LoanStatus::Overdue);

        let summary = ledger.loans().get_portfolio_summary().await.unwrap();
        assert_eq!(summary.overdue_count, 1);
        assert_eq!(summary.active_count, 1);
        assert_eq!(summary.total_given_outstanding, BigDecimal::from(6000));
    }
}
