//! Daily cash book: opening balances, expected closings and physical counts

use bigdecimal::{BigDecimal, Zero};
use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ledger::cash_flow::CashFlowAggregator;
use crate::ledger::core::LedgerContext;
use crate::ledger::locks::cash_book_key;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{validate_actor, validate_notes};

/// Maintains one [`CashBalance`] per date, moving it through
/// `Uninitialized -> Computed -> Reconciled`
pub struct CashBookReconciler<S: LedgerStorage> {
    ctx: LedgerContext<S>,
    cash_flow: CashFlowAggregator<S>,
}

impl<S: LedgerStorage> CashBookReconciler<S> {
    pub(crate) fn new(ctx: LedgerContext<S>, cash_flow: CashFlowAggregator<S>) -> Self {
        Self { ctx, cash_flow }
    }

    /// Start the cash book on `date` with a counted opening balance
    pub async fn set_opening_balance(
        &self,
        date: NaiveDate,
        amount: BigDecimal,
        actor: &str,
    ) -> LedgerResult<CashBalance> {
        validate_actor(actor)?;
        if amount < BigDecimal::zero() {
            return Err(LedgerError::Validation(format!(
                "Opening balance cannot be negative: {amount}"
            )));
        }

        let _guard = self.ctx.locks.lock(cash_book_key(date)).await;
        if self.ctx.storage.get_cash_balance(date).await?.is_some() {
            return Err(LedgerError::InvalidState(format!(
                "A cash book record for {date} already exists"
            )));
        }

        let now = self.ctx.clock.now();
        let record = self.compute_record(date, amount, None, actor, now).await?;

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::InsertCashBalance(record.clone()));
        self.ctx.storage.commit(batch).await?;

        info!(
            %date,
            opening_balance = %record.opening_balance,
            expected_closing = %record.expected_closing_balance,
            actor,
            "Cash book opening balance set"
        );
        Ok(record)
    }

    /// Create or refresh the record for `date` from the prior day's closing and
    /// the day's cash flow
    pub async fn recompute_daily(&self, date: NaiveDate, actor: &str) -> LedgerResult<CashBalance> {
        validate_actor(actor)?;

        let _guard = self.ctx.locks.lock(cash_book_key(date)).await;
        let record = self
            .derive_record(date, actor)
            .await?
            .ok_or_else(|| {
                LedgerError::InvalidState(format!(
                    "Cannot compute cash book for {date}: opening balance has not been set"
                ))
            })?;

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::UpsertCashBalance(record.clone()));
        self.ctx.storage.commit(batch).await?;

        info!(
            %date,
            opening_balance = %record.opening_balance,
            cash_in = %record.total_cash_in,
            cash_out = %record.total_cash_out,
            expected_closing = %record.expected_closing_balance,
            actor,
            "Cash book recomputed"
        );
        Ok(record)
    }

    /// Record the physical cash count for `date`
    pub async fn reconcile(
        &self,
        date: NaiveDate,
        actual_cash_counted: BigDecimal,
        actor: &str,
        reason: Option<&str>,
        notes: Option<&str>,
    ) -> LedgerResult<CashBalance> {
        validate_actor(actor)?;
        validate_notes(reason)?;
        validate_notes(notes)?;
        if actual_cash_counted < BigDecimal::zero() {
            return Err(LedgerError::InvalidState(format!(
                "Counted cash cannot be negative: {actual_cash_counted}"
            )));
        }

        let _guard = self.ctx.locks.lock(cash_book_key(date)).await;
        let mut record = match self.ctx.storage.get_cash_balance(date).await? {
            Some(record) => record,
            None => self.derive_record(date, actor).await?.ok_or_else(|| {
                LedgerError::InvalidState(format!(
                    "Cannot reconcile {date}: opening balance has not been set"
                ))
            })?,
        };

        let now = self.ctx.clock.now();
        let discrepancy = &actual_cash_counted - &record.expected_closing_balance;
        record.reconciliation = Some(CashReconciliation {
            actual_cash_counted,
            discrepancy: discrepancy.clone(),
            reconciled_at: now,
            reconciled_by: actor.to_string(),
            reason: reason.map(str::to_string),
            notes: notes.map(str::to_string),
        });
        record.updated_at = now;

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::UpsertCashBalance(record.clone()));
        self.ctx.storage.commit(batch).await?;

        if discrepancy.is_zero() {
            info!(%date, actor, "Cash reconciled without discrepancy");
        } else {
            warn!(
                %date,
                expected = %record.expected_closing_balance,
                discrepancy = %discrepancy,
                reason = reason.unwrap_or(""),
                actor,
                "Cash reconciled with discrepancy"
            );
        }
        Ok(record)
    }

    /// Recompute every derivable day in `[start, end]` in date order
    ///
    /// Days before the first record are skipped.
    pub async fn recompute_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        actor: &str,
    ) -> LedgerResult<Vec<CashBalance>> {
        validate_actor(actor)?;
        if end < start {
            return Err(LedgerError::Validation(format!(
                "End date {end} is before start date {start}"
            )));
        }

        let mut records = Vec::new();
        for date in start.iter_days().take_while(|d| *d <= end) {
            let _guard = self.ctx.locks.lock(cash_book_key(date)).await;
            let Some(record) = self.derive_record(date, actor).await? else {
                debug!(%date, "No cash book before this day, skipping");
                continue;
            };

            let mut batch = WriteBatch::new();
            batch.push(WriteOp::UpsertCashBalance(record.clone()));
            self.ctx.storage.commit(batch).await?;
            records.push(record);
        }

        info!(%start, %end, days = records.len(), actor, "Cash book range recomputed");
        Ok(records)
    }

    pub async fn get_daily_record(&self, date: NaiveDate) -> LedgerResult<Option<CashBalance>> {
        self.ctx.storage.get_cash_balance(date).await
    }

    pub async fn get_state(&self, date: NaiveDate) -> LedgerResult<CashBookState> {
        Ok(self
            .get_daily_record(date)
            .await?
            .map(|record| record.state())
            .unwrap_or(CashBookState::Uninitialized))
    }

    /// Closing balance of the most recent day, zero before the book starts
    pub async fn get_cash_in_hand(&self) -> LedgerResult<BigDecimal> {
        Ok(self
            .ctx
            .storage
            .get_latest_cash_balance()
            .await?
            .map(|record| record.closing_balance().clone())
            .unwrap_or_else(BigDecimal::zero))
    }

    pub async fn get_unreconciled_days(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> LedgerResult<Vec<CashBalance>> {
        Ok(self
            .ctx
            .storage
            .list_cash_balances(start, end)
            .await?
            .into_iter()
            .filter(|record| !record.is_reconciled())
            .collect())
    }

    /// Reconciled days whose count differed from the expected closing
    pub async fn get_days_with_discrepancies(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> LedgerResult<Vec<CashBalance>> {
        Ok(self
            .ctx
            .storage
            .list_cash_balances(start, end)
            .await?
            .into_iter()
            .filter(|record| record.discrepancy().is_some_and(|d| !d.is_zero()))
            .collect())
    }

    pub async fn get_total_discrepancy(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> LedgerResult<BigDecimal> {
        Ok(self
            .ctx
            .storage
            .list_cash_balances(Some(start), Some(end))
            .await?
            .iter()
            .filter_map(|record| record.discrepancy())
            .sum())
    }

    /// The record `date` should hold now, or `None` if the book has not started yet
    ///
    /// The opening comes from the latest earlier day's closing (counted cash
    /// when reconciled). With no earlier day, an existing record keeps its own
    /// opening. A reconciled record stays reconciled and gets its discrepancy
    /// recomputed.
    async fn derive_record(
        &self,
        date: NaiveDate,
        actor: &str,
    ) -> LedgerResult<Option<CashBalance>> {
        let existing = self.ctx.storage.get_cash_balance(date).await?;
        let prior = self.ctx.storage.get_latest_cash_balance_before(date).await?;

        let opening = match (&prior, &existing) {
            (Some(prior), _) => prior.closing_balance().clone(),
            (None, Some(existing)) => existing.opening_balance.clone(),
            (None, None) => return Ok(None),
        };

        let now = self.ctx.clock.now();
        let record = self.compute_record(date, opening, existing, actor, now).await?;
        Ok(Some(record))
    }

    async fn compute_record(
        &self,
        date: NaiveDate,
        opening_balance: BigDecimal,
        existing: Option<CashBalance>,
        actor: &str,
        now: NaiveDateTime,
    ) -> LedgerResult<CashBalance> {
        let flow = self.cash_flow.compute_cash_flow(date).await?;
        let expected_closing_balance = &opening_balance + flow.net();

        let mut record = existing.unwrap_or_else(|| CashBalance {
            id: Uuid::new_v4().to_string(),
            date,
            opening_balance: BigDecimal::zero(),
            total_cash_in: BigDecimal::zero(),
            total_cash_out: BigDecimal::zero(),
            expected_closing_balance: BigDecimal::zero(),
            reconciliation: None,
            created_by: actor.to_string(),
            created_at: now,
            updated_at: now,
        });

        record.opening_balance = opening_balance;
        record.total_cash_in = flow.total_cash_in;
        record.total_cash_out = flow.total_cash_out;
        record.expected_closing_balance = expected_closing_balance;
        record.updated_at = now;
        if let Some(reconciliation) = record.reconciliation.as_mut() {
            reconciliation.discrepancy =
                &reconciliation.actual_cash_counted - &record.expected_closing_balance;
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::core::{Ledger, LedgerBuilder};
    use crate::utils::{FixedClock, MemoryFeeds, MemoryPartyDirectory, MemoryStorage};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn trade(trade_type: TradeType, amount: i64, d: u32) -> InventoryTrade {
        InventoryTrade {
            id: Uuid::new_v4().to_string(),
            trade_type,
            total_amount: BigDecimal::from(amount),
            payment_mode: PaymentMode::Cash,
            date: day(d).and_hms_opt(11, 0, 0).unwrap(),
        }
    }

    fn setup() -> (Ledger<MemoryStorage>, MemoryFeeds) {
        let feeds = MemoryFeeds::new();
        feeds.add_trade(trade(TradeType::Sell, 500, 1));
        feeds.add_trade(trade(TradeType::Buy, 200, 1));
        let ledger = LedgerBuilder::new(MemoryStorage::new(), MemoryPartyDirectory::new())
            .clock(FixedClock::new(day(1).and_hms_opt(20, 0, 0).unwrap()))
            .inventory_feed(feeds.clone())
            .build()
            .unwrap();
        (ledger, feeds)
    }

    #[tokio::test]
    async fn test_opening_then_reconcile_with_shortage() {
        let (ledger, _feeds) = setup();
        let book = ledger.cash_book();
        assert_eq!(book.get_state(day(1)).await.unwrap(), CashBookState::Uninitialized);

        let record = book
            .set_opening_balance(day(1), BigDecimal::from(1000), "operator")
            .await
            .unwrap();
        assert_eq!(record.expected_closing_balance, BigDecimal::from(1300));
        assert_eq!(record.state(), CashBookState::Computed);

        let reconciled = book
            .reconcile(day(1), BigDecimal::from(1250), "operator", Some("short"), None)
            .await
            .unwrap();
        assert_eq!(reconciled.discrepancy(), Some(&BigDecimal::from(-50)));
        assert_eq!(reconciled.state(), CashBookState::Reconciled);

        let next = book.recompute_daily(day(2), "operator").await.unwrap();
        assert_eq!(next.opening_balance, BigDecimal::from(1250));
        assert_eq!(next.expected_closing_balance, BigDecimal::from(1250));
        assert_eq!(book.get_cash_in_hand().await.unwrap(), BigDecimal::from(1250));
    }

    #[tokio::test]
    async fn test_duplicate_opening_balance_rejected() {
        let (ledger, _feeds) = setup();
        let book = ledger.cash_book();
        book.set_opening_balance(day(1), BigDecimal::from(1000), "operator")
            .await
            .unwrap();

        let again = book
            .set_opening_balance(day(1), BigDecimal::from(5), "operator")
            .await;
        assert!(matches!(again, Err(LedgerError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_recompute_requires_a_starting_point() {
        let (ledger, _feeds) = setup();
        let result = ledger.cash_book().recompute_daily(day(3), "operator").await;
        assert!(matches!(result, Err(LedgerError::InvalidState(_))));

        let negative = ledger
            .cash_book()
            .reconcile(day(3), BigDecimal::from(-1), "operator", None, None)
            .await;
        assert!(matches!(negative, Err(LedgerError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_recompute_is_idempotent_and_keeps_reconciliation() {
        let (ledger, feeds) = setup();
        let book = ledger.cash_book();
        book.set_opening_balance(day(1), BigDecimal::from(1000), "operator")
            .await
            .unwrap();

        let first = book.recompute_daily(day(1), "operator").await.unwrap();
        let second = book.recompute_daily(day(1), "operator").await.unwrap();
        assert_eq!(first.expected_closing_balance, second.expected_closing_balance);
        assert_eq!(second.opening_balance, BigDecimal::from(1000));

        book.reconcile(day(1), BigDecimal::from(1300), "operator", None, None)
            .await
            .unwrap();

        // A late sale changes the expected closing of a reconciled day
        feeds.add_trade(trade(TradeType::Sell, 100, 1));
        let refreshed = book.recompute_daily(day(1), "operator").await.unwrap();
        assert!(refreshed.is_reconciled());
        assert_eq!(refreshed.expected_closing_balance, BigDecimal::from(1400));
        assert_eq!(refreshed.discrepancy(), Some(&BigDecimal::from(-100)));

        let flagged = book.get_days_with_discrepancies(None, None).await.unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(
            book.get_total_discrepancy(day(1), day(30)).await.unwrap(),
            BigDecimal::from(-100)
        );
    }

    #[tokio::test]
    async fn test_recompute_range_carries_closings_forward() {
        let (ledger, feeds) = setup();
        let book = ledger.cash_book();
        book.set_opening_balance(day(1), BigDecimal::from(1000), "operator")
            .await
            .unwrap();
        book.recompute_daily(day(2), "operator").await.unwrap();
        book.recompute_daily(day(3), "operator").await.unwrap();

        // Back-dated expense on day 1
        feeds.add_trade(trade(TradeType::Wastage, 300, 1));
        let records = book.recompute_range(day(1), day(3), "operator").await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].expected_closing_balance, BigDecimal::from(1000));
        assert_eq!(records[2].opening_balance, BigDecimal::from(1000));

        let unreconciled = book.get_unreconciled_days(Some(day(2)), None).await.unwrap();
        assert_eq!(unreconciled.len(), 2);
    }

    #[tokio::test]
    async fn test_reconcile_computes_missing_record() {
        let (ledger, _feeds) = setup();
        let book = ledger.cash_book();
        book.set_opening_balance(day(1), BigDecimal::from(1000), "operator")
            .await
            .unwrap();

        let record = book
            .reconcile(day(2), BigDecimal::from(1310), "operator", None, Some("found extra"))
            .await
            .unwrap();
        assert_eq!(record.opening_balance, BigDecimal::from(1300));
        assert_eq!(record.discrepancy(), Some(&BigDecimal::from(10)));
    }
}
