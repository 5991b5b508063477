//! Cash-flow aggregation over the ledger and the external transaction feeds

use bigdecimal::{BigDecimal, Zero};
use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use std::sync::Arc;

use crate::ledger::core::LedgerContext;
use crate::traits::*;
use crate::types::*;

/// Which side of the cash book a record lands on
enum Flow {
    In(BigDecimal),
    Out(BigDecimal),
}

impl FlowTotals {
    fn add(&mut self, flow: Flow) {
        match flow {
            Flow::In(amount) => self.cash_in += amount,
            Flow::Out(amount) => self.cash_out += amount,
        }
    }
}

fn classify_trade(trade: &InventoryTrade) -> Flow {
    match trade.trade_type {
        TradeType::Sell | TradeType::Processing => Flow::In(trade.total_amount.clone()),
        TradeType::Buy | TradeType::Wastage => Flow::Out(trade.total_amount.clone()),
    }
}

fn classify_financial(transaction: &FinancialTransaction) -> Flow {
    if transaction.transaction_type.is_inflow() {
        Flow::In(transaction.amount.clone())
    } else {
        Flow::Out(transaction.amount.clone())
    }
}

fn classify_wage(transaction: &WageTransaction) -> Flow {
    // A negative adjustment is an advance coming back to the till
    if transaction.transaction_type == WageTransactionType::AdvanceAdjustment
        && transaction.amount < BigDecimal::zero()
    {
        Flow::In(transaction.amount.abs())
    } else {
        Flow::Out(transaction.amount.clone())
    }
}

/// `[date 00:00, date+1 00:00)`
fn day_bounds(date: NaiveDate) -> LedgerResult<(NaiveDateTime, NaiveDateTime)> {
    let next = date
        .checked_add_days(Days::new(1))
        .ok_or_else(|| LedgerError::Validation(format!("Date {date} is out of range")))?;
    Ok((date.and_time(NaiveTime::MIN), next.and_time(NaiveTime::MIN)))
}

/// Derives a day's cash inflow and outflow from every cash-moving source
pub struct CashFlowAggregator<S: LedgerStorage> {
    ctx: LedgerContext<S>,
    inventory: Arc<dyn InventoryFeed>,
    wages: Arc<dyn WageFeed>,
    expenses: Arc<dyn ExpenseFeed>,
}

impl<S: LedgerStorage> Clone for CashFlowAggregator<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            inventory: self.inventory.clone(),
            wages: self.wages.clone(),
            expenses: self.expenses.clone(),
        }
    }
}

impl<S: LedgerStorage> CashFlowAggregator<S> {
    pub(crate) fn new(
        ctx: LedgerContext<S>,
        inventory: Arc<dyn InventoryFeed>,
        wages: Arc<dyn WageFeed>,
        expenses: Arc<dyn ExpenseFeed>,
    ) -> Self {
        Self {
            ctx,
            inventory,
            wages,
            expenses,
        }
    }

    /// Cash-mode inflow and outflow for `date`
    ///
    /// Holds no state of its own; the result is re-derivable from the sources at any time.
    pub async fn compute_cash_flow(&self, date: NaiveDate) -> LedgerResult<DailyCashFlow> {
        let (start, end) = day_bounds(date)?;
        let mut breakdown = CashFlowBreakdown::default();

        for trade in self.inventory.trades_between(start, end).await? {
            if trade.payment_mode == PaymentMode::Cash {
                breakdown.inventory.add(classify_trade(&trade));
            }
        }

        for transaction in self.ctx.storage.get_transactions(Some(start), Some(end)).await? {
            if transaction.payment_mode == PaymentMode::Cash {
                breakdown.financial.add(classify_financial(&transaction));
            }
        }

        for transaction in self.wages.wage_transactions_between(start, end).await? {
            if transaction.payment_mode == PaymentMode::Cash {
                breakdown.wages.add(classify_wage(&transaction));
            }
        }

        for expense in self.expenses.expenses_between(start, end).await? {
            if expense.payment_mode == PaymentMode::Cash {
                breakdown.expenses.add(Flow::Out(expense.amount));
            }
        }

        let sources = [
            &breakdown.inventory,
            &breakdown.financial,
            &breakdown.wages,
            &breakdown.expenses,
        ];
        let total_cash_in = sources.iter().map(|s| &s.cash_in).sum();
        let total_cash_out = sources.iter().map(|s| &s.cash_out).sum();

        Ok(DailyCashFlow {
            date,
            total_cash_in,
            total_cash_out,
            breakdown,
        })
    }

    /// Daily cash flow for every date in `[start, end]`
    pub async fn get_cash_flow_summary(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> LedgerResult<CashFlowSummary> {
        if end < start {
            return Err(LedgerError::Validation(format!(
                "End date {end} is before start date {start}"
            )));
        }

        let mut days = Vec::new();
        for date in start.iter_days().take_while(|d| *d <= end) {
            days.push(self.compute_cash_flow(date).await?);
        }

        let total_cash_in: BigDecimal = days.iter().map(|d| &d.total_cash_in).sum();
        let total_cash_out: BigDecimal = days.iter().map(|d| &d.total_cash_out).sum();
        let net_cash_flow = &total_cash_in - &total_cash_out;

        Ok(CashFlowSummary {
            start_date: start,
            end_date: end,
            days,
            total_cash_in,
            total_cash_out,
            net_cash_flow,
        })
    }
}
