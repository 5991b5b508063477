//! In-memory party directory and transaction feeds for testing

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::traits::*;
use crate::types::*;

/// In-memory party directory
#[derive(Debug, Clone, Default)]
pub struct MemoryPartyDirectory {
    parties: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryPartyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_party(&self, party_id: impl Into<String>, name: impl Into<String>) {
        self.parties
            .write()
            .unwrap()
            .insert(party_id.into(), name.into());
    }
}

#[async_trait]
impl PartyDirectory for MemoryPartyDirectory {
    async fn party_name(&self, party_id: &str) -> LedgerResult<Option<String>> {
        Ok(self.parties.read().unwrap().get(party_id).cloned())
    }
}

/// Feed that never reports anything
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyFeed;

#[async_trait]
impl InventoryFeed for EmptyFeed {
    async fn trades_between(
        &self,
        _start: NaiveDateTime,
        _end: NaiveDateTime,
    ) -> LedgerResult<Vec<InventoryTrade>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl WageFeed for EmptyFeed {
    async fn wage_transactions_between(
        &self,
        _start: NaiveDateTime,
        _end: NaiveDateTime,
    ) -> LedgerResult<Vec<WageTransaction>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl ExpenseFeed for EmptyFeed {
    async fn expenses_between(
        &self,
        _start: NaiveDateTime,
        _end: NaiveDateTime,
    ) -> LedgerResult<Vec<OperationalExpense>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Default)]
struct FeedState {
    trades: Vec<InventoryTrade>,
    wages: Vec<WageTransaction>,
    expenses: Vec<OperationalExpense>,
}

/// In-memory stand-in for the inventory, wage and expense subsystems
#[derive(Debug, Clone, Default)]
pub struct MemoryFeeds {
    state: Arc<RwLock<FeedState>>,
}

impl MemoryFeeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_trade(&self, trade: InventoryTrade) {
        self.state.write().unwrap().trades.push(trade);
    }

    pub fn add_wage_transaction(&self, transaction: WageTransaction) {
        self.state.write().unwrap().wages.push(transaction);
    }

    pub fn add_expense(&self, expense: OperationalExpense) {
        self.state.write().unwrap().expenses.push(expense);
    }
}

#[async_trait]
impl InventoryFeed for MemoryFeeds {
    async fn trades_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> LedgerResult<Vec<InventoryTrade>> {
        let state = self.state.read().unwrap();
        Ok(state
            .trades
            .iter()
            .filter(|t| t.date >= start && t.date < end)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WageFeed for MemoryFeeds {
    async fn wage_transactions_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> LedgerResult<Vec<WageTransaction>> {
        let state = self.state.read().unwrap();
        Ok(state
            .wages
            .iter()
            .filter(|w| w.date >= start && w.date < end)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ExpenseFeed for MemoryFeeds {
    async fn expenses_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> LedgerResult<Vec<OperationalExpense>> {
        let state = self.state.read().unwrap();
        Ok(state
            .expenses
            .iter()
            .filter(|e| e.date >= start && e.date < end)
            .cloned()
            .collect())
    }
}
