//! Per-entity critical sections
//!
//! Read-then-write mutations on a loan, account or cash book day run while
//! holding the guard for that entity. Unrelated entities never contend.

use chrono::NaiveDate;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock key for a loan
pub fn loan_key(loan_id: &str) -> String {
    format!("loan:{loan_id}")
}

/// Lock key for a cash account
pub fn account_key(account_id: &str) -> String {
    format!("account:{account_id}")
}

/// Lock key for a cash book day
pub fn cash_book_key(date: NaiveDate) -> String {
    format!("cashbook:{date}")
}

/// Registry of async mutexes keyed by entity
#[derive(Debug, Default)]
pub struct EntityLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Guards held for the duration of one mutation
#[derive(Debug)]
pub struct EntityGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Lock a single entity
    pub async fn lock(&self, key: String) -> EntityGuard {
        self.lock_all(vec![key]).await
    }

    /// Lock several entities at once
    ///
    /// Keys are acquired in sorted order, so two callers locking overlapping
    /// sets cannot deadlock.
    pub async fn lock_all(&self, mut keys: Vec<String>) -> EntityGuard {
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let mutex = self.mutex(&key);
            guards.push(mutex.lock_owned().await);
        }
        EntityGuard { _guards: guards }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(EntityLocks::new());
        let guard = locks.lock(loan_key("a")).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(loan_key("a")).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_unrelated_keys_do_not_contend() {
        let locks = EntityLocks::new();
        let _loan = locks.lock(loan_key("a")).await;
        let _account = locks
            .lock_all(vec![account_key("till"), loan_key("b"), account_key("till")])
            .await;
    }
}
