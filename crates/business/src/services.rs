//! Service context shared by every service
//!
//! Holds the database, configuration, risk scorer, clock, notifier and the
//! per-account lock table. Services borrow it for their lifetime.

use crate::config::LedgerConfig;
use crate::notify::{dispatch, LogNotifier, Notification, Notifier};
use cashledger_persistence::Database;
use cashledger_risk::RiskScorer;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Time source; injectable so settlement windows can be tested
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut current) = self.now.lock() {
            *current = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut current) = self.now.lock() {
            *current += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|_| Utc::now())
    }
}

/// One async mutex per account id.
///
/// Held across the whole read-modify-write of an account so the balance
/// snapshot stored on an entry cannot interleave with another writer.
/// Different accounts never contend.
#[derive(Default)]
pub struct AccountLocks {
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, account_id: &str) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the DashMap shard guard is released before awaiting
        let mutex = self
            .locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        debug!(account_id, "acquiring account lock");
        mutex.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Shared context for all services
pub struct ServiceContext {
    db: Database,
    config: LedgerConfig,
    scorer: RiskScorer,
    locks: AccountLocks,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl ServiceContext {
    pub fn new(db: Database, config: LedgerConfig) -> Self {
        let scorer = RiskScorer::new(config.risk.clone());
        Self {
            db,
            config,
            scorer,
            locks: AccountLocks::new(),
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn scorer(&self) -> &RiskScorer {
        &self.scorer
    }

    pub fn locks(&self) -> &AccountLocks {
        &self.locks
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Hand a committed event to the notifier without waiting for it
    pub fn notify(&self, notification: Notification) {
        dispatch(self.notifier.clone(), notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_account_serializes() {
        let locks = AccountLocks::new();
        let guard = locks.lock("acc-1").await;

        // other accounts are free
        let other = locks.lock("acc-2").await;
        drop(other);

        let pending = tokio::time::timeout(std::time::Duration::from_millis(50), locks.lock("acc-1")).await;
        assert!(pending.is_err(), "second lock on the same account must wait");

        drop(guard);
        let reacquired =
            tokio::time::timeout(std::time::Duration::from_millis(50), locks.lock("acc-1")).await;
        assert!(reacquired.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_manual_clock() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(Duration::days(31));
        assert_eq!(clock.now(), start + Duration::days(31));
        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
