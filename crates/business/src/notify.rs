//! Notification collaborator
//!
//! Notifications go out only after the ledger mutation has committed. Delivery
//! runs on a spawned task; a failing notifier is logged and otherwise ignored,
//! it can never roll back or fail the ledger operation.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

/// Committed ledger event a holder should hear about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    CashbackCredited {
        account_id: String,
        order_id: String,
        amount: Decimal,
    },
    AdRevenueCredited {
        account_id: String,
        ad_id: String,
        amount: Decimal,
    },
    WithdrawalRequested {
        account_id: String,
        withdrawal_id: String,
        amount: Decimal,
    },
    WithdrawalApproved {
        account_id: String,
        withdrawal_id: String,
        amount: Decimal,
    },
    WithdrawalRejected {
        account_id: String,
        withdrawal_id: String,
        reason: String,
    },
    WithdrawalCompleted {
        account_id: String,
        withdrawal_id: String,
        external_transaction_id: String,
    },
    AccountFrozen {
        account_id: String,
        reason: String,
    },
}

impl Notification {
    pub fn account_id(&self) -> &str {
        match self {
            Notification::CashbackCredited { account_id, .. }
            | Notification::AdRevenueCredited { account_id, .. }
            | Notification::WithdrawalRequested { account_id, .. }
            | Notification::WithdrawalApproved { account_id, .. }
            | Notification::WithdrawalRejected { account_id, .. }
            | Notification::WithdrawalCompleted { account_id, .. }
            | Notification::AccountFrozen { account_id, .. } => account_id,
        }
    }
}

/// Outbound delivery (email, SMS, push)
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Name for logging
    fn name(&self) -> &str;

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Default notifier: writes each notification to the log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(account_id = notification.account_id(), ?notification, "notification");
        Ok(())
    }
}

/// Keeps every notification in memory; optionally fails each delivery
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier that records, then reports failure
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification.clone());
        }
        if self.fail {
            return Err(NotifyError("recording notifier set to fail".to_string()));
        }
        Ok(())
    }
}

/// Fire-and-forget dispatch after commit
pub fn dispatch(notifier: Arc<dyn Notifier>, notification: Notification) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match notifier.notify(&notification).await {
            Ok(()) => debug!(notifier = notifier.name(), "notification delivered"),
            Err(e) => warn!(
                notifier = notifier.name(),
                account_id = notification.account_id(),
                error = %e,
                "notification failed; ledger state unaffected"
            ),
        }
    })
}
