//! Ad earnings - clicks, impressions and conversions paid into the balance
//!
//! Each ad event is credited at most once: its event id becomes the entry's
//! idempotency key.

use crate::error::ServiceResult;
use crate::ledger::{LedgerService, Posting};
use crate::notify::Notification;
use crate::services::ServiceContext;
use cashledger_ledger::{EntryType, LedgerEntry};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AdEventKind {
    Click,
    Impression,
    Conversion,
}

/// A paid ad interaction reported by the ads platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdEarning {
    pub event_id: String,
    pub account_id: String,
    pub ad_id: String,
    pub kind: AdEventKind,
    pub amount: Decimal,
}

pub struct EarningsService<'a> {
    ctx: &'a ServiceContext,
}

impl<'a> EarningsService<'a> {
    pub fn new(ctx: &'a ServiceContext) -> Self {
        Self { ctx }
    }

    /// Credit one ad event; a replayed event fails `DuplicateEntry` and changes nothing
    pub async fn credit(&self, earning: &AdEarning) -> ServiceResult<LedgerEntry> {
        let posting = Posting::new(&earning.account_id, EntryType::AdRevenue, earning.amount)
            .ad(&earning.ad_id)
            .idempotency_key(&earning.event_id)
            .description(format!("Ad {} on {}", earning.kind, earning.ad_id));
        let entry = LedgerService::new(self.ctx).credit(posting).await?;

        debug!(event_id = %earning.event_id, kind = %earning.kind, "ad earning credited");
        self.ctx.notify(Notification::AdRevenueCredited {
            account_id: earning.account_id.clone(),
            ad_id: earning.ad_id.clone(),
            amount: earning.amount,
        });
        Ok(entry)
    }

    /// Credit a batch, skipping events already credited.
    ///
    /// Returns the entries created; stops at the first failure other than a duplicate.
    pub async fn credit_batch(&self, earnings: &[AdEarning]) -> ServiceResult<Vec<LedgerEntry>> {
        let mut created = Vec::with_capacity(earnings.len());
        for earning in earnings {
            match self.credit(earning).await {
                Ok(entry) => created.push(entry),
                Err(e) if e.is_duplicate() => {
                    debug!(event_id = %earning.event_id, "ad event already credited");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use cashledger_persistence::Database;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    fn earning(event_id: &str, account_id: &str, amount: Decimal) -> AdEarning {
        AdEarning {
            event_id: event_id.to_string(),
            account_id: account_id.to_string(),
            ad_id: "ad-42".to_string(),
            kind: AdEventKind::Click,
            amount,
        }
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!(AdEventKind::from_str("conversion").unwrap(), AdEventKind::Conversion);
        assert_eq!(AdEventKind::Impression.to_string(), "impression");
    }

    #[tokio::test]
    async fn test_replayed_event_credits_once() {
        let db = Database::in_memory().await.unwrap();
        let ctx = ServiceContext::new(db, LedgerConfig::default());
        let account = LedgerService::new(&ctx).open_account("user-1").await.unwrap();
        let svc = EarningsService::new(&ctx);

        let entry = svc.credit(&earning("evt-1", account.id(), dec!(0.25))).await.unwrap();
        assert_eq!(entry.related_ad_id.as_deref(), Some("ad-42"));
        assert!(svc
            .credit(&earning("evt-1", account.id(), dec!(0.25)))
            .await
            .unwrap_err()
            .is_duplicate());

        let batch = vec![
            earning("evt-1", account.id(), dec!(0.25)),
            earning("evt-2", account.id(), dec!(0.50)),
        ];
        assert_eq!(svc.credit_batch(&batch).await.unwrap().len(), 1);

        let summary = LedgerService::new(&ctx).summary(account.id()).await.unwrap();
        assert_eq!(summary.balance, dec!(0.75));
    }
}
