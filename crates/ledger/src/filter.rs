//! Entry filter for admin listing and review queries

use crate::entry::{EntryStatus, EntryType, LedgerEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFilter {
    pub account_id: Option<String>,
    /// Any of these types; empty means all
    pub entry_types: Vec<EntryType>,
    /// Any of these statuses; empty means all
    pub statuses: Vec<EntryStatus>,
    /// Inclusive lower bound on `created_at`
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`
    pub to: Option<DateTime<Utc>>,
    pub min_risk_score: Option<u8>,
    pub related_order_id: Option<String>,
    pub limit: Option<u32>,
}

impl EntryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(mut self, account_id: &str) -> Self {
        self.account_id = Some(account_id.to_string());
        self
    }

    pub fn entry_type(mut self, entry_type: EntryType) -> Self {
        self.entry_types.push(entry_type);
        self
    }

    pub fn status(mut self, status: EntryStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn since(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn min_risk_score(mut self, score: u8) -> Self {
        self.min_risk_score = Some(score);
        self
    }

    pub fn order(mut self, order_id: &str) -> Self {
        self.related_order_id = Some(order_id.to_string());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// In-memory equivalent of the SQL the persistence layer builds from this filter
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(ref id) = self.account_id {
            if &entry.account_id != id {
                return false;
            }
        }
        if !self.entry_types.is_empty() && !self.entry_types.contains(&entry.entry_type) {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&entry.status) {
            return false;
        }
        if self.from.is_some_and(|from| entry.created_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| entry.created_at >= to) {
            return false;
        }
        if self
            .min_risk_score
            .is_some_and(|min| entry.risk_score.value() < min)
        {
            return false;
        }
        if let Some(ref order_id) = self.related_order_id {
            if entry.related_order_id.as_ref() != Some(order_id) {
                return false;
            }
        }
        true
    }
}
