//! Cashback rate policy
//!
//! The percent is `base_percent + tier_bonus(order_amount)`, capped at
//! `max_percent`, and fixed on the order when it is first tracked.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Bonus percent for orders at or above `min_order_amount`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashbackTier {
    pub min_order_amount: Decimal,
    pub bonus_percent: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashbackPolicy {
    /// Platform rate every order gets
    #[serde(default = "default_base_percent")]
    pub base_percent: Decimal,

    /// Tier bonuses; the highest tier the order reaches applies
    #[serde(default = "default_tiers")]
    pub tiers: Vec<CashbackTier>,

    /// Upper bound on the final percent
    #[serde(default = "default_max_percent")]
    pub max_percent: Decimal,
}

fn default_base_percent() -> Decimal {
    Decimal::new(20, 1) // 2.0%
}

fn default_tiers() -> Vec<CashbackTier> {
    vec![
        CashbackTier {
            min_order_amount: Decimal::new(1_000, 0),
            bonus_percent: Decimal::new(5, 1),
        },
        CashbackTier {
            min_order_amount: Decimal::new(5_000, 0),
            bonus_percent: Decimal::new(10, 1),
        },
        CashbackTier {
            min_order_amount: Decimal::new(20_000, 0),
            bonus_percent: Decimal::new(20, 1),
        },
    ]
}

fn default_max_percent() -> Decimal {
    Decimal::new(10, 0)
}

impl Default for CashbackPolicy {
    fn default() -> Self {
        Self {
            base_percent: default_base_percent(),
            tiers: default_tiers(),
            max_percent: default_max_percent(),
        }
    }
}

impl CashbackPolicy {
    /// Bonus for the highest tier `order_amount` reaches, zero below every tier
    pub fn tier_bonus(&self, order_amount: Decimal) -> Decimal {
        self.tiers
            .iter()
            .filter(|tier| order_amount >= tier.min_order_amount)
            .max_by_key(|tier| tier.min_order_amount)
            .map(|tier| tier.bonus_percent)
            .unwrap_or(Decimal::ZERO)
    }

    /// Effective cashback percent for an order
    pub fn percent_for(&self, order_amount: Decimal) -> Decimal {
        (self.base_percent + self.tier_bonus(order_amount)).min(self.max_percent)
    }

    /// Cashback amount at `percent`, rounded to cents (midpoint away from zero)
    pub fn amount_for(order_amount: Decimal, percent: Decimal) -> Decimal {
        (order_amount * percent / Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }
}
