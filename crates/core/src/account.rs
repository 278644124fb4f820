//! Ledger Account - the per-user balance aggregate
//!
//! Every mutation goes through one of the operations below, which validate
//! first and mutate second. A failed operation leaves the account untouched,
//! with one exception: a wrong PIN attempt records the failure.
//!
//! Invariants maintained at all times:
//! - `balance >= 0`, `pending_cashback >= 0`, `pending_withdrawals >= 0`
//! - `pending_withdrawals <= balance`
//! - lifetime counters (`total_earned`, `total_withdrawn`, `total_spent`) never decrease

use crate::error::{CoreError, CoreResult};
use crate::pin::PinHash;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Verification (KYC) status as decided by the external verification service
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, EnumString, Display,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    #[default]
    Unverified,
    Pending,
    Approved,
    Rejected,
}

/// PIN lockout policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinPolicy {
    /// Consecutive failures before the PIN locks
    pub max_attempts: u32,
    /// How long the lockout lasts
    pub lockout: Duration,
}

impl Default for PinPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            lockout: Duration::minutes(30),
        }
    }
}

/// Balance snapshot taken around a single mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub before: Decimal,
    pub after: Decimal,
}

impl BalanceChange {
    fn unchanged(balance: Decimal) -> Self {
        Self {
            before: balance,
            after: balance,
        }
    }

    /// Signed delta `after - before`
    pub fn delta(&self) -> Decimal {
        self.after - self.before
    }
}

/// Persisted shape of a ledger account
///
/// Plain data; only [`LedgerAccount`] knows how to change it safely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub id: String,
    pub user_id: String,
    pub currency: String,
    pub balance: Decimal,
    pub pending_cashback: Decimal,
    pub pending_withdrawals: Decimal,
    pub total_earned: Decimal,
    pub total_withdrawn: Decimal,
    pub total_spent: Decimal,
    /// Balance at creation, the baseline for reconciliation
    pub opening_balance: Decimal,
    pub is_frozen: bool,
    pub freeze_reason: Option<String>,
    pub verification: VerificationStatus,
    pub minimum_withdrawal: Decimal,
    pub pin: Option<PinHash>,
    pub pin_attempts: u32,
    pub pin_locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read-only projection of an account's balances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account_id: String,
    pub currency: String,
    pub balance: Decimal,
    pub available_balance: Decimal,
    pub pending_cashback: Decimal,
    pub pending_withdrawals: Decimal,
    pub total_earned: Decimal,
    pub total_withdrawn: Decimal,
    pub total_spent: Decimal,
    pub is_frozen: bool,
}

/// Per-user balance aggregate
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerAccount {
    state: AccountState,
}

fn require_positive(amount: Decimal) -> CoreResult<()> {
    if amount <= Decimal::ZERO {
        return Err(CoreError::InvalidAmount(amount));
    }
    Ok(())
}

impl LedgerAccount {
    /// Open a fresh account with zero balances
    pub fn open(user_id: &str, currency: &str, minimum_withdrawal: Decimal) -> Self {
        let now = Utc::now();
        Self {
            state: AccountState {
                id: Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                currency: currency.to_string(),
                balance: Decimal::ZERO,
                pending_cashback: Decimal::ZERO,
                pending_withdrawals: Decimal::ZERO,
                total_earned: Decimal::ZERO,
                total_withdrawn: Decimal::ZERO,
                total_spent: Decimal::ZERO,
                opening_balance: Decimal::ZERO,
                is_frozen: false,
                freeze_reason: None,
                verification: VerificationStatus::Unverified,
                minimum_withdrawal,
                pin: None,
                pin_attempts: 0,
                pin_locked_until: None,
                created_at: now,
                updated_at: now,
            },
        }
    }

    /// Rebuild an account from stored state, rejecting states that break an invariant
    pub fn restore(state: AccountState) -> CoreResult<Self> {
        let negative = [
            state.balance,
            state.pending_cashback,
            state.pending_withdrawals,
        ]
        .into_iter()
        .find(|v| *v < Decimal::ZERO);
        if let Some(value) = negative {
            return Err(CoreError::InvalidAmount(value));
        }
        if state.pending_withdrawals > state.balance {
            return Err(CoreError::InsufficientBalance {
                available: state.balance,
                requested: state.pending_withdrawals,
            });
        }
        Ok(Self { state })
    }

    pub fn state(&self) -> &AccountState {
        &self.state
    }

    pub fn into_state(self) -> AccountState {
        self.state
    }

    pub fn id(&self) -> &str {
        &self.state.id
    }

    pub fn balance(&self) -> Decimal {
        self.state.balance
    }

    pub fn pending_cashback(&self) -> Decimal {
        self.state.pending_cashback
    }

    pub fn pending_withdrawals(&self) -> Decimal {
        self.state.pending_withdrawals
    }

    /// `max(0, balance - pending_withdrawals)`
    pub fn available_balance(&self) -> Decimal {
        (self.state.balance - self.state.pending_withdrawals).max(Decimal::ZERO)
    }

    pub fn is_frozen(&self) -> bool {
        self.state.is_frozen
    }

    pub fn verification(&self) -> VerificationStatus {
        self.state.verification
    }

    pub fn has_pin(&self) -> bool {
        self.state.pin.is_some()
    }

    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            account_id: self.state.id.clone(),
            currency: self.state.currency.clone(),
            balance: self.state.balance,
            available_balance: self.available_balance(),
            pending_cashback: self.state.pending_cashback,
            pending_withdrawals: self.state.pending_withdrawals,
            total_earned: self.state.total_earned,
            total_withdrawn: self.state.total_withdrawn,
            total_spent: self.state.total_spent,
            is_frozen: self.state.is_frozen,
        }
    }

    pub fn ensure_not_frozen(&self) -> CoreResult<()> {
        if self.state.is_frozen {
            return Err(CoreError::AccountFrozen {
                reason: self
                    .state
                    .freeze_reason
                    .clone()
                    .unwrap_or_else(|| "no reason given".to_string()),
            });
        }
        Ok(())
    }

    fn ensure_available(&self, amount: Decimal) -> CoreResult<()> {
        let available = self.available_balance();
        if available < amount {
            return Err(CoreError::InsufficientBalance {
                available,
                requested: amount,
            });
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.state.updated_at = Utc::now();
    }

    // === Balance operations ===

    /// `balance += amount; total_earned += amount`. Allowed while frozen.
    pub fn credit(&mut self, amount: Decimal) -> CoreResult<BalanceChange> {
        require_positive(amount)?;

        let before = self.state.balance;
        self.state.balance += amount;
        self.state.total_earned += amount;
        self.touch();
        Ok(BalanceChange {
            before,
            after: self.state.balance,
        })
    }

    /// `balance -= amount; total_spent += amount`, bounded by the available balance
    pub fn debit(&mut self, amount: Decimal) -> CoreResult<BalanceChange> {
        require_positive(amount)?;
        self.ensure_not_frozen()?;
        self.ensure_available(amount)?;

        let before = self.state.balance;
        self.state.balance -= amount;
        self.state.total_spent += amount;
        self.touch();
        Ok(BalanceChange {
            before,
            after: self.state.balance,
        })
    }

    // === Pending cashback pool ===

    /// Park earned-but-unsettled cashback in the non-spendable pool
    pub fn add_pending_cashback(&mut self, amount: Decimal) -> CoreResult<BalanceChange> {
        require_positive(amount)?;

        self.state.pending_cashback += amount;
        self.touch();
        Ok(BalanceChange::unchanged(self.state.balance))
    }

    /// Drop cashback from the pool without crediting it (rejection path)
    pub fn release_pending_cashback(&mut self, amount: Decimal) -> CoreResult<BalanceChange> {
        require_positive(amount)?;
        if self.state.pending_cashback < amount {
            return Err(CoreError::InsufficientPending {
                pending: self.state.pending_cashback,
                requested: amount,
            });
        }

        self.state.pending_cashback -= amount;
        self.touch();
        Ok(BalanceChange::unchanged(self.state.balance))
    }

    /// Settle cashback: the only path from the pending pool into the spendable balance
    pub fn credit_pending_cashback(&mut self, amount: Decimal) -> CoreResult<BalanceChange> {
        require_positive(amount)?;
        if self.state.pending_cashback < amount {
            return Err(CoreError::InsufficientPending {
                pending: self.state.pending_cashback,
                requested: amount,
            });
        }

        let before = self.state.balance;
        self.state.pending_cashback -= amount;
        self.state.balance += amount;
        self.state.total_earned += amount;
        self.touch();
        Ok(BalanceChange {
            before,
            after: self.state.balance,
        })
    }

    // === Withdrawal reservation ===

    /// Phase one of a withdrawal: move funds into `pending_withdrawals`
    pub fn reserve_for_withdrawal(&mut self, amount: Decimal) -> CoreResult<BalanceChange> {
        require_positive(amount)?;
        self.ensure_not_frozen()?;
        if amount < self.state.minimum_withdrawal {
            return Err(CoreError::BelowMinimumWithdrawal {
                minimum: self.state.minimum_withdrawal,
                requested: amount,
            });
        }
        self.ensure_available(amount)?;

        self.state.pending_withdrawals += amount;
        self.touch();
        Ok(BalanceChange::unchanged(self.state.balance))
    }

    /// Phase two: the payout happened, debit the reserved funds
    pub fn commit_withdrawal(&mut self, amount: Decimal) -> CoreResult<BalanceChange> {
        require_positive(amount)?;
        self.ensure_not_frozen()?;
        if self.state.pending_withdrawals < amount {
            return Err(CoreError::InsufficientReserved {
                reserved: self.state.pending_withdrawals,
                requested: amount,
            });
        }

        let before = self.state.balance;
        self.state.pending_withdrawals -= amount;
        self.state.balance -= amount;
        self.state.total_withdrawn += amount;
        self.touch();
        Ok(BalanceChange {
            before,
            after: self.state.balance,
        })
    }

    /// Give reserved funds back to the available balance (cancel / reject path)
    pub fn release_reservation(&mut self, amount: Decimal) -> CoreResult<BalanceChange> {
        require_positive(amount)?;
        if self.state.pending_withdrawals < amount {
            return Err(CoreError::InsufficientReserved {
                reserved: self.state.pending_withdrawals,
                requested: amount,
            });
        }

        self.state.pending_withdrawals -= amount;
        self.touch();
        Ok(BalanceChange::unchanged(self.state.balance))
    }

    // === Corrections ===

    /// Signed balance correction used by reversals and reconciliation repairs.
    ///
    /// Lifetime counters are not touched. A negative delta is bounded by the
    /// available balance so reserved funds stay covered.
    pub fn apply_correction(&mut self, delta: Decimal) -> CoreResult<BalanceChange> {
        if delta.is_zero() {
            return Err(CoreError::InvalidAmount(delta));
        }
        if delta < Decimal::ZERO {
            self.ensure_available(-delta)?;
        }

        let before = self.state.balance;
        self.state.balance += delta;
        self.touch();
        Ok(BalanceChange {
            before,
            after: self.state.balance,
        })
    }

    // === Administrative ===

    pub fn freeze(&mut self, reason: &str) {
        self.state.is_frozen = true;
        self.state.freeze_reason = Some(reason.to_string());
        self.touch();
    }

    pub fn unfreeze(&mut self) {
        self.state.is_frozen = false;
        self.state.freeze_reason = None;
        self.touch();
    }

    pub fn set_verification(&mut self, status: VerificationStatus) {
        self.state.verification = status;
        self.touch();
    }

    pub fn set_minimum_withdrawal(&mut self, minimum: Decimal) -> CoreResult<()> {
        require_positive(minimum)?;
        self.state.minimum_withdrawal = minimum;
        self.touch();
        Ok(())
    }

    pub fn ensure_verified(&self) -> CoreResult<()> {
        if self.state.verification != VerificationStatus::Approved {
            return Err(CoreError::NotVerified {
                status: self.state.verification.to_string(),
            });
        }
        Ok(())
    }

    // === PIN ===

    /// Replace the PIN, clearing any failure count or lockout
    pub fn set_pin(&mut self, pin: &str) -> CoreResult<()> {
        self.state.pin = Some(PinHash::new(pin)?);
        self.state.pin_attempts = 0;
        self.state.pin_locked_until = None;
        self.touch();
        Ok(())
    }

    /// Verify a candidate PIN.
    ///
    /// An attempt while locked fails `PinLocked` without counting. A wrong PIN
    /// increments the failure counter (the caller must persist the account
    /// even though an error is returned); reaching `max_attempts` locks the PIN
    /// for `policy.lockout`. Success resets the counter.
    pub fn verify_pin(
        &mut self,
        candidate: &str,
        now: DateTime<Utc>,
        policy: &PinPolicy,
    ) -> CoreResult<()> {
        let Some(pin) = self.state.pin.as_ref() else {
            return Err(CoreError::PinNotSet);
        };

        if let Some(until) = self.state.pin_locked_until {
            if now < until {
                return Err(CoreError::PinLocked { until });
            }
            // Lockout elapsed
            self.state.pin_locked_until = None;
            self.state.pin_attempts = 0;
        }

        if pin.verify(candidate) {
            self.state.pin_attempts = 0;
            self.touch();
            return Ok(());
        }

        self.state.pin_attempts += 1;
        self.touch();
        if self.state.pin_attempts >= policy.max_attempts {
            self.state.pin_locked_until = Some(now + policy.lockout);
        }
        Err(CoreError::InvalidPin {
            remaining_attempts: policy.max_attempts.saturating_sub(self.state.pin_attempts),
        })
    }

    /// Whether the PIN is locked at `now`
    pub fn is_pin_locked(&self, now: DateTime<Utc>) -> bool {
        self.state.pin_locked_until.is_some_and(|until| now < until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn funded(balance: Decimal) -> LedgerAccount {
        let mut account = LedgerAccount::open("user-1", "INR", dec!(100));
        account.credit(balance).unwrap();
        account
    }

    #[test]
    fn test_open_account() {
        let account = LedgerAccount::open("user-1", "INR", dec!(100));
        assert_eq!(account.balance(), Decimal::ZERO);
        assert_eq!(account.available_balance(), Decimal::ZERO);
        assert_eq!(account.state().minimum_withdrawal, dec!(100));
        assert!(!account.is_frozen());
        assert!(!account.has_pin());
    }

    #[test]
    fn test_credit_and_debit() {
        let mut account = funded(dec!(500));
        assert_eq!(account.state().total_earned, dec!(500));

        let change = account.debit(dec!(120)).unwrap();
        assert_eq!(change.before, dec!(500));
        assert_eq!(change.after, dec!(380));
        assert_eq!(change.delta(), dec!(-120));
        assert_eq!(account.state().total_spent, dec!(120));
    }

    #[test]
    fn test_non_positive_amounts_rejected() {
        let mut account = funded(dec!(500));
        let before = account.clone();

        assert_eq!(account.credit(dec!(0)), Err(CoreError::InvalidAmount(dec!(0))));
        assert_eq!(account.debit(dec!(-5)), Err(CoreError::InvalidAmount(dec!(-5))));
        assert!(account.add_pending_cashback(dec!(0)).is_err());
        assert!(account.reserve_for_withdrawal(dec!(-1)).is_err());
        assert_eq!(account, before);
    }

    #[test]
    fn test_debit_bounded_by_available() {
        let mut account = funded(dec!(500));
        account.reserve_for_withdrawal(dec!(200)).unwrap();

        let err = account.debit(dec!(301)).unwrap_err();
        assert_eq!(
            err,
            CoreError::InsufficientBalance {
                available: dec!(300),
                requested: dec!(301)
            }
        );
        assert!(account.debit(dec!(300)).is_ok());
        assert_eq!(account.available_balance(), Decimal::ZERO);
        assert_eq!(account.balance(), dec!(200));
    }

    #[test]
    fn test_reserve_scenario() {
        let mut account = funded(dec!(500));
        account.reserve_for_withdrawal(dec!(200)).unwrap();

        assert_eq!(account.balance(), dec!(500));
        assert_eq!(account.pending_withdrawals(), dec!(200));
        assert_eq!(account.available_balance(), dec!(300));
    }

    #[test]
    fn test_reserve_release_round_trip() {
        let mut account = funded(dec!(500));
        let available = account.available_balance();

        account.reserve_for_withdrawal(dec!(250)).unwrap();
        account.release_reservation(dec!(250)).unwrap();

        assert_eq!(account.available_balance(), available);
        assert_eq!(account.pending_withdrawals(), Decimal::ZERO);
    }

    #[test]
    fn test_minimum_withdrawal_boundary() {
        let mut account = funded(dec!(500));

        let err = account.reserve_for_withdrawal(dec!(99.99)).unwrap_err();
        assert_eq!(
            err,
            CoreError::BelowMinimumWithdrawal {
                minimum: dec!(100),
                requested: dec!(99.99)
            }
        );
        assert!(account.reserve_for_withdrawal(dec!(100)).is_ok());
    }

    #[test]
    fn test_commit_withdrawal() {
        let mut account = funded(dec!(500));
        account.reserve_for_withdrawal(dec!(200)).unwrap();

        let change = account.commit_withdrawal(dec!(200)).unwrap();
        assert_eq!(change.delta(), dec!(-200));
        assert_eq!(account.balance(), dec!(300));
        assert_eq!(account.pending_withdrawals(), Decimal::ZERO);
        assert_eq!(account.state().total_withdrawn, dec!(200));

        assert!(matches!(
            account.commit_withdrawal(dec!(1)),
            Err(CoreError::InsufficientReserved { .. })
        ));
    }

    #[test]
    fn test_frozen_blocks_debits_not_credits() {
        let mut account = funded(dec!(500));
        account.reserve_for_withdrawal(dec!(100)).unwrap();
        account.freeze("chargeback investigation");

        assert!(matches!(
            account.debit(dec!(10)),
            Err(CoreError::AccountFrozen { .. })
        ));
        assert!(matches!(
            account.reserve_for_withdrawal(dec!(100)),
            Err(CoreError::AccountFrozen { .. })
        ));
        assert!(matches!(
            account.commit_withdrawal(dec!(100)),
            Err(CoreError::AccountFrozen { .. })
        ));
        assert!(account.credit(dec!(10)).is_ok());
        assert!(account.release_reservation(dec!(100)).is_ok());

        account.unfreeze();
        assert!(account.debit(dec!(10)).is_ok());
    }

    #[test]
    fn test_pending_cashback_flow() {
        let mut account = LedgerAccount::open("user-1", "INR", dec!(100));
        let change = account.add_pending_cashback(dec!(150)).unwrap();
        assert_eq!(change.delta(), Decimal::ZERO);
        assert_eq!(account.pending_cashback(), dec!(150));
        assert_eq!(account.balance(), Decimal::ZERO);

        let change = account.credit_pending_cashback(dec!(150)).unwrap();
        assert_eq!(change.delta(), dec!(150));
        assert_eq!(account.pending_cashback(), Decimal::ZERO);
        assert_eq!(account.balance(), dec!(150));
        assert_eq!(account.state().total_earned, dec!(150));

        assert_eq!(
            account.credit_pending_cashback(dec!(1)),
            Err(CoreError::InsufficientPending {
                pending: dec!(0),
                requested: dec!(1)
            })
        );
        assert!(account.release_pending_cashback(dec!(1)).is_err());
    }

    #[test]
    fn test_correction_respects_reservations() {
        let mut account = funded(dec!(500));
        account.reserve_for_withdrawal(dec!(400)).unwrap();

        assert!(account.apply_correction(dec!(-101)).is_err());
        let change = account.apply_correction(dec!(-100)).unwrap();
        assert_eq!(change.after, dec!(400));
        // counters untouched
        assert_eq!(account.state().total_spent, Decimal::ZERO);
        assert_eq!(account.state().total_earned, dec!(500));
    }

    #[test]
    fn test_restore_rejects_broken_state() {
        let mut state = funded(dec!(100)).into_state();
        state.pending_withdrawals = dec!(150);
        assert!(LedgerAccount::restore(state.clone()).is_err());

        state.pending_withdrawals = dec!(50);
        assert!(LedgerAccount::restore(state).is_ok());
    }

    #[test]
    fn test_pin_lockout() {
        let mut account = LedgerAccount::open("user-1", "INR", dec!(100));
        let policy = PinPolicy::default();
        let now = Utc::now();

        assert_eq!(
            account.verify_pin("1234", now, &policy),
            Err(CoreError::PinNotSet)
        );
        account.set_pin("1234").unwrap();

        assert_eq!(
            account.verify_pin("0000", now, &policy),
            Err(CoreError::InvalidPin {
                remaining_attempts: 2
            })
        );
        assert!(account.verify_pin("0000", now, &policy).is_err());
        assert!(account.verify_pin("0000", now, &policy).is_err());
        assert!(account.is_pin_locked(now));

        // correct PIN inside the window still fails, without consuming an attempt
        let later = now + Duration::minutes(10);
        assert!(matches!(
            account.verify_pin("1234", later, &policy),
            Err(CoreError::PinLocked { .. })
        ));
        assert_eq!(account.state().pin_attempts, 3);

        let after_lockout = now + Duration::minutes(31);
        assert!(account.verify_pin("1234", after_lockout, &policy).is_ok());
        assert_eq!(account.state().pin_attempts, 0);
        assert!(account.state().pin_locked_until.is_none());
    }

    #[test]
    fn test_pin_success_resets_counter() {
        let mut account = LedgerAccount::open("user-1", "INR", dec!(100));
        let policy = PinPolicy::default();
        let now = Utc::now();
        account.set_pin("4321").unwrap();

        assert!(account.verify_pin("1111", now, &policy).is_err());
        assert!(account.verify_pin("1111", now, &policy).is_err());
        assert!(account.verify_pin("4321", now, &policy).is_ok());
        assert!(account.verify_pin("1111", now, &policy).is_err());
        assert!(!account.is_pin_locked(now));
    }

    #[test]
    fn test_verification_gate() {
        let mut account = LedgerAccount::open("user-1", "INR", dec!(100));
        assert!(matches!(
            account.ensure_verified(),
            Err(CoreError::NotVerified { .. })
        ));
        account.set_verification(VerificationStatus::Approved);
        assert!(account.ensure_verified().is_ok());
    }
}
