//! Repository implementations for SQLite
//!
//! Every method takes `&mut SqliteConnection` so the same call works on a
//! pooled connection or inside a transaction (`&mut *tx`). Services compose
//! several repo calls into one transaction to keep the account row and the
//! entry log in lockstep.

use crate::error::{PersistenceError, PersistenceResult};
use crate::sqlite::schema::*;
use cashledger_core::{LedgerAccount, OrderCashback, WithdrawalRequest, WithdrawalStatus};
use cashledger_ledger::{EntryFilter, LedgerEntry};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::str::FromStr;

// ============================================================================
// Account Repository
// ============================================================================

/// Repository for the `accounts` table
pub struct AccountRepo;

impl AccountRepo {
    pub async fn insert(conn: &mut SqliteConnection, account: &LedgerAccount) -> PersistenceResult<()> {
        let s = account.state();
        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, user_id, currency, balance, pending_cashback, pending_withdrawals,
                total_earned, total_withdrawn, total_spent, opening_balance,
                is_frozen, freeze_reason, verification, minimum_withdrawal,
                pin_hash, pin_salt, pin_attempts, pin_locked_until, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&s.id)
        .bind(&s.user_id)
        .bind(&s.currency)
        .bind(s.balance.to_string())
        .bind(s.pending_cashback.to_string())
        .bind(s.pending_withdrawals.to_string())
        .bind(s.total_earned.to_string())
        .bind(s.total_withdrawn.to_string())
        .bind(s.total_spent.to_string())
        .bind(s.opening_balance.to_string())
        .bind(s.is_frozen)
        .bind(&s.freeze_reason)
        .bind(s.verification.to_string())
        .bind(s.minimum_withdrawal.to_string())
        .bind(s.pin.as_ref().map(|p| p.hash.clone()))
        .bind(s.pin.as_ref().map(|p| p.salt.clone()))
        .bind(s.pin_attempts as i64)
        .bind(s.pin_locked_until)
        .bind(s.created_at)
        .bind(s.updated_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn get_by_id(conn: &mut SqliteConnection, id: &str) -> PersistenceResult<LedgerAccount> {
        sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| PersistenceError::not_found("Account", id))?
            .try_into()
    }

    pub async fn find_by_user(
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> PersistenceResult<Option<LedgerAccount>> {
        sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?
            .map(LedgerAccount::try_from)
            .transpose()
    }

    pub async fn list(conn: &mut SqliteConnection) -> PersistenceResult<Vec<LedgerAccount>> {
        sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts ORDER BY created_at")
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .map(LedgerAccount::try_from)
            .collect()
    }

    pub async fn list_frozen(conn: &mut SqliteConnection) -> PersistenceResult<Vec<LedgerAccount>> {
        sqlx::query_as::<_, AccountRow>(
            "SELECT * FROM accounts WHERE is_frozen = 1 ORDER BY updated_at DESC",
        )
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(LedgerAccount::try_from)
        .collect()
    }

    /// Write back the whole mutable state of an account
    pub async fn update(conn: &mut SqliteConnection, account: &LedgerAccount) -> PersistenceResult<()> {
        let s = account.state();
        let result = sqlx::query(
            r#"
            UPDATE accounts SET
                balance = ?, pending_cashback = ?, pending_withdrawals = ?,
                total_earned = ?, total_withdrawn = ?, total_spent = ?,
                is_frozen = ?, freeze_reason = ?, verification = ?, minimum_withdrawal = ?,
                pin_hash = ?, pin_salt = ?, pin_attempts = ?, pin_locked_until = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(s.balance.to_string())
        .bind(s.pending_cashback.to_string())
        .bind(s.pending_withdrawals.to_string())
        .bind(s.total_earned.to_string())
        .bind(s.total_withdrawn.to_string())
        .bind(s.total_spent.to_string())
        .bind(s.is_frozen)
        .bind(&s.freeze_reason)
        .bind(s.verification.to_string())
        .bind(s.minimum_withdrawal.to_string())
        .bind(s.pin.as_ref().map(|p| p.hash.clone()))
        .bind(s.pin.as_ref().map(|p| p.salt.clone()))
        .bind(s.pin_attempts as i64)
        .bind(s.pin_locked_until)
        .bind(s.updated_at)
        .bind(&s.id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::not_found("Account", &s.id));
        }
        Ok(())
    }

    pub async fn count(conn: &mut SqliteConnection) -> PersistenceResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM accounts")
            .fetch_one(&mut *conn)
            .await?;
        Ok(count)
    }
}

// ============================================================================
// Entry Repository
// ============================================================================

/// Repository for the `ledger_entries` table
pub struct EntryRepo;

impl EntryRepo {
    fn flags_json(entry: &LedgerEntry) -> PersistenceResult<String> {
        serde_json::to_string(&entry.fraud_flags).map_err(|e| PersistenceError::InvalidJson {
            field: "fraud_flags".to_string(),
            message: e.to_string(),
        })
    }

    /// Append an entry; a reused id or idempotency key surfaces as `UniqueViolation`
    pub async fn insert(conn: &mut SqliteConnection, entry: &LedgerEntry) -> PersistenceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                id, account_id, entry_type, amount, balance_before, balance_after, status,
                related_order_id, related_ad_id, risk_score, fraud_flags, retry_count,
                description, failure_reason, processed_by, processed_at,
                original_entry_id, reversal_entry_id, idempotency_key, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.account_id)
        .bind(entry.entry_type.to_string())
        .bind(entry.amount.to_string())
        .bind(entry.balance_before.to_string())
        .bind(entry.balance_after.to_string())
        .bind(entry.status.to_string())
        .bind(&entry.related_order_id)
        .bind(&entry.related_ad_id)
        .bind(entry.risk_score.value() as i64)
        .bind(Self::flags_json(entry)?)
        .bind(entry.retry_count as i64)
        .bind(&entry.description)
        .bind(&entry.failure_reason)
        .bind(&entry.processed_by)
        .bind(entry.processed_at)
        .bind(&entry.original_entry_id)
        .bind(&entry.reversal_entry_id)
        .bind(&entry.idempotency_key)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Persist the mutable part of an entry.
    ///
    /// Amount, type and creation time are never rewritten; snapshots only
    /// change while the entry has not settled.
    pub async fn update(conn: &mut SqliteConnection, entry: &LedgerEntry) -> PersistenceResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE ledger_entries SET
                balance_before = ?, balance_after = ?, status = ?, risk_score = ?,
                fraud_flags = ?, retry_count = ?, failure_reason = ?, processed_by = ?,
                processed_at = ?, reversal_entry_id = ?
            WHERE id = ?
            "#,
        )
        .bind(entry.balance_before.to_string())
        .bind(entry.balance_after.to_string())
        .bind(entry.status.to_string())
        .bind(entry.risk_score.value() as i64)
        .bind(Self::flags_json(entry)?)
        .bind(entry.retry_count as i64)
        .bind(&entry.failure_reason)
        .bind(&entry.processed_by)
        .bind(entry.processed_at)
        .bind(&entry.reversal_entry_id)
        .bind(&entry.id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::not_found("LedgerEntry", &entry.id));
        }
        Ok(())
    }

    pub async fn get_by_id(conn: &mut SqliteConnection, id: &str) -> PersistenceResult<LedgerEntry> {
        sqlx::query_as::<_, EntryRow>("SELECT * FROM ledger_entries WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| PersistenceError::not_found("LedgerEntry", id))?
            .try_into()
    }

    pub async fn find_by_idempotency_key(
        conn: &mut SqliteConnection,
        key: &str,
    ) -> PersistenceResult<Option<LedgerEntry>> {
        sqlx::query_as::<_, EntryRow>("SELECT * FROM ledger_entries WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?
            .map(LedgerEntry::try_from)
            .transpose()
    }

    /// Entries of one account in creation order
    pub async fn list_for_account(
        conn: &mut SqliteConnection,
        account_id: &str,
    ) -> PersistenceResult<Vec<LedgerEntry>> {
        sqlx::query_as::<_, EntryRow>(
            "SELECT * FROM ledger_entries WHERE account_id = ? ORDER BY created_at, rowid",
        )
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(LedgerEntry::try_from)
        .collect()
    }

    /// Admin listing, newest first
    pub async fn list(
        conn: &mut SqliteConnection,
        filter: &EntryFilter,
    ) -> PersistenceResult<Vec<LedgerEntry>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM ledger_entries WHERE 1 = 1");

        if let Some(ref account_id) = filter.account_id {
            qb.push(" AND account_id = ").push_bind(account_id.clone());
        }
        if !filter.entry_types.is_empty() {
            qb.push(" AND entry_type IN (");
            let mut list = qb.separated(", ");
            for entry_type in &filter.entry_types {
                list.push_bind(entry_type.to_string());
            }
            list.push_unseparated(")");
        }
        if !filter.statuses.is_empty() {
            qb.push(" AND status IN (");
            let mut list = qb.separated(", ");
            for status in &filter.statuses {
                list.push_bind(status.to_string());
            }
            list.push_unseparated(")");
        }
        if let Some(from) = filter.from {
            qb.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            qb.push(" AND created_at < ").push_bind(to);
        }
        if let Some(min) = filter.min_risk_score {
            qb.push(" AND risk_score >= ").push_bind(min as i64);
        }
        if let Some(ref order_id) = filter.related_order_id {
            qb.push(" AND related_order_id = ").push_bind(order_id.clone());
        }
        qb.push(" ORDER BY created_at DESC, rowid DESC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        qb.build_query_as::<EntryRow>()
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .map(LedgerEntry::try_from)
            .collect()
    }

    /// Review queue: highest score first, oldest first within a score
    pub async fn high_risk(
        conn: &mut SqliteConnection,
        threshold: u8,
        limit: u32,
    ) -> PersistenceResult<Vec<LedgerEntry>> {
        sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT * FROM ledger_entries
            WHERE risk_score >= ?
            ORDER BY risk_score DESC, created_at ASC
            LIMIT ?
            "#,
        )
        .bind(threshold as i64)
        .bind(limit as i64)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(LedgerEntry::try_from)
        .collect()
    }

    /// `(status, count)` pairs
    pub async fn count_by_status(conn: &mut SqliteConnection) -> PersistenceResult<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM ledger_entries GROUP BY status ORDER BY status",
        )
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }
}

// ============================================================================
// Order Repository
// ============================================================================

/// Repository for the `order_cashbacks` table
pub struct OrderRepo;

impl OrderRepo {
    pub async fn insert(conn: &mut SqliteConnection, order: &OrderCashback) -> PersistenceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO order_cashbacks (
                order_id, account_id, order_amount, cashback_percent, cashback_amount,
                order_status, cashback_status, delivery_date, return_period_ends,
                earned_entry_id, credited_entry_id, rejection_reason, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&order.order_id)
        .bind(&order.account_id)
        .bind(order.order_amount.to_string())
        .bind(order.cashback_percent.to_string())
        .bind(order.cashback_amount.to_string())
        .bind(order.order_status.to_string())
        .bind(order.cashback_status.to_string())
        .bind(order.delivery_date)
        .bind(order.return_period_ends)
        .bind(&order.earned_entry_id)
        .bind(&order.credited_entry_id)
        .bind(&order.rejection_reason)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Percent and amount are fixed at tracking time and never rewritten
    pub async fn update(conn: &mut SqliteConnection, order: &OrderCashback) -> PersistenceResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE order_cashbacks SET
                order_status = ?, cashback_status = ?, delivery_date = ?, return_period_ends = ?,
                earned_entry_id = ?, credited_entry_id = ?, rejection_reason = ?, updated_at = ?
            WHERE order_id = ?
            "#,
        )
        .bind(order.order_status.to_string())
        .bind(order.cashback_status.to_string())
        .bind(order.delivery_date)
        .bind(order.return_period_ends)
        .bind(&order.earned_entry_id)
        .bind(&order.credited_entry_id)
        .bind(&order.rejection_reason)
        .bind(order.updated_at)
        .bind(&order.order_id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::not_found("Order", &order.order_id));
        }
        Ok(())
    }

    pub async fn get_by_id(conn: &mut SqliteConnection, order_id: &str) -> PersistenceResult<OrderCashback> {
        sqlx::query_as::<_, OrderRow>("SELECT * FROM order_cashbacks WHERE order_id = ?")
            .bind(order_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| PersistenceError::not_found("Order", order_id))?
            .try_into()
    }

    pub async fn list_for_account(
        conn: &mut SqliteConnection,
        account_id: &str,
    ) -> PersistenceResult<Vec<OrderCashback>> {
        sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM order_cashbacks WHERE account_id = ? ORDER BY created_at",
        )
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(OrderCashback::try_from)
        .collect()
    }

    /// Approved cashback on delivered orders whose return period ended before `now`
    pub async fn list_due(
        conn: &mut SqliteConnection,
        now: DateTime<Utc>,
    ) -> PersistenceResult<Vec<OrderCashback>> {
        sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT * FROM order_cashbacks
            WHERE cashback_status = 'approved'
              AND order_status = 'delivered'
              AND return_period_ends < ?
            ORDER BY return_period_ends
            "#,
        )
        .bind(now)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(OrderCashback::try_from)
        .collect()
    }
}

// ============================================================================
// Withdrawal Repository
// ============================================================================

/// Repository for the `withdrawals` table
pub struct WithdrawalRepo;

impl WithdrawalRepo {
    pub async fn insert(conn: &mut SqliteConnection, req: &WithdrawalRequest) -> PersistenceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO withdrawals (
                id, account_id, entry_id, amount, method, status, requested_at,
                processed_at, external_transaction_id, reviewed_by, review_reason,
                reservation_released
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&req.id)
        .bind(&req.account_id)
        .bind(&req.entry_id)
        .bind(req.amount.to_string())
        .bind(req.method.to_string())
        .bind(req.status.to_string())
        .bind(req.requested_at)
        .bind(req.processed_at)
        .bind(&req.external_transaction_id)
        .bind(&req.reviewed_by)
        .bind(&req.review_reason)
        .bind(req.reservation_released)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn update(conn: &mut SqliteConnection, req: &WithdrawalRequest) -> PersistenceResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawals SET
                status = ?, processed_at = ?, external_transaction_id = ?,
                reviewed_by = ?, review_reason = ?, reservation_released = ?
            WHERE id = ?
            "#,
        )
        .bind(req.status.to_string())
        .bind(req.processed_at)
        .bind(&req.external_transaction_id)
        .bind(&req.reviewed_by)
        .bind(&req.review_reason)
        .bind(req.reservation_released)
        .bind(&req.id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::not_found("Withdrawal", &req.id));
        }
        Ok(())
    }

    pub async fn get_by_id(conn: &mut SqliteConnection, id: &str) -> PersistenceResult<WithdrawalRequest> {
        sqlx::query_as::<_, WithdrawalRow>("SELECT * FROM withdrawals WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| PersistenceError::not_found("Withdrawal", id))?
            .try_into()
    }

    pub async fn list(
        conn: &mut SqliteConnection,
        status: Option<WithdrawalStatus>,
    ) -> PersistenceResult<Vec<WithdrawalRequest>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, WithdrawalRow>(
                    "SELECT * FROM withdrawals WHERE status = ? ORDER BY requested_at",
                )
                .bind(status.to_string())
                .fetch_all(&mut *conn)
                .await?
            }
            None => {
                sqlx::query_as::<_, WithdrawalRow>("SELECT * FROM withdrawals ORDER BY requested_at")
                    .fetch_all(&mut *conn)
                    .await?
            }
        };
        rows.into_iter().map(WithdrawalRequest::try_from).collect()
    }

    /// Pending requests older than `before`
    pub async fn list_pending_before(
        conn: &mut SqliteConnection,
        before: DateTime<Utc>,
    ) -> PersistenceResult<Vec<WithdrawalRequest>> {
        sqlx::query_as::<_, WithdrawalRow>(
            "SELECT * FROM withdrawals WHERE status = 'pending' AND requested_at < ? ORDER BY requested_at",
        )
        .bind(before)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(WithdrawalRequest::try_from)
        .collect()
    }
}

// ============================================================================
// Database Functions
// ============================================================================

/// Open a pool on `database_url`, creating the file if missing.
///
/// SQLite admits one writer at a time; the pool holds a single connection so
/// transactions queue for it instead of failing with `SQLITE_BUSY`.
pub async fn create_pool(database_url: &str) -> PersistenceResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Single-connection in-memory pool; the connection is never recycled so the
/// database lives as long as the pool
pub async fn create_memory_pool() -> PersistenceResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Run migrations
pub async fn run_migrations(pool: &SqlitePool) -> PersistenceResult<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// Create database with schema
pub async fn init_database(database_url: &str) -> PersistenceResult<SqlitePool> {
    let pool = create_pool(database_url).await?;
    run_migrations(&pool).await?;
    tracing::debug!(database_url, "database initialised");
    Ok(pool)
}
