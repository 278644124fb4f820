//! # CashLedger Persistence
//!
//! SQLite storage for the ledger core.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Database                             │
//! │  ┌──────────┐  ┌───────────────┐  ┌────────────┐  ┌────────┐ │
//! │  │ accounts │  │ledger_entries │  │order_cash- │  │withdraw│ │
//! │  │          │  │ (append-only) │  │   backs    │  │  -als  │ │
//! │  └──────────┘  └───────────────┘  └────────────┘  └────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cashledger_persistence::{AccountRepo, Database};
//!
//! let db = Database::open("sqlite:cashledger.db").await?;
//! let mut tx = db.pool().begin().await?;
//! let account = AccountRepo::get_by_id(&mut tx, &account_id).await?;
//! tx.commit().await?;
//! ```

pub mod error;
pub mod sqlite;

pub use error::{PersistenceError, PersistenceResult};
pub use sqlite::schema::{AccountRow, EntryRow, OrderRow, WithdrawalRow};
pub use sqlite::{
    create_memory_pool, create_pool, init_database, run_migrations, AccountRepo, EntryRepo,
    OrderRepo, WithdrawalRepo,
};

use sqlx::SqlitePool;

/// Database facade
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) and migrate the database at `db_url`
    ///
    /// # Arguments
    /// * `db_url` - SQLite database URL (e.g., "sqlite:cashledger.db")
    pub async fn open(db_url: &str) -> PersistenceResult<Self> {
        let pool = init_database(db_url).await?;
        Ok(Self { pool })
    }

    /// Fresh migrated in-memory database, used by tests and dry runs
    pub async fn in_memory() -> PersistenceResult<Self> {
        let pool = create_memory_pool().await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
