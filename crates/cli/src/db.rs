//! Database initialization and status

use anyhow::{Context, Result};
use cashledger_persistence::{AccountRepo, Database, EntryRepo, WithdrawalRepo};
use cashledger_core::WithdrawalStatus;
use std::path::Path;

fn db_url(db_path: &Path) -> String {
    format!("sqlite:{}", db_path.display())
}

/// Create the database file and run migrations
pub async fn init_database(db_path: &Path, force: bool) -> Result<()> {
    if force && db_path.exists() {
        std::fs::remove_file(db_path).context("Failed to remove existing database")?;
        println!("🗑️  Removed existing database");
    }

    println!("📦 Running migrations...");
    let db = Database::open(&db_url(db_path))
        .await
        .context("Failed to initialize database")?;
    db.close().await;
    Ok(())
}

/// Open an existing database
pub async fn connect(db_path: &Path) -> Result<Database> {
    if !db_path.exists() {
        anyhow::bail!(
            "Database not found at {:?}. Run 'cashledger init' first",
            db_path
        );
    }
    Database::open(&db_url(db_path))
        .await
        .context("Failed to connect to database")
}

/// Show database status
pub async fn show_status(db_path: &Path) -> Result<()> {
    if !db_path.exists() {
        println!("❌ Database not found at {:?}", db_path);
        println!("   Run 'cashledger init' to create the database");
        return Ok(());
    }

    let db = connect(db_path).await?;
    let mut conn = db.pool().acquire().await?;

    let accounts = AccountRepo::count(&mut conn).await?;
    let entries = EntryRepo::count_by_status(&mut conn).await?;
    let pending = WithdrawalRepo::list(&mut conn, Some(WithdrawalStatus::Pending)).await?;

    println!("📊 Database Status");
    println!("   Path: {:?}", db_path);
    println!();
    println!("   Accounts:            {}", accounts);
    println!(
        "   Entries:             {}",
        entries.iter().map(|(_, n)| n).sum::<i64>()
    );
    for (status, count) in &entries {
        println!("     {:<18} {}", status, count);
    }
    println!("   Pending withdrawals: {}", pending.len());

    drop(conn);
    db.close().await;
    Ok(())
}
