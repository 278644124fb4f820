//! Command handlers, one module per command group

pub mod account;
pub mod admin;
pub mod ledger;
pub mod order;
pub mod withdraw;

use anyhow::{Context, Result};
use cashledger_business::{LedgerConfig, ServiceContext};
use std::path::Path;

/// Open the database and build the service context
pub async fn context(db_path: &Path, config: Option<&Path>) -> Result<ServiceContext> {
    let config = match config {
        Some(path) => LedgerConfig::from_file(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => LedgerConfig::default(),
    };
    let db = crate::db::connect(db_path).await?;
    Ok(ServiceContext::new(db, config))
}

/// Let queued notifications go out, then close the pool
pub async fn finish(ctx: &ServiceContext) {
    tokio::task::yield_now().await;
    ctx.db().close().await;
}
