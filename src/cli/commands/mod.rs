use anyhow::Result;
use std::sync::Arc;

use crate::config::SecureRailsConfig;
use crate::database::DatabaseManager;
use crate::store::SqliteStore;

pub mod init;
pub mod locate;
pub mod seed;
pub mod serve;
pub mod status;

/// Opens the configured database for one-shot commands
pub async fn with_store<F, Fut, R>(config: &SecureRailsConfig, f: F) -> Result<R>
where
    F: FnOnce(Arc<SqliteStore>) -> Fut,
    Fut: std::future::Future<Output = Result<R>>,
{
    let database = DatabaseManager::from_config(&config.database).await?;
    let store = Arc::new(SqliteStore::new(database.pool().clone()));
    let result = f(store).await;
    database.shutdown().await;
    result
}

pub fn show_how_to_get_started() {
    println!("SecureRails - batch transport tracking");
    println!();
    println!("To get started:");
    println!("  securerails init                # Write a default securerails.toml");
    println!("  securerails seed data.toml      # Load batches and transporters");
    println!("  securerails serve               # Run the portal API");
    println!();
    println!("Operator tools:");
    println!("  securerails status BATCH-001    # Inspect a batch's transport record");
    println!("  securerails locate --lat --lon  # Check address resolution");
}
