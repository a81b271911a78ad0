pub mod chart;
pub mod migrate;
pub mod resolve;
pub mod tenant;

use sqlx::PgPool;
use std::sync::Arc;

use crate::database::DatabaseManager;
use crate::tenant::directory::{PgAccountSource, TenantDirectory};

/// Connect to the platform database and build the tenant directory.
pub(crate) async fn open_directory() -> anyhow::Result<(Arc<TenantDirectory>, PgPool)> {
    let pool = DatabaseManager::main_pool().await?;
    let accounts = Arc::new(PgAccountSource::new(pool.clone()));
    let directory = Arc::new(TenantDirectory::new(accounts, pool.clone()));
    Ok((directory, pool))
}
