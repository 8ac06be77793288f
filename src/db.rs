//! Database pool creation and schema migration.
//!
//! Both nodes open the same DATABASE_URL; the orchestrator owns writes to
//! deck/template/prompt rows, the worker writes the visual-analysis cache and
//! classification records.

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Create a connection pool and apply pending migrations.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    // Each pooled connection to an in-memory database would get its own
    // empty database, so in-memory URLs are pinned to a single connection.
    let max_connections = if database_url.contains(":memory:") { 1 } else { 10 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await?;

    sqlx::migrate!().run(&pool).await?;

    Ok(pool)
}
