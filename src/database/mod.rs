pub mod models;
pub mod queries;
pub mod schema;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

/// Explicitly constructed store handle, injected everywhere it is needed.
/// Lifecycle: built at process start, `close()` on shutdown.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Database { pool })
    }

    /// In-memory database for tests. Single connection, since every SQLite
    /// `:memory:` connection is its own database.
    pub async fn new_in_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let database = Database { pool };
        database.apply_schema().await?;
        Ok(database)
    }

    pub async fn apply_schema(&self) -> Result<(), sqlx::Error> {
        for statement in schema::SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Database schema applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
