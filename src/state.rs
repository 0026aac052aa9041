use std::time::Duration;

use diesel::{
    SqliteConnection,
    connection::SimpleConnection,
    r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection},
};
use diesel_migrations::MigrationHarness;

use crate::MIGRATIONS;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

pub type Conn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Applied to every connection handed out by the pool. SQLite does not
/// persist these settings, so they have to be set per connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    pub busy_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error>
    for ConnectionOptions
{
    fn on_acquire(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {};",
            self.busy_timeout.as_millis()
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolSetupError {
    #[error(transparent)]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("failed to run migrations: {0}")]
    Migrations(String),
}

/// Builds a pool for `db_url` and brings its schema up to date.
///
/// `:memory:` databases are private to one connection, so the pool is capped
/// at a single connection for them.
pub fn make_pool(db_url: &str) -> Result<DbPool, PoolSetupError> {
    let in_memory = db_url == ":memory:";

    let pool: DbPool = Pool::builder()
        .max_size(if in_memory { 1 } else { 10 })
        .connection_customizer(Box::new(ConnectionOptions::default()))
        .build(ConnectionManager::<SqliteConnection>::new(db_url))?;

    {
        let span = tracing::span!(tracing::Level::INFO, "migrations");
        let _guard = span.enter();
        let mut conn = pool.get()?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| PoolSetupError::Migrations(e.to_string()))?;
    }

    tracing::info!(location = db_url, "database ready");

    Ok(pool)
}
