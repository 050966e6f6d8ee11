//! Storage for recorded arrivals.
//!
//! The prediction core only sees [`EntrySource`] (read side) and
//! [`ChangeFeed`] (the hook fired after every create/delete). Two
//! repositories implement both: [`SqliteEntryRepository`] for real use and
//! [`MemoryEntryRepository`] for tests and throwaway sessions.

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

mod change_feed;
mod memory;
mod models;
mod repositories;
mod source;

pub use change_feed::ChangeFeed;
pub use memory::MemoryEntryRepository;
pub use models::EntryRow;
pub use repositories::SqliteEntryRepository;
pub use source::EntrySource;

/// Creates a connection pool to the `SQLite` database.
///
/// In-memory databases are pinned to a single long-lived connection, since
/// each new connection would otherwise see its own empty database.
///
/// # Errors
///
/// Returns an error if the connection to the database fails.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = if database_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };

    options.connect(database_url).await
}

/// Runs all pending migrations.
///
/// # Errors
///
/// Returns an error if running migrations fails.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
