//! `SQLite`-backed entry repository.

use chrono::{SecondsFormat, Utc};
use entry_structs::{NewTimeEntry, TimeEntry};
use sqlx::SqlitePool;
use tracing::debug;

use crate::{ChangeFeed, EntryRow, EntrySource};

const SELECT_COLUMNS: &str = "SELECT id, world_time, adel_time, reason, created_at FROM entries";

/// Repository for entry operations.
#[derive(Debug, Clone)]
pub struct SqliteEntryRepository {
    pool: SqlitePool,
    changes: ChangeFeed,
}

impl SqliteEntryRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            changes: ChangeFeed::new(),
        }
    }

    /// Creates a new entry record and signals the change feed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn create(&self, input: NewTimeEntry) -> Result<TimeEntry, sqlx::Error> {
        let created_at = Utc::now();
        let delay = input.delay_minutes();
        let preview = TimeEntry::from_new(0, input.clone(), created_at);

        let id = sqlx::query(
            r"
            INSERT INTO entries (
                world_time, world_time_ms, adel_time, delay_minutes,
                hour_of_day, day_of_week, minutes_since_midnight,
                reason, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(input.world_time.to_rfc3339_opts(SecondsFormat::Millis, false))
        .bind(input.world_time.timestamp_millis())
        .bind(input.adel_time.to_rfc3339_opts(SecondsFormat::Millis, false))
        .bind(delay)
        .bind(i64::from(preview.hour_of_day()))
        .bind(i64::from(preview.day_of_week()))
        .bind(i64::from(preview.minutes_since_midnight()))
        .bind(input.reason.map(|r| r.to_string()))
        .bind(created_at.to_rfc3339_opts(SecondsFormat::Millis, true))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        debug!(id, delay, "Recorded entry");
        self.changes.notify();

        Ok(TimeEntry::from_new(id, input, created_at))
    }

    /// Finds an entry by its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn find_by_id(&self, id: i64) -> Result<Option<TimeEntry>, sqlx::Error> {
        let query = format!("{SELECT_COLUMNS} WHERE id = ?");
        sqlx::query_as::<_, EntryRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(TimeEntry::try_from)
            .transpose()
    }

    /// Deletes an entry. Returns `false` if no such entry existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn delete(&self, id: i64) -> Result<bool, sqlx::Error> {
        let deleted = sqlx::query("DELETE FROM entries WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected()
            > 0;

        if deleted {
            debug!(id, "Deleted entry");
            self.changes.notify();
        }

        Ok(deleted)
    }
}

impl EntrySource for SqliteEntryRepository {
    async fn list_entries(&self) -> Result<Vec<TimeEntry>, sqlx::Error> {
        let query = format!("{SELECT_COLUMNS} ORDER BY world_time_ms DESC, id DESC");
        sqlx::query_as::<_, EntryRow>(&query)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(TimeEntry::try_from)
            .collect()
    }

    async fn count_entries(&self) -> Result<usize, sqlx::Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
            .fetch_one(&self.pool)
            .await?;

        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn changes(&self) -> &ChangeFeed {
        &self.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};

    async fn repository() -> SqliteEntryRepository {
        let pool = create_pool("sqlite::memory:").await.expect("pool");
        run_migrations(&pool).await.expect("migrations");
        SqliteEntryRepository::new(pool)
    }

    fn input(world: &str, adel: &str) -> NewTimeEntry {
        NewTimeEntry::parse(world, adel, Some("traffic")).expect("valid input")
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let repo = repository().await;
        let created = repo
            .create(input("2024-05-01T09:00:00-04:00", "2024-05-01T09:25:00-04:00"))
            .await
            .expect("create");

        let found = repo
            .find_by_id(created.id())
            .await
            .expect("query")
            .expect("entry exists");

        assert_eq!(found.delay_minutes(), 25);
        assert_eq!(found.hour_of_day(), 9);
        assert_eq!(found.world_time(), created.world_time());
        assert_eq!(found.reason(), created.reason());
    }

    #[tokio::test]
    async fn test_list_is_most_recent_first_by_stated_time() {
        let repo = repository().await;
        // Same instant ordering must not depend on the textual offset.
        repo.create(input("2024-05-02T01:00:00+05:00", "2024-05-02T01:10:00+05:00"))
            .await
            .expect("create");
        repo.create(input("2024-05-01T22:00:00Z", "2024-05-01T22:05:00Z"))
            .await
            .expect("create");
        repo.create(input("2024-04-30T22:00:00Z", "2024-04-30T22:30:00Z"))
            .await
            .expect("create");

        let delays: Vec<i64> = repo
            .list_entries()
            .await
            .expect("list")
            .iter()
            .map(TimeEntry::delay_minutes)
            .collect();

        // 01:00+05:00 is 20:00Z on May 1st, earlier than 22:00Z.
        assert_eq!(delays, vec![5, 10, 30]);
        assert_eq!(repo.count_entries().await.expect("count"), 3);
    }

    #[tokio::test]
    async fn test_writes_notify_change_feed() {
        let repo = repository().await;
        let before = repo.changes().version();

        let entry = repo
            .create(input("2024-05-01T09:00:00Z", "2024-05-01T09:05:00Z"))
            .await
            .expect("create");
        assert_eq!(repo.changes().version(), before + 1);

        assert!(repo.delete(entry.id()).await.expect("delete"));
        assert_eq!(repo.changes().version(), before + 2);

        assert!(!repo.delete(entry.id()).await.expect("delete"));
        assert_eq!(repo.changes().version(), before + 2);
        assert_eq!(repo.count_entries().await.expect("count"), 0);
    }
}
