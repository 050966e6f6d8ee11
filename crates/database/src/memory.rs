//! In-memory entry repository.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use entry_structs::{NewTimeEntry, TimeEntry, sort_most_recent_first};
use tokio::sync::RwLock;

use crate::{ChangeFeed, EntrySource};

/// Entries kept in process memory, newest first.
#[derive(Debug)]
pub struct MemoryEntryRepository {
    entries: RwLock<Vec<TimeEntry>>,
    next_id: AtomicI64,
    changes: ChangeFeed,
}

impl Default for MemoryEntryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEntryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
            changes: ChangeFeed::new(),
        }
    }

    /// Creates a new entry and signals the change feed.
    ///
    /// # Errors
    ///
    /// Never fails; the signature matches the `SQLite` repository.
    pub async fn create(&self, input: NewTimeEntry) -> Result<TimeEntry, sqlx::Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = TimeEntry::from_new(id, input, Utc::now());

        {
            let mut entries = self.entries.write().await;
            entries.push(entry.clone());
            sort_most_recent_first(&mut entries);
        }

        self.changes.notify();
        Ok(entry)
    }

    /// # Errors
    ///
    /// Never fails; the signature matches the `SQLite` repository.
    pub async fn find_by_id(&self, id: i64) -> Result<Option<TimeEntry>, sqlx::Error> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .find(|e| e.id() == id)
            .cloned())
    }

    /// Deletes an entry. Returns `false` if no such entry existed.
    ///
    /// # Errors
    ///
    /// Never fails; the signature matches the `SQLite` repository.
    pub async fn delete(&self, id: i64) -> Result<bool, sqlx::Error> {
        let deleted = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|e| e.id() != id);
            entries.len() != before
        };

        if deleted {
            self.changes.notify();
        }
        Ok(deleted)
    }
}

impl EntrySource for MemoryEntryRepository {
    async fn list_entries(&self) -> Result<Vec<TimeEntry>, sqlx::Error> {
        Ok(self.entries.read().await.clone())
    }

    async fn count_entries(&self) -> Result<usize, sqlx::Error> {
        Ok(self.entries.read().await.len())
    }

    fn changes(&self) -> &ChangeFeed {
        &self.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(world: &str, delay: i64) -> NewTimeEntry {
        let world_time = entry_structs::parse_timestamp(world).expect("valid timestamp");
        NewTimeEntry {
            world_time,
            adel_time: entry_structs::add_minutes(&world_time, delay).expect("in range"),
            reason: None,
        }
    }

    #[tokio::test]
    async fn test_crud_and_ordering() {
        let repo = MemoryEntryRepository::new();
        let older = repo
            .create(input("2024-01-01T09:00:00Z", 10))
            .await
            .expect("create");
        let newer = repo
            .create(input("2024-01-02T09:00:00Z", 20))
            .await
            .expect("create");

        let listed = repo.list_entries().await.expect("list");
        assert_eq!(listed.first().map(TimeEntry::id), Some(newer.id()));
        assert_eq!(repo.count_entries().await.expect("count"), 2);
        assert_eq!(repo.changes().version(), 2);

        assert!(repo.delete(older.id()).await.expect("delete"));
        assert!(repo.find_by_id(older.id()).await.expect("find").is_none());
        assert!(!repo.delete(older.id()).await.expect("delete"));
        assert_eq!(repo.changes().version(), 3);
    }
}
