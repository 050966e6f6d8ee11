use core::future::Future;

use entry_structs::TimeEntry;

use crate::ChangeFeed;

/// Read access to recorded arrivals, as consumed by the prediction core.
pub trait EntrySource: Send + Sync {
    /// All entries, most recent first.
    fn list_entries(&self) -> impl Future<Output = Result<Vec<TimeEntry>, sqlx::Error>> + Send;

    fn count_entries(&self) -> impl Future<Output = Result<usize, sqlx::Error>> + Send;

    /// Hook fired after every create or delete.
    fn changes(&self) -> &ChangeFeed;
}
