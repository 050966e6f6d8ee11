//! Database row types.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use entry_structs::{LateReason, TimeEntry, parse_timestamp};

/// An `entries` row as stored.
///
/// Derived columns (`delay_minutes`, `hour_of_day`, ...) exist for indexing
/// only. They are recomputed from the timestamps when the row is read back.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EntryRow {
    pub id: i64,
    pub world_time: String,
    pub adel_time: String,
    pub reason: Option<String>,
    pub created_at: String,
}

impl TryFrom<EntryRow> for TimeEntry {
    type Error = sqlx::Error;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let world_time = parse_timestamp(&row.world_time).map_err(decode_error)?;
        let adel_time = parse_timestamp(&row.adel_time).map_err(decode_error)?;
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map_err(decode_error)?
            .with_timezone(&Utc);
        let reason = row
            .reason
            .as_deref()
            .map(LateReason::from_str)
            .transpose()
            .map_err(decode_error)?;

        Ok(Self::new(row.id, world_time, adel_time, reason, created_at))
    }
}

fn decode_error(err: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(err))
}
