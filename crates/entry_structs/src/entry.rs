//! Recorded arrivals and the input they are built from.

use core::cmp::Ordering;
use core::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

use crate::{
    LateReason, day_of_week, delay_minutes, hour_of_day, minutes_since_midnight, parse_timestamp,
};

/// A recorded arrival.
///
/// Every calendar field is derived from `world_time` and the delay from both
/// timestamps at construction, so none of them can drift out of sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    id: i64,
    world_time: DateTime<FixedOffset>,
    adel_time: DateTime<FixedOffset>,
    delay_minutes: i64,
    hour_of_day: u32,
    day_of_week: u32,
    minutes_since_midnight: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<LateReason>,
    created_at: DateTime<Utc>,
}

impl TimeEntry {
    #[must_use]
    pub fn new(
        id: i64,
        world_time: DateTime<FixedOffset>,
        adel_time: DateTime<FixedOffset>,
        reason: Option<LateReason>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            delay_minutes: delay_minutes(&world_time, &adel_time),
            hour_of_day: hour_of_day(&world_time),
            day_of_week: day_of_week(&world_time),
            minutes_since_midnight: minutes_since_midnight(&world_time),
            world_time,
            adel_time,
            reason,
            created_at,
        }
    }

    /// Materializes a submitted entry once the repository has assigned an id.
    #[must_use]
    pub fn from_new(id: i64, input: NewTimeEntry, created_at: DateTime<Utc>) -> Self {
        Self::new(id, input.world_time, input.adel_time, input.reason, created_at)
    }

    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    #[must_use]
    pub const fn world_time(&self) -> &DateTime<FixedOffset> {
        &self.world_time
    }

    #[must_use]
    pub const fn adel_time(&self) -> &DateTime<FixedOffset> {
        &self.adel_time
    }

    #[must_use]
    pub const fn delay_minutes(&self) -> i64 {
        self.delay_minutes
    }

    #[must_use]
    pub const fn hour_of_day(&self) -> u32 {
        self.hour_of_day
    }

    #[must_use]
    pub const fn day_of_week(&self) -> u32 {
        self.day_of_week
    }

    #[must_use]
    pub const fn minutes_since_midnight(&self) -> u32 {
        self.minutes_since_midnight
    }

    #[must_use]
    pub const fn reason(&self) -> Option<LateReason> {
        self.reason
    }

    #[must_use]
    pub const fn created_at(&self) -> &DateTime<Utc> {
        &self.created_at
    }
}

/// Chronological order: stated time first, id breaks ties.
#[must_use]
pub fn chronological_cmp(a: &TimeEntry, b: &TimeEntry) -> Ordering {
    a.world_time
        .cmp(&b.world_time)
        .then_with(|| a.id.cmp(&b.id))
}

/// Sorts entries the way the repositories hand them out, newest first.
pub fn sort_most_recent_first(entries: &mut [TimeEntry]) {
    entries.sort_by(|a, b| chronological_cmp(b, a));
}

/// Input for recording a new arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTimeEntry {
    pub world_time: DateTime<FixedOffset>,
    pub adel_time: DateTime<FixedOffset>,
    pub reason: Option<LateReason>,
}

impl NewTimeEntry {
    /// Validates raw user input.
    ///
    /// # Errors
    ///
    /// Returns an error if a timestamp is not RFC 3339 or the reason is unknown.
    pub fn parse(
        world_time: &str,
        adel_time: &str,
        reason: Option<&str>,
    ) -> Result<Self, EntryInputError> {
        if world_time.trim().is_empty() || adel_time.trim().is_empty() {
            return Err(EntryInputError::MissingTimestamp);
        }

        let world_time = parse_timestamp(world_time)
            .map_err(|_| EntryInputError::InvalidWorldTime(world_time.to_string()))?;
        let adel_time = parse_timestamp(adel_time)
            .map_err(|_| EntryInputError::InvalidAdelTime(adel_time.to_string()))?;

        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(|r| {
                LateReason::from_str(r).map_err(|_| EntryInputError::UnknownReason(r.to_string()))
            })
            .transpose()?;

        Ok(Self {
            world_time,
            adel_time,
            reason,
        })
    }

    #[must_use]
    pub fn delay_minutes(&self) -> i64 {
        delay_minutes(&self.world_time, &self.adel_time)
    }
}

/// Rejected entry input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryInputError {
    #[error("Both worldTime and adelTime are required")]
    MissingTimestamp,

    #[error("Invalid worldTime format: {0}")]
    InvalidWorldTime(String),

    #[error("Invalid adelTime format: {0}")]
    InvalidAdelTime(String),

    #[error("Unknown late reason: {0}")]
    UnknownReason(String),
}
