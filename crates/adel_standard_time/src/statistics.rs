//! Descriptive statistics over recorded arrivals.

use std::collections::BTreeMap;

use entry_structs::{TimeEntry, chronological_cmp, day_name};
use feature_extractor::window_mean;
use serde::Serialize;

/// Delays at or below this many minutes count as on time.
pub const ON_TIME_THRESHOLD_MINUTES: i64 = 5;

/// Entries per trend window.
pub const TREND_WINDOW: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub overall: OverallStatistics,
    pub by_hour: Vec<HourlyStats>,
    pub by_day: Vec<DailyStats>,
    pub recent_trend: RecentTrend,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallStatistics {
    pub total_entries: usize,
    pub average_delay: f64,
    pub median_delay: f64,
    pub max_delay: i64,
    pub min_delay: i64,
    /// Population standard deviation.
    pub standard_deviation: f64,
    /// Share of entries at most [`ON_TIME_THRESHOLD_MINUTES`] late, in percent.
    pub on_time_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyStats {
    pub hour: u32,
    pub average_delay: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub day_of_week: u32,
    pub day_name: String,
    pub average_delay: f64,
    pub count: usize,
}

/// Latest ten entries against the ten before them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentTrend {
    pub improving: bool,
    pub last10_average: f64,
    pub previous10_average: f64,
}

/// Summarizes `entries`, in any order.
#[must_use]
pub fn summarize(entries: &[TimeEntry]) -> Statistics {
    if entries.is_empty() {
        return Statistics::default();
    }

    let delays: Vec<i64> = entries.iter().map(TimeEntry::delay_minutes).collect();

    Statistics {
        overall: overall(&delays),
        by_hour: buckets(entries, TimeEntry::hour_of_day)
            .map(|(hour, (average_delay, count))| HourlyStats {
                hour,
                average_delay,
                count,
            })
            .collect(),
        by_day: buckets(entries, TimeEntry::day_of_week)
            .map(|(day, (average_delay, count))| DailyStats {
                day_of_week: day,
                day_name: day_name(day).to_string(),
                average_delay,
                count,
            })
            .collect(),
        recent_trend: trend(entries),
    }
}

fn overall(delays: &[i64]) -> OverallStatistics {
    let count = delays.len() as f64;
    let mean = delays.iter().sum::<i64>() as f64 / count;
    let variance = delays
        .iter()
        .map(|&d| (d as f64 - mean).powi(2))
        .sum::<f64>()
        / count;
    let on_time = delays
        .iter()
        .filter(|&&d| d <= ON_TIME_THRESHOLD_MINUTES)
        .count();

    OverallStatistics {
        total_entries: delays.len(),
        average_delay: mean,
        median_delay: median(delays),
        max_delay: delays.iter().copied().max().unwrap_or_default(),
        min_delay: delays.iter().copied().min().unwrap_or_default(),
        standard_deviation: variance.sqrt(),
        on_time_percentage: on_time as f64 / count * 100.0,
    }
}

/// True median: the mean of the two middle values for even counts.
fn median(delays: &[i64]) -> f64 {
    let mut sorted = delays.to_vec();
    sorted.sort_unstable();

    let mid = sorted.len() / 2;
    match (sorted.len() % 2, sorted.get(mid)) {
        (_, None) => 0.0,
        (1, Some(&middle)) => middle as f64,
        (_, Some(&upper)) => {
            let lower = sorted.get(mid - 1).copied().unwrap_or(upper);
            (lower + upper) as f64 / 2.0
        }
    }
}

/// Mean delay and count per key, ascending by key. Empty buckets never appear.
fn buckets(
    entries: &[TimeEntry],
    key: impl Fn(&TimeEntry) -> u32,
) -> impl Iterator<Item = (u32, (f64, usize))> {
    let mut sums: BTreeMap<u32, (i64, usize)> = BTreeMap::new();
    for entry in entries {
        let bucket = sums.entry(key(entry)).or_default();
        bucket.0 += entry.delay_minutes();
        bucket.1 += 1;
    }

    sums.into_iter()
        .map(|(k, (sum, count))| (k, (sum as f64 / count as f64, count)))
}

fn trend(entries: &[TimeEntry]) -> RecentTrend {
    if entries.len() < 2 * TREND_WINDOW {
        return RecentTrend::default();
    }

    let mut newest_first: Vec<&TimeEntry> = entries.iter().collect();
    newest_first.sort_by(|a, b| chronological_cmp(b, a));
    let delays = || newest_first.iter().map(|e| e.delay_minutes());

    let last = window_mean(delays(), TREND_WINDOW).unwrap_or_default();
    let previous = window_mean(delays().skip(TREND_WINDOW), TREND_WINDOW).unwrap_or_default();

    RecentTrend {
        improving: last < previous,
        last10_average: last,
        previous10_average: previous,
    }
}
