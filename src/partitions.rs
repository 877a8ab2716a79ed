//! Weekly time partitions.
//!
//! A partition is `[start, start + 7 days)` in UTC, aligned to the
//! configured start date. Its key is the start date as `YYYY-MM-DD`.
//! Everything here is a pure function of the key and a clock value; no
//! scheduler state is kept.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::fmt;

/// Key used for steps that are not partitioned (docs).
pub const UNPARTITIONED_KEY: &str = "all";

const KEY_FORMAT: &str = "%Y-%m-%d";

/// A half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window covering whole days `[start, end)`.
    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end <= start {
            bail!("window end {} must be after start {}", end, start);
        }
        Ok(Self {
            start: midnight(start),
            end: midnight(end),
        })
    }

    /// Partition key: the start date.
    pub fn key(&self) -> String {
        self.start.format(KEY_FORMAT).to_string()
    }

    /// First day of the window.
    pub fn start_date(&self) -> NaiveDate {
        self.start.date_naive()
    }

    /// Last day contained in the window (the day before the exclusive end).
    pub fn last_date(&self) -> NaiveDate {
        (self.end - Duration::days(1)).date_naive()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format(KEY_FORMAT),
            self.end.format(KEY_FORMAT)
        )
    }
}

/// Weekly partitions starting at `start`.
#[derive(Debug, Clone, Copy)]
pub struct WeeklyPartitions {
    start: NaiveDate,
}

impl WeeklyPartitions {
    pub fn new(start: NaiveDate) -> Self {
        Self { start }
    }

    /// Window for partition `key`.
    ///
    /// Fails if the key is not a date, precedes the first partition, or
    /// does not fall on a partition boundary.
    pub fn window_for_key(&self, key: &str) -> Result<TimeWindow> {
        let date = NaiveDate::parse_from_str(key.trim(), KEY_FORMAT)
            .with_context(|| format!("invalid partition key '{}': expected YYYY-MM-DD", key))?;
        if date < self.start {
            bail!(
                "partition key {} is before the first partition {}",
                date,
                self.start
            );
        }
        let offset = (date - self.start).num_days();
        if offset % 7 != 0 {
            bail!(
                "partition key {} is not aligned to weekly partitions starting {}",
                date,
                self.start
            );
        }
        TimeWindow::from_dates(date, date + Duration::days(7))
    }

    /// Keys of every complete partition whose end is at or before `until`,
    /// oldest first.
    pub fn partition_keys(&self, until: DateTime<Utc>) -> Vec<String> {
        let mut keys = Vec::new();
        let mut start = self.start;
        loop {
            let end = start + Duration::days(7);
            if midnight(end) > until {
                break;
            }
            keys.push(start.format(KEY_FORMAT).to_string());
            start = end;
        }
        keys
    }

    /// The most recent partition that has fully elapsed at `now`.
    pub fn latest_complete(&self, now: DateTime<Utc>) -> Option<TimeWindow> {
        let today = now.date_naive();
        if today < self.start {
            return None;
        }
        // Index of the partition containing today; the one before it is
        // the latest to have ended.
        let current = (today - self.start).num_days() / 7;
        if current == 0 {
            return None;
        }
        let start = self.start + Duration::days(7 * (current - 1));
        TimeWindow::from_dates(start, start + Duration::days(7)).ok()
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
