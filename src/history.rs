//! Daily heart-rate history
//!
//! `HistoryAggregator` queries a time-series source over a trailing window and
//! reduces the samples to one arithmetic mean per calendar day. Days are
//! computed at a fixed UTC offset; days without samples are omitted.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::config::{SyncConfig, MAX_DAY_OFFSET_MINUTES, MAX_HISTORY_WINDOW_DAYS};
use crate::error::SyncError;
use crate::types::{DailyAverage, Sample};

/// Source of historical heart-rate samples
pub trait TimeSeriesSource {
    /// Samples with `start <= timestamp <= end`, in any order
    fn heart_rate_samples(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Sample>, SyncError>;
}

/// Samples held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    samples: Vec<Sample>,
}

impl InMemorySource {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// One JSON sample per line; blank lines are skipped
    pub fn from_ndjson(text: &str) -> Result<Self, SyncError> {
        let mut samples = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let sample: Sample = serde_json::from_str(line).map_err(|e| {
                SyncError::SourceError(format!("line {}: {}", index + 1, e))
            })?;
            samples.push(sample);
        }
        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl TimeSeriesSource for InMemorySource {
    fn heart_rate_samples(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Sample>, SyncError> {
        Ok(self
            .samples
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp <= end)
            .copied()
            .collect())
    }
}

/// Per-day averages over a trailing window
pub struct HistoryAggregator<S: TimeSeriesSource> {
    source: S,
    /// Shift applied to UTC instants before taking the calendar day
    day_offset: Duration,
}

impl<S: TimeSeriesSource> HistoryAggregator<S> {
    /// Aggregator bucketing by UTC calendar day
    pub fn new(source: S) -> Self {
        Self {
            source,
            day_offset: Duration::zero(),
        }
    }

    /// Bucket by calendar day at a fixed offset from UTC
    pub fn with_day_offset_minutes(mut self, minutes: i32) -> Result<Self, SyncError> {
        if minutes.abs() >= MAX_DAY_OFFSET_MINUTES {
            return Err(SyncError::ConfigError(format!(
                "day_offset_minutes out of range: {}",
                minutes
            )));
        }
        self.day_offset = Duration::minutes(i64::from(minutes));
        Ok(self)
    }

    pub fn from_config(source: S, config: &SyncConfig) -> Result<Self, SyncError> {
        Self::new(source).with_day_offset_minutes(config.day_offset_minutes)
    }

    /// Averages for the `window_days` days up to now
    pub fn compute_daily_averages(&self, window_days: u32) -> Result<Vec<DailyAverage>, SyncError> {
        self.compute_daily_averages_at(window_days, Utc::now())
    }

    /// Averages over `[now - window_days, now]`, ascending by day
    pub fn compute_daily_averages_at(
        &self,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<DailyAverage>, SyncError> {
        if window_days == 0 || window_days > MAX_HISTORY_WINDOW_DAYS {
            return Err(SyncError::ConfigError(format!(
                "window_days must be between 1 and {}, got {}",
                MAX_HISTORY_WINDOW_DAYS, window_days
            )));
        }

        let start = now
            .checked_sub_signed(Duration::days(i64::from(window_days)))
            .ok_or_else(|| {
                SyncError::ConfigError(format!(
                    "window of {} days ending {} is out of range",
                    window_days, now
                ))
            })?;
        let samples = self.source.heart_rate_samples(start, now)?;

        let mut days: BTreeMap<NaiveDate, (f64, u32)> = BTreeMap::new();
        let mut skipped = 0usize;
        for sample in samples {
            // Sources may return samples outside the requested range
            if sample.timestamp < start || sample.timestamp > now {
                continue;
            }
            let local = match sample.timestamp.checked_add_signed(self.day_offset) {
                Some(local) if sample.is_valid() => local,
                _ => {
                    skipped += 1;
                    continue;
                }
            };
            let day = local.date_naive();
            let entry = days.entry(day).or_insert((0.0, 0));
            entry.0 += sample.bpm;
            entry.1 += 1;
        }
        if skipped > 0 {
            log::warn!("Skipped {} invalid heart rate samples", skipped);
        }

        Ok(days
            .into_iter()
            .map(|(day, (sum, count))| DailyAverage {
                day,
                bpm: round3(sum / f64::from(count)),
            })
            .collect())
    }
}

/// Reversed copy for newest-first presentation
pub fn most_recent_first(averages: &[DailyAverage]) -> Vec<DailyAverage> {
    averages.iter().rev().copied().collect()
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
