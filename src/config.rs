//! Relay configuration
//!
//! Tunable values for the coordinators and the history aggregator. Every
//! field has a default, so a partial JSON object is a valid configuration.

use crate::error::SyncError;
use serde::{Deserialize, Serialize};

/// Default heart rate at or above which an alert fires (bpm)
pub const DEFAULT_ALERT_THRESHOLD_BPM: f64 = 195.0;

/// Default trailing window for daily averages (days)
pub const DEFAULT_HISTORY_WINDOW_DAYS: u32 = 7;

/// Longest trailing window accepted for daily averages (days)
pub const MAX_HISTORY_WINDOW_DAYS: u32 = 36_600;

/// Default capacity of the pre-activation and link-down buffers
pub const DEFAULT_PENDING_MESSAGE_LIMIT: usize = 64;

/// Default number of recent message ids remembered for de-duplication
pub const DEFAULT_DEDUP_WINDOW: usize = 32;

/// Day offsets must stay strictly within one day of UTC
pub const MAX_DAY_OFFSET_MINUTES: i32 = 24 * 60;

/// How alerts are surfaced while heart rate stays above the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMode {
    /// One alert per excursion above the threshold
    RisingEdge,
    /// One alert per qualifying sample
    EverySample,
}

/// Configuration shared by both endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub alert_threshold_bpm: f64,
    pub alert_mode: AlertMode,
    pub history_window_days: u32,
    pub pending_message_limit: usize,
    pub dedup_window: usize,
    /// Fixed UTC offset used to decide calendar days
    pub day_offset_minutes: i32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            alert_threshold_bpm: DEFAULT_ALERT_THRESHOLD_BPM,
            alert_mode: AlertMode::RisingEdge,
            history_window_days: DEFAULT_HISTORY_WINDOW_DAYS,
            pending_message_limit: DEFAULT_PENDING_MESSAGE_LIMIT,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            day_offset_minutes: 0,
        }
    }
}

impl SyncConfig {
    /// Check that every value is usable
    pub fn validate(&self) -> Result<(), SyncError> {
        if !self.alert_threshold_bpm.is_finite() || self.alert_threshold_bpm <= 0.0 {
            return Err(SyncError::ConfigError(format!(
                "alert_threshold_bpm must be a positive number, got {}",
                self.alert_threshold_bpm
            )));
        }
        if self.history_window_days == 0 || self.history_window_days > MAX_HISTORY_WINDOW_DAYS {
            return Err(SyncError::ConfigError(format!(
                "history_window_days must be between 1 and {}, got {}",
                MAX_HISTORY_WINDOW_DAYS, self.history_window_days
            )));
        }
        if self.pending_message_limit == 0 {
            return Err(SyncError::ConfigError(
                "pending_message_limit must be at least 1".to_string(),
            ));
        }
        if self.dedup_window == 0 {
            return Err(SyncError::ConfigError(
                "dedup_window must be at least 1".to_string(),
            ));
        }
        if self.day_offset_minutes.abs() >= MAX_DAY_OFFSET_MINUTES {
            return Err(SyncError::ConfigError(format!(
                "day_offset_minutes out of range: {}",
                self.day_offset_minutes
            )));
        }
        Ok(())
    }

    /// Load and validate configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        let config: SyncConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }
}
