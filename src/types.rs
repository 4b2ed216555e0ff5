//! Core types shared by both endpoints
//!
//! This module defines the values that flow between the sampler, the workout
//! session, the coordinators and the display surface.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder shown when no heart rate is available
pub const NO_READING: &str = "---";

/// Endpoint role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Wrist device that owns the workout session
    Recorder,
    /// Handheld device that displays relayed state
    Monitor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Recorder => "recorder",
            Role::Monitor => "monitor",
        }
    }
}

/// A single timestamped heart-rate reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// When the reading was taken (UTC)
    pub timestamp: DateTime<Utc>,
    /// Beats per minute
    pub bpm: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, bpm: f64) -> Self {
        Self { timestamp, bpm }
    }

    /// Reading taken now
    pub fn now(bpm: f64) -> Self {
        Self::new(Utc::now(), bpm)
    }

    /// Readings must be finite and non-negative
    pub fn is_valid(&self) -> bool {
        self.bpm.is_finite() && self.bpm >= 0.0
    }

    /// Rounded integer bpm as relayed to the other endpoint
    pub fn rounded_bpm(&self) -> i64 {
        self.bpm.round() as i64
    }
}

/// Average heart rate for one calendar day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyAverage {
    pub day: NaiveDate,
    pub bpm: f64,
}

/// Outcome of evaluating a sample against the alert threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertDecision {
    None,
    HighHeartRate,
}

/// Alert surfaced to the user
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub decision: AlertDecision,
    /// Sample that triggered the alert
    pub sample: Sample,
    /// Threshold in force when the alert fired
    pub threshold_bpm: f64,
}

/// Label of the start/stop affordance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonLabel {
    Start,
    Stop,
}

impl ButtonLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ButtonLabel::Start => "Start",
            ButtonLabel::Stop => "Stop",
        }
    }
}

/// Everything an endpoint exposes to its display surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayState {
    /// Latest bpm as text, or `---`
    pub current_bpm: String,
    pub button_label: ButtonLabel,
    /// Daily averages in canonical (ascending) order
    pub daily_averages: Vec<DailyAverage>,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            current_bpm: NO_READING.to_string(),
            button_label: ButtonLabel::Start,
            daily_averages: Vec::new(),
        }
    }
}

impl DisplayState {
    /// Back to the idle presentation, keeping history
    pub fn reset(&mut self) {
        self.current_bpm = NO_READING.to_string();
        self.button_label = ButtonLabel::Start;
    }
}

/// Local UI intent (button tap)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiIntent {
    Start,
    Stop,
    /// Resolve to start or stop from the endpoint's own state
    Toggle,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sample_rounding() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        assert_eq!(Sample::new(ts, 109.6).rounded_bpm(), 110);
        assert_eq!(Sample::new(ts, 80.4).rounded_bpm(), 80);
    }

    #[test]
    fn test_sample_validity() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        assert!(Sample::new(ts, 0.0).is_valid());
        assert!(!Sample::new(ts, -1.0).is_valid());
        assert!(!Sample::new(ts, f64::NAN).is_valid());
    }

    #[test]
    fn test_display_reset_keeps_history() {
        let mut display = DisplayState {
            current_bpm: "120".to_string(),
            button_label: ButtonLabel::Stop,
            daily_averages: vec![DailyAverage {
                day: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                bpm: 72.0,
            }],
        };
        display.reset();
        assert_eq!(display.current_bpm, NO_READING);
        assert_eq!(display.button_label, ButtonLabel::Start);
        assert_eq!(display.daily_averages.len(), 1);
    }
}
