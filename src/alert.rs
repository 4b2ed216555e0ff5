//! High heart-rate alerting
//!
//! `AlertPolicy` is the pure threshold rule. `ExcursionTracker` decides which
//! of the policy's decisions are surfaced to the user.

use crate::config::AlertMode;
use crate::types::{AlertDecision, Sample};

/// Threshold rule mapping a sample to an alert decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertPolicy {
    threshold_bpm: f64,
}

impl AlertPolicy {
    pub fn new(threshold_bpm: f64) -> Self {
        Self { threshold_bpm }
    }

    pub fn threshold_bpm(&self) -> f64 {
        self.threshold_bpm
    }

    /// `HighHeartRate` iff `bpm >= threshold`
    pub fn evaluate(&self, sample: &Sample) -> AlertDecision {
        if sample.bpm >= self.threshold_bpm {
            AlertDecision::HighHeartRate
        } else {
            AlertDecision::None
        }
    }
}

/// Tracks excursions above the threshold
#[derive(Debug, Clone)]
pub struct ExcursionTracker {
    mode: AlertMode,
    in_excursion: bool,
}

impl ExcursionTracker {
    pub fn new(mode: AlertMode) -> Self {
        Self {
            mode,
            in_excursion: false,
        }
    }

    /// Feed one decision; returns true when it should be surfaced
    pub fn observe(&mut self, decision: AlertDecision) -> bool {
        match decision {
            AlertDecision::None => {
                self.in_excursion = false;
                false
            }
            AlertDecision::HighHeartRate => {
                let rising = !self.in_excursion;
                self.in_excursion = true;
                match self.mode {
                    AlertMode::RisingEdge => rising,
                    AlertMode::EverySample => true,
                }
            }
        }
    }

    /// End any excursion in progress (workout stopped)
    pub fn reset(&mut self) {
        self.in_excursion = false;
    }

    pub fn in_excursion(&self) -> bool {
        self.in_excursion
    }
}
