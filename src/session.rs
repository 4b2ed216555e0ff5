//! Workout session lifecycle
//!
//! The session is owned by the Recorder. It moves only Idle → Recording →
//! Idle through explicit `start`/`stop` calls; repeated calls are no-ops. The
//! sampler subscription lives inside the `Recording` variant so acquisition
//! can never run without a live handle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::alert::AlertPolicy;
use crate::error::SyncError;
use crate::link::LinkMessage;
use crate::sampler::{HeartRateSampler, SampleSink};
use crate::types::{AlertDecision, Sample};

/// Live recording state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingHandle {
    /// Sampler subscription feeding this recording
    pub subscription: Uuid,
    pub started_at: DateTime<Utc>,
    /// Samples accepted so far
    pub samples: u64,
}

/// Workout state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkoutState {
    Idle,
    Recording(RecordingHandle),
}

/// Result of `WorkoutSession::start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRecording,
}

/// Summary of a finished recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSummary {
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub samples: u64,
}

/// Result of `WorkoutSession::stop`
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Stopped(RecordingSummary),
    AlreadyIdle,
}

/// What a recorded sample produces
#[derive(Debug, Clone, PartialEq)]
pub struct SampleEffects {
    pub sample: Sample,
    pub decision: AlertDecision,
    /// Outbound update carrying the rounded bpm
    pub update: LinkMessage,
}

/// Recorder-side workout session
pub struct WorkoutSession {
    sampler: Box<dyn HeartRateSampler>,
    policy: AlertPolicy,
    state: WorkoutState,
}

impl WorkoutSession {
    pub fn new(sampler: Box<dyn HeartRateSampler>, policy: AlertPolicy) -> Self {
        Self {
            sampler,
            policy,
            state: WorkoutState::Idle,
        }
    }

    pub fn state(&self) -> &WorkoutState {
        &self.state
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, WorkoutState::Recording(_))
    }

    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    /// Begin acquisition. The state only changes once the sampler accepted
    /// the subscription.
    pub fn start(&mut self, sink: SampleSink) -> Result<StartOutcome, SyncError> {
        if self.is_recording() {
            return Ok(StartOutcome::AlreadyRecording);
        }

        let subscription = self.sampler.subscribe(sink)?;
        self.state = WorkoutState::Recording(RecordingHandle {
            subscription,
            started_at: Utc::now(),
            samples: 0,
        });
        Ok(StartOutcome::Started)
    }

    /// End acquisition
    pub fn stop(&mut self) -> StopOutcome {
        match std::mem::replace(&mut self.state, WorkoutState::Idle) {
            WorkoutState::Idle => StopOutcome::AlreadyIdle,
            WorkoutState::Recording(handle) => {
                self.sampler.unsubscribe();
                StopOutcome::Stopped(RecordingSummary {
                    started_at: handle.started_at,
                    stopped_at: Utc::now(),
                    samples: handle.samples,
                })
            }
        }
    }

    /// Process a sample; ignored unless recording
    pub fn on_sample(&mut self, sample: Sample) -> Option<SampleEffects> {
        let WorkoutState::Recording(handle) = &mut self.state else {
            log::debug!("Ignoring sample of {} bpm while idle", sample.bpm);
            return None;
        };

        if !sample.is_valid() {
            log::warn!("Ignoring invalid heart rate sample: {}", sample.bpm);
            return None;
        }

        handle.samples += 1;
        Some(SampleEffects {
            sample,
            decision: self.policy.evaluate(&sample),
            update: LinkMessage::heart_rate(sample.rounded_bpm()).with_sent_at(sample.timestamp),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::ManualSampler;
    use std::sync::Arc;

    fn session() -> (WorkoutSession, ManualSampler) {
        let sampler = ManualSampler::new();
        let session = WorkoutSession::new(Box::new(sampler.clone()), AlertPolicy::new(195.0));
        (session, sampler)
    }

    fn noop_sink() -> SampleSink {
        Arc::new(|_| {})
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let (mut session, sampler) = session();
        assert_eq!(session.state(), &WorkoutState::Idle);

        assert_eq!(session.start(noop_sink()).unwrap(), StartOutcome::Started);
        assert!(session.is_recording());
        assert!(sampler.is_subscribed());

        assert!(matches!(session.stop(), StopOutcome::Stopped(_)));
        assert_eq!(session.state(), &WorkoutState::Idle);
        assert!(!sampler.is_subscribed());
    }

    #[test]
    fn test_repeated_start_is_noop() {
        let (mut session, sampler) = session();
        session.start(noop_sink()).unwrap();
        assert_eq!(
            session.start(noop_sink()).unwrap(),
            StartOutcome::AlreadyRecording
        );
        assert_eq!(sampler.subscribe_count(), 1);
    }

    #[test]
    fn test_stop_while_idle_is_noop() {
        let (mut session, sampler) = session();
        assert_eq!(session.stop(), StopOutcome::AlreadyIdle);
        assert_eq!(sampler.unsubscribe_count(), 0);
    }

    #[test]
    fn test_no_consecutive_starts_for_any_sequence() {
        // Every start/stop sequence up to length 8: acquisition starts and
        // stops must strictly alternate.
        for bits in 0u32..(1 << 8) {
            for len in 1..=8 {
                let (mut session, sampler) = session();
                let mut expected_subscribes = 0;
                let mut recording = false;

                for i in 0..len {
                    if bits & (1 << i) != 0 {
                        session.start(noop_sink()).unwrap();
                        if !recording {
                            expected_subscribes += 1;
                            recording = true;
                        }
                    } else {
                        session.stop();
                        recording = false;
                    }

                    let starts = sampler.subscribe_count();
                    let stops = sampler.unsubscribe_count();
                    assert!(starts == stops || starts == stops + 1);
                }

                assert_eq!(sampler.subscribe_count(), expected_subscribes);
                assert_eq!(session.is_recording(), recording);
            }
        }
    }

    #[test]
    fn test_failed_start_stays_idle() {
        let (mut session, sampler) = session();
        sampler.refuse_subscriptions("workout session could not be created");

        let result = session.start(noop_sink());
        assert!(matches!(result, Err(SyncError::SessionInitError(_))));
        assert_eq!(session.state(), &WorkoutState::Idle);

        sampler.accept_subscriptions();
        assert_eq!(session.start(noop_sink()).unwrap(), StartOutcome::Started);
    }

    #[test]
    fn test_on_sample_only_while_recording() {
        let (mut session, _sampler) = session();
        assert!(session.on_sample(Sample::now(120.0)).is_none());

        session.start(noop_sink()).unwrap();
        let effects = session.on_sample(Sample::now(119.6)).unwrap();
        assert_eq!(effects.update.payload, "120");
        assert_eq!(effects.decision, AlertDecision::None);
        assert_eq!(effects.update.sent_at, Some(effects.sample.timestamp));

        let effects = session.on_sample(Sample::now(201.0)).unwrap();
        assert_eq!(effects.decision, AlertDecision::HighHeartRate);

        assert!(session.on_sample(Sample::now(-3.0)).is_none());

        match session.stop() {
            StopOutcome::Stopped(summary) => assert_eq!(summary.samples, 2),
            other => panic!("unexpected {:?}", other),
        }
        assert!(session.on_sample(Sample::now(90.0)).is_none());
    }
}
