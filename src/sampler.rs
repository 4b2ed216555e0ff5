//! Heart-rate sample acquisition
//!
//! A `HeartRateSampler` pushes samples from an external source at the source's
//! own cadence. Only the most recent sample is guaranteed to be delivered;
//! consumers must tolerate gaps.

use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::error::SyncError;
use crate::types::Sample;

/// Callback receiving samples. May be invoked from any thread.
pub type SampleSink = Arc<dyn Fn(Sample) + Send + Sync>;

/// Live subscription to a heart-rate feed
pub trait HeartRateSampler: Send {
    /// Start delivering samples to `sink`. Returns a subscription id.
    ///
    /// Errors here mean a recording session cannot be constructed.
    fn subscribe(&mut self, sink: SampleSink) -> Result<Uuid, SyncError>;

    /// Stop delivering samples
    fn unsubscribe(&mut self);
}

#[derive(Default)]
struct ManualState {
    sink: Option<(Uuid, SampleSink)>,
    refuse_reason: Option<String>,
    subscribes: usize,
    unsubscribes: usize,
}

/// Sampler driven by the host: the host calls `feed` for every reading.
///
/// Clones share the same subscription, so one clone can be handed to a
/// workout session while another stays with the code producing readings.
#[derive(Clone, Default)]
pub struct ManualSampler {
    state: Arc<Mutex<ManualState>>,
}

impl ManualSampler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver a reading. Returns false when nobody is subscribed.
    pub fn feed(&self, sample: Sample) -> bool {
        let sink = self.lock().sink.as_ref().map(|(_, sink)| Arc::clone(sink));
        match sink {
            Some(sink) => {
                sink(sample);
                true
            }
            None => false,
        }
    }

    /// Make subsequent subscriptions fail, e.g. when the source is not authorized
    pub fn refuse_subscriptions(&self, reason: impl Into<String>) {
        self.lock().refuse_reason = Some(reason.into());
    }

    pub fn accept_subscriptions(&self) {
        self.lock().refuse_reason = None;
    }

    pub fn is_subscribed(&self) -> bool {
        self.lock().sink.is_some()
    }

    /// Number of successful subscriptions so far
    pub fn subscribe_count(&self) -> usize {
        self.lock().subscribes
    }

    /// Number of unsubscriptions that ended an active subscription
    pub fn unsubscribe_count(&self) -> usize {
        self.lock().unsubscribes
    }
}

impl HeartRateSampler for ManualSampler {
    fn subscribe(&mut self, sink: SampleSink) -> Result<Uuid, SyncError> {
        let mut state = self.lock();
        if let Some(reason) = &state.refuse_reason {
            return Err(SyncError::SessionInitError(reason.clone()));
        }
        let id = Uuid::new_v4();
        state.sink = Some((id, sink));
        state.subscribes += 1;
        Ok(id)
    }

    fn unsubscribe(&mut self) {
        let mut state = self.lock();
        if state.sink.take().is_some() {
            state.unsubscribes += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_feed_reaches_subscriber() {
        let feeder = ManualSampler::new();
        let mut sampler = feeder.clone();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);

        assert!(!feeder.feed(Sample::now(80.0)));

        sampler
            .subscribe(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert!(feeder.feed(Sample::now(80.0)));
        assert!(feeder.feed(Sample::now(82.0)));

        sampler.unsubscribe();
        assert!(!feeder.feed(Sample::now(84.0)));

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(feeder.subscribe_count(), 1);
        assert_eq!(feeder.unsubscribe_count(), 1);
    }

    #[test]
    fn test_refused_subscription() {
        let mut sampler = ManualSampler::new();
        sampler.refuse_subscriptions("heart rate not authorized");
        let result = sampler.subscribe(Arc::new(|_| {}));
        assert!(matches!(result, Err(SyncError::SessionInitError(_))));
        assert!(!sampler.is_subscribed());
    }
}
