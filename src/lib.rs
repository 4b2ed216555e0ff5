//! Synheart Relay - Workout heart-rate sync between a wrist Recorder and a handheld Monitor
//!
//! The Recorder owns the workout session and the heart-rate sampler; the
//! Monitor mirrors its state and can start or stop the workout remotely.
//! Both endpoints exchange small key/value messages over an asynchronous,
//! at-least-once, unordered link: UI intent → coordinator → link → remote
//! coordinator → session transition or display update.
//!
//! ## Modules
//!
//! - **Live sync**: `session`, `alert`, `sampler`, `link`, `coordinator`, `runtime`
//! - **History**: `history` computes per-day heart-rate averages

pub mod alert;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod history;
pub mod link;
pub mod runtime;
pub mod sampler;
pub mod session;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use alert::{AlertPolicy, ExcursionTracker};
pub use config::{AlertMode, SyncConfig};
pub use coordinator::SyncCoordinator;
pub use error::SyncError;
pub use history::{most_recent_first, HistoryAggregator, InMemorySource, TimeSeriesSource};
pub use link::{Link, LinkMessage, MemoryLink, MessageKind, OutboxLink, Payload};
pub use runtime::{spawn_endpoint, EndpointEvent, EndpointHandle};
pub use sampler::{HeartRateSampler, ManualSampler, SampleSink};
pub use session::{StartOutcome, StopOutcome, WorkoutSession, WorkoutState};
pub use types::{
    AlertDecision, AlertEvent, ButtonLabel, DailyAverage, DisplayState, Role, Sample, UiIntent,
};

/// Relay version reported by the CLI and FFI
pub const RELAY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name stamped on CLI reports
pub const PRODUCER_NAME: &str = "synheart-relay";
