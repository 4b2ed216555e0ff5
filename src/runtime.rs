//! Endpoint runtime
//!
//! `spawn_endpoint` moves a `SyncCoordinator` into a tokio task and makes it
//! the only place endpoint state is mutated. Link callbacks and sampler
//! callbacks run on arbitrary threads; they only push `EndpointEvent`s onto an
//! unbounded queue. Display state is published on a `watch` channel and
//! alerts on a `broadcast` channel.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::coordinator::SyncCoordinator;
use crate::error::SyncError;
use crate::link::Payload;
use crate::types::{AlertEvent, DailyAverage, DisplayState, Sample, UiIntent};

/// Capacity of the alert broadcast; slow subscribers miss the oldest alerts
const ALERT_CHANNEL_CAPACITY: usize = 16;

/// Input to an endpoint task
#[derive(Debug)]
pub enum EndpointEvent {
    /// Button tap, with an optional reply for the caller
    Intent(UiIntent, Option<oneshot::Sender<Result<(), SyncError>>>),
    /// Payload delivered by the link
    Inbound(Payload),
    /// Reading from the sampler
    Sample(Sample),
    LinkActivated,
    /// Freshly computed history for the display
    History(Vec<DailyAverage>),
    /// Answered once every earlier event has been handled
    Barrier(oneshot::Sender<()>),
    Shutdown,
}

/// Handle to a running endpoint
pub struct EndpointHandle {
    events: mpsc::UnboundedSender<EndpointEvent>,
    display: watch::Receiver<DisplayState>,
    alerts: broadcast::Sender<AlertEvent>,
    task: JoinHandle<SyncCoordinator>,
}

/// Start the endpoint task. Must be called within a tokio runtime.
pub fn spawn_endpoint(mut coordinator: SyncCoordinator) -> EndpointHandle {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (display_tx, display_rx) = watch::channel(coordinator.display().clone());
    let (alerts_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);

    let samples = events_tx.clone();
    coordinator.route_samples_to(Arc::new(move |sample| {
        let _ = samples.send(EndpointEvent::Sample(sample));
    }));

    let link = coordinator.link();
    let inbound = events_tx.clone();
    link.on_receive(Arc::new(move |payload| {
        let _ = inbound.send(EndpointEvent::Inbound(payload));
    }));
    let activated = events_tx.clone();
    link.on_activated(Arc::new(move || {
        let _ = activated.send(EndpointEvent::LinkActivated);
    }));

    log::debug!("Spawning {} endpoint", coordinator.role().as_str());
    let task = tokio::spawn(run(coordinator, events_rx, display_tx, alerts_tx.clone()));

    EndpointHandle {
        events: events_tx,
        display: display_rx,
        alerts: alerts_tx,
        task,
    }
}

async fn run(
    mut coordinator: SyncCoordinator,
    mut events: mpsc::UnboundedReceiver<EndpointEvent>,
    display: watch::Sender<DisplayState>,
    alerts: broadcast::Sender<AlertEvent>,
) -> SyncCoordinator {
    while let Some(event) = events.recv().await {
        match event {
            EndpointEvent::Intent(intent, reply) => {
                let result = coordinator.handle_intent(intent);
                if let Err(e) = &result {
                    log::warn!("{:?} failed: {}", intent, e);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            EndpointEvent::Inbound(payload) => coordinator.handle_inbound(payload),
            EndpointEvent::Sample(sample) => coordinator.handle_sample(sample),
            EndpointEvent::LinkActivated => coordinator.handle_link_activated(),
            EndpointEvent::History(averages) => coordinator.set_daily_averages(averages),
            EndpointEvent::Barrier(reply) => {
                let _ = reply.send(());
            }
            EndpointEvent::Shutdown => break,
        }

        for alert in coordinator.take_alerts() {
            // No subscribers is fine
            let _ = alerts.send(alert);
        }
        display.send_if_modified(|shown| {
            if shown == coordinator.display() {
                return false;
            }
            *shown = coordinator.display().clone();
            true
        });
    }

    log::debug!("{} endpoint stopped", coordinator.role().as_str());
    coordinator
}

impl EndpointHandle {
    fn post(&self, event: EndpointEvent) -> Result<(), SyncError> {
        self.events.send(event).map_err(|_| SyncError::EndpointClosed)
    }

    /// Submit a button tap and wait until it has been applied
    pub async fn intent(&self, intent: UiIntent) -> Result<(), SyncError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(EndpointEvent::Intent(intent, Some(reply_tx)))?;
        reply_rx.await.map_err(|_| SyncError::EndpointClosed)?
    }

    /// Replace the history shown on the display
    pub fn refresh_history(&self, averages: Vec<DailyAverage>) -> Result<(), SyncError> {
        self.post(EndpointEvent::History(averages))
    }

    /// Wait until every event queued so far has been handled and published
    pub async fn barrier(&self) -> Result<(), SyncError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(EndpointEvent::Barrier(reply_tx))?;
        reply_rx.await.map_err(|_| SyncError::EndpointClosed)
    }

    /// Raw event sender, for hosts that feed events themselves
    pub fn sender(&self) -> mpsc::UnboundedSender<EndpointEvent> {
        self.events.clone()
    }

    /// Current display state and change notifications
    pub fn display(&self) -> watch::Receiver<DisplayState> {
        self.display.clone()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AlertEvent> {
        self.alerts.subscribe()
    }

    /// Wait until the display satisfies `predicate`
    pub async fn wait_for_display<F>(&self, predicate: F) -> Result<DisplayState, SyncError>
    where
        F: Fn(&DisplayState) -> bool,
    {
        let mut display = self.display.clone();
        loop {
            {
                let shown = display.borrow_and_update();
                if predicate(&shown) {
                    return Ok(shown.clone());
                }
            }
            display
                .changed()
                .await
                .map_err(|_| SyncError::EndpointClosed)?;
        }
    }

    /// Stop the task and hand back the coordinator
    pub async fn shutdown(self) -> Result<SyncCoordinator, SyncError> {
        self.post(EndpointEvent::Shutdown)?;
        self.task.await.map_err(|e| {
            log::warn!("Endpoint task failed: {}", e);
            SyncError::EndpointClosed
        })
    }
}
