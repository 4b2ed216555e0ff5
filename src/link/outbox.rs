//! Host-driven link
//!
//! For hosts that own the real transport (a platform pairing/messaging API).
//! Outbound payloads are collected until the host drains them; inbound
//! payloads are pushed in by the host with `deliver`.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::SyncError;

use super::{ActivationHandler, Link, Payload, PayloadHandler};

#[derive(Default)]
struct OutboxState {
    activated: bool,
    outbox: Vec<Payload>,
    handlers: Vec<PayloadHandler>,
    activation_handlers: Vec<ActivationHandler>,
    backlog: Vec<Payload>,
}

/// Link whose transport lives in the host application
#[derive(Clone, Default)]
pub struct OutboxLink {
    state: Arc<Mutex<OutboxState>>,
}

impl OutboxLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, OutboxState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The host's transport finished activating
    pub fn activate(&self) {
        let handlers = {
            let mut state = self.lock();
            if state.activated {
                return;
            }
            state.activated = true;
            state.activation_handlers.clone()
        };
        for handler in handlers {
            handler();
        }
    }

    pub fn deactivate(&self) {
        self.lock().activated = false;
    }

    /// Take every payload queued for transmission
    pub fn drain_outbox(&self) -> Vec<Payload> {
        std::mem::take(&mut self.lock().outbox)
    }

    /// Hand a payload received by the host's transport to the registered handlers
    pub fn deliver(&self, payload: Payload) {
        let handlers = {
            let mut state = self.lock();
            if state.handlers.is_empty() {
                state.backlog.push(payload);
                return;
            }
            state.handlers.clone()
        };
        for handler in handlers {
            handler(payload.clone());
        }
    }
}

impl Link for OutboxLink {
    fn is_activated(&self) -> bool {
        self.lock().activated
    }

    fn transfer(&self, payload: Payload) -> Result<(), SyncError> {
        let mut state = self.lock();
        if !state.activated {
            return Err(SyncError::LinkUnavailable(
                "host transport is not active".to_string(),
            ));
        }
        state.outbox.push(payload);
        Ok(())
    }

    fn on_receive(&self, handler: PayloadHandler) {
        let backlog = {
            let mut state = self.lock();
            state.handlers.push(Arc::clone(&handler));
            std::mem::take(&mut state.backlog)
        };
        for payload in backlog {
            handler(payload);
        }
    }

    fn on_activated(&self, handler: ActivationHandler) {
        let already_active = {
            let mut state = self.lock();
            state.activation_handlers.push(Arc::clone(&handler));
            state.activated
        };
        if already_active {
            handler();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{LinkMessage, MessageKind};

    #[test]
    fn test_outbox_collects_sent_messages() {
        let link = OutboxLink::new();
        assert!(link.send(&LinkMessage::start_workout()).is_err());

        link.activate();
        link.send(&LinkMessage::start_workout()).unwrap();
        link.send(&LinkMessage::stop_workout()).unwrap();

        let drained = link.drain_outbox();
        assert_eq!(drained.len(), 2);
        assert!(drained[0].contains_key(MessageKind::StartWorkout.key()));
        assert!(link.drain_outbox().is_empty());
    }

    #[test]
    fn test_deliver_reaches_handler_after_backlog() {
        let link = OutboxLink::new();
        link.deliver(LinkMessage::heart_rate(70).to_payload());

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        link.on_receive(Arc::new(move |payload| {
            sink.lock().unwrap().push(payload);
        }));
        link.deliver(LinkMessage::heart_rate(72).to_payload());

        assert_eq!(received.lock().unwrap().len(), 2);
    }
}
