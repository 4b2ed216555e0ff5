//! In-process link pair
//!
//! Both ends live in the same process. Payloads are delivered synchronously
//! on the sending thread; payloads sent before the peer registered a handler
//! wait in the peer's backlog. Redelivery can be turned on to exercise
//! at-least-once handling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::SyncError;

use super::{ActivationHandler, Link, Payload, PayloadHandler};

#[derive(Default)]
struct EndState {
    activated: bool,
    handlers: Vec<PayloadHandler>,
    activation_handlers: Vec<ActivationHandler>,
    backlog: Vec<Payload>,
}

#[derive(Default)]
struct Shared {
    ends: [Mutex<EndState>; 2],
    redeliveries: AtomicUsize,
}

/// One end of an in-process link
#[derive(Clone)]
pub struct MemoryLink {
    side: usize,
    shared: Arc<Shared>,
}

impl MemoryLink {
    /// Create two connected ends. Neither is activated yet.
    pub fn pair() -> (MemoryLink, MemoryLink) {
        let shared = Arc::new(Shared::default());
        (
            MemoryLink {
                side: 0,
                shared: Arc::clone(&shared),
            },
            MemoryLink { side: 1, shared },
        )
    }

    fn end(&self, side: usize) -> MutexGuard<'_, EndState> {
        self.shared.ends[side]
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn peer_side(&self) -> usize {
        1 - self.side
    }

    /// Finish activating this end and fire its activation handlers
    pub fn activate(&self) {
        let handlers = {
            let mut end = self.end(self.side);
            if end.activated {
                return;
            }
            end.activated = true;
            end.activation_handlers.clone()
        };
        for handler in handlers {
            handler();
        }
    }

    /// Take this end down; sends fail until it is activated again
    pub fn deactivate(&self) {
        self.end(self.side).activated = false;
    }

    /// Deliver every payload `1 + count` times
    pub fn set_redeliveries(&self, count: usize) {
        self.shared.redeliveries.store(count, Ordering::SeqCst);
    }

    /// Payloads waiting for a handler on this end
    pub fn backlog_len(&self) -> usize {
        self.end(self.side).backlog.len()
    }
}

impl Link for MemoryLink {
    fn is_activated(&self) -> bool {
        self.end(self.side).activated
    }

    fn transfer(&self, payload: Payload) -> Result<(), SyncError> {
        if !self.is_activated() {
            return Err(SyncError::LinkUnavailable(
                "memory link end is not active".to_string(),
            ));
        }

        let copies = 1 + self.shared.redeliveries.load(Ordering::SeqCst);
        let handlers = {
            let mut peer = self.end(self.peer_side());
            if peer.handlers.is_empty() {
                for _ in 0..copies {
                    peer.backlog.push(payload.clone());
                }
                return Ok(());
            }
            peer.handlers.clone()
        };

        for _ in 0..copies {
            for handler in &handlers {
                handler(payload.clone());
            }
        }
        Ok(())
    }

    fn on_receive(&self, handler: PayloadHandler) {
        let backlog = {
            let mut end = self.end(self.side);
            end.handlers.push(Arc::clone(&handler));
            std::mem::take(&mut end.backlog)
        };
        for payload in backlog {
            handler(payload);
        }
    }

    fn on_activated(&self, handler: ActivationHandler) {
        let already_active = {
            let mut end = self.end(self.side);
            end.activation_handlers.push(Arc::clone(&handler));
            end.activated
        };
        if already_active {
            handler();
        }
    }
}
