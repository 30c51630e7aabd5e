//! Handler registration and dispatch for inbound frames and connection changes.
//!
//! Handlers are kept in registration order and all of them run for every
//! event. Dispatch works on a snapshot of the list, so a handler may register
//! further handlers without deadlocking.

use std::sync::{Arc, RwLock};

use bytes::Bytes;

/// A frame delivered to consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameEvent {
    /// Remote address the frame came from; `None` for serial lines.
    pub source: Option<String>,
    /// Local address of the connection it arrived on; `None` for serial lines.
    pub local: Option<String>,
    /// Frame bytes as produced by the framer.
    pub payload: Bytes,
}

/// Frame handler. Returning true reports that the frame completes a pending
/// synchronous exchange.
pub type FrameHandler = dyn Fn(&FrameEvent) -> bool + Send + Sync;

/// Connection state handler for serial lines and TCP clients.
pub type StateHandler = dyn Fn(bool) + Send + Sync;

/// Peer list handler for TCP servers. Receives every connected address.
pub type PeersHandler = dyn Fn(&[String]) + Send + Sync;

struct Subscribers<H: ?Sized> {
    handlers: RwLock<Vec<Arc<H>>>,
}

impl<H: ?Sized> Default for Subscribers<H> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }
}

impl<H: ?Sized> Subscribers<H> {
    fn push(&self, handler: Arc<H>) {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handler);
    }

    fn snapshot(&self) -> Vec<Arc<H>> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Event sink of one endpoint.
#[derive(Default)]
pub struct Events {
    frames: Subscribers<FrameHandler>,
    states: Subscribers<StateHandler>,
    peers: Subscribers<PeersHandler>,
}

impl Events {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a frame handler.
    pub fn on_frame<F>(&self, handler: F)
    where
        F: Fn(&FrameEvent) -> bool + Send + Sync + 'static,
    {
        self.frames.push(Arc::new(handler));
    }

    /// Register a connection state handler.
    pub fn on_state_changed<F>(&self, handler: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.states.push(Arc::new(handler));
    }

    /// Register a peer list handler.
    pub fn on_peers_changed<F>(&self, handler: F)
    where
        F: Fn(&[String]) + Send + Sync + 'static,
    {
        self.peers.push(Arc::new(handler));
    }

    /// Number of registered frame handlers.
    pub fn frame_handlers(&self) -> usize {
        self.frames.len()
    }

    /// Run every frame handler; true if any of them completed an exchange.
    pub(crate) fn dispatch_frame(&self, event: &FrameEvent) -> bool {
        let mut completed = false;
        for handler in self.frames.snapshot() {
            completed |= handler(event);
        }
        completed
    }

    pub(crate) fn dispatch_state(&self, connected: bool) {
        for handler in self.states.snapshot() {
            handler(connected);
        }
    }

    pub(crate) fn dispatch_peers(&self, addresses: &[String]) {
        for handler in self.peers.snapshot() {
            handler(addresses);
        }
    }
}

impl std::fmt::Debug for Events {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Events")
            .field("frames", &self.frames.len())
            .field("states", &self.states.len())
            .field("peers", &self.peers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn event(bytes: &'static [u8]) -> FrameEvent {
        FrameEvent {
            source: None,
            local: None,
            payload: Bytes::from_static(bytes),
        }
    }

    #[test]
    fn no_handlers_means_not_completed() {
        let events = Events::new();
        assert!(!events.dispatch_frame(&event(b"x")));
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let events = Events::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for id in 0..3 {
            let order = Arc::clone(&order);
            events.on_frame(move |_| {
                order.lock().unwrap().push(id);
                false
            });
        }

        events.dispatch_frame(&event(b"x"));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn any_completing_handler_completes_and_all_still_run() {
        let events = Events::new();
        let calls = Arc::new(Mutex::new(0));

        events.on_frame(|_| true);
        {
            let calls = Arc::clone(&calls);
            events.on_frame(move |_| {
                *calls.lock().unwrap() += 1;
                false
            });
        }

        assert!(events.dispatch_frame(&event(b"x")));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn handler_may_register_another_handler() {
        let events = Arc::new(Events::new());
        let inner = Arc::clone(&events);
        events.on_state_changed(move |_| inner.on_state_changed(|_| {}));

        events.dispatch_state(true);
        assert_eq!(events.states.len(), 2);
    }

    #[test]
    fn peers_handler_receives_addresses() {
        let events = Events::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            events.on_peers_changed(move |addrs| *seen.lock().unwrap() = addrs.to_vec());
        }

        events.dispatch_peers(&["127.0.0.1:5000".to_string()]);
        assert_eq!(*seen.lock().unwrap(), vec!["127.0.0.1:5000".to_string()]);
    }
}
