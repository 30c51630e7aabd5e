use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::events::Events;

/// Lifecycle of a serial line or TCP client endpoint.
///
/// ```text
/// Idle -> Connecting -> Connected -> (Disconnected <-> Connecting) -> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Closed,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Disconnected,
            _ => Self::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Disconnected => 3,
            Self::Closed => 4,
        }
    }
}

/// Connection state shared by an endpoint and its background loops.
///
/// Reads are lock-free. Every write goes through [`LinkState::transition`],
/// which commits the new state and delivers the state-changed notification
/// inside one critical section, so no observer sees a notification that the
/// fields do not yet reflect.
pub(crate) struct LinkState {
    connected: AtomicBool,
    phase: AtomicU8,
    transition: Mutex<()>,
}

/// An open transition; state changes and notifications happen through it.
pub(crate) struct Transition<'a> {
    state: &'a LinkState,
    _guard: MutexGuard<'a, ()>,
}

impl LinkState {
    pub(crate) fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            phase: AtomicU8::new(ConnectionState::Idle.as_u8()),
            transition: Mutex::new(()),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn phase(&self) -> ConnectionState {
        ConnectionState::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub(crate) fn transition(&self) -> Transition<'_> {
        Transition {
            state: self,
            _guard: self
                .transition
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        }
    }
}

impl Transition<'_> {
    pub(crate) fn phase(&self) -> ConnectionState {
        self.state.phase()
    }

    pub(crate) fn set_phase(&self, phase: ConnectionState) {
        self.state.phase.store(phase.as_u8(), Ordering::SeqCst);
    }

    /// Commit the connected flag; notifies handlers if it changed.
    pub(crate) fn set_connected(&self, connected: bool, events: &Events) {
        let previous = self.state.connected.swap(connected, Ordering::SeqCst);
        if previous != connected {
            events.dispatch_state(connected);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn notifies_only_on_change_and_sees_committed_state() {
        let state = Arc::new(LinkState::new());
        let events = Events::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            let state = Arc::clone(&state);
            events.on_state_changed(move |connected| {
                seen.lock().unwrap().push((connected, state.is_connected()));
            });
        }

        {
            let tx = state.transition();
            tx.set_phase(ConnectionState::Connected);
            tx.set_connected(true, &events);
            tx.set_connected(true, &events);
        }
        state.transition().set_connected(false, &events);

        assert_eq!(*seen.lock().unwrap(), vec![(true, true), (false, false)]);
        assert_eq!(state.phase(), ConnectionState::Connected);
    }

    #[test]
    fn phase_roundtrips_through_u8() {
        for phase in [
            ConnectionState::Idle,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Closed,
        ] {
            assert_eq!(ConnectionState::from_u8(phase.as_u8()), phase);
        }
    }
}
