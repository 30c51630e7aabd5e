use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Single-slot blocking signal that turns an asynchronous reply into a
/// synchronous wait.
///
/// `signal` releases one waiter, or is remembered for the next `wait` if
/// nobody is waiting. Signals do not stack: two signals before a wait still
/// release only one wait.
#[derive(Debug, Default)]
pub struct SyncGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct GateState {
    signaled: bool,
    closed: bool,
    /// Bumped by every close, so a waiter still notices a close that was
    /// reset again before it woke up.
    closes: u64,
}

/// How a [`SyncGate::wait_for`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Signaled,
    TimedOut,
    Closed,
}

impl SyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until signaled or until `timeout` elapses.
    ///
    /// `Duration::ZERO` waits indefinitely. Returns true if a signal was
    /// consumed, false on timeout or when the gate was closed.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.wait_for(timeout) == GateOutcome::Signaled
    }

    /// Like [`wait`](Self::wait), telling a timeout apart from a close.
    pub fn wait_for(&self, timeout: Duration) -> GateOutcome {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        let mut state = self.lock();
        let closes = state.closes;

        loop {
            if state.closed || state.closes != closes {
                return GateOutcome::Closed;
            }
            if state.signaled {
                state.signaled = false;
                return GateOutcome::Signaled;
            }

            state = match deadline {
                None => self
                    .cond
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return GateOutcome::TimedOut;
                    }
                    self.cond
                        .wait_timeout(state, remaining)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0)
                }
            };
        }
    }

    /// Release one waiter, or arm the slot for the next wait.
    pub fn signal(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.signaled = true;
        self.cond.notify_one();
    }

    /// Wake every waiter with a negative outcome and refuse further waits
    /// until [`reset`](Self::reset).
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.closes = state.closes.wrapping_add(1);
        state.signaled = false;
        self.cond.notify_all();
    }

    /// Re-arm a closed gate with an empty slot.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.closed = false;
        state.signaled = false;
    }

    /// True after [`close`](Self::close) until the next reset.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn indefinite_wait_returns_after_signal() {
        let gate = Arc::new(SyncGate::new());
        let signaler = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                gate.signal();
            })
        };

        let start = Instant::now();
        assert!(gate.wait(Duration::ZERO));
        assert!(start.elapsed() >= Duration::from_millis(40));
        signaler.join().unwrap();
    }

    #[test]
    fn timed_wait_without_signal_times_out() {
        let gate = SyncGate::new();
        let start = Instant::now();

        assert!(!gate.wait(Duration::from_millis(100)));

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(150), "elapsed {elapsed:?}");
    }

    #[test]
    fn signal_before_wait_is_remembered() {
        let gate = SyncGate::new();
        gate.signal();
        assert!(gate.wait(Duration::from_millis(10)));
    }

    #[test]
    fn signals_do_not_accumulate() {
        let gate = SyncGate::new();
        gate.signal();
        gate.signal();

        assert!(gate.wait(Duration::from_millis(10)));
        assert!(!gate.wait(Duration::from_millis(10)));
    }

    #[test]
    fn close_wakes_waiters_with_failure() {
        let gate = Arc::new(SyncGate::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let gate = Arc::clone(&gate);
                thread::spawn(move || gate.wait(Duration::ZERO))
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        gate.close();

        for waiter in waiters {
            assert!(!waiter.join().unwrap());
        }
        assert!(gate.is_closed());
    }

    #[test]
    fn reset_reopens_closed_gate() {
        let gate = SyncGate::new();
        gate.close();
        gate.signal();
        assert!(!gate.wait(Duration::from_millis(10)));

        gate.reset();
        gate.signal();
        assert!(gate.wait(Duration::from_millis(10)));
    }

    #[test]
    fn close_then_reset_still_releases_waiter() {
        let gate = Arc::new(SyncGate::new());
        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.wait_for(Duration::ZERO))
        };

        thread::sleep(Duration::from_millis(50));
        gate.close();
        gate.reset();

        assert_eq!(waiter.join().unwrap(), GateOutcome::Closed);
        assert!(!gate.is_closed());
    }

    #[test]
    fn wait_for_distinguishes_timeout_from_close() {
        let gate = SyncGate::new();
        assert_eq!(gate.wait_for(Duration::from_millis(10)), GateOutcome::TimedOut);
        gate.signal();
        assert_eq!(gate.wait_for(Duration::from_millis(10)), GateOutcome::Signaled);
        gate.close();
        assert_eq!(gate.wait_for(Duration::from_millis(10)), GateOutcome::Closed);
    }

    #[test]
    fn concurrent_signal_and_wait_pairs() {
        let gate = Arc::new(SyncGate::new());
        let signaler = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                for _ in 0..100 {
                    while gate.lock().signaled {
                        thread::yield_now();
                    }
                    gate.signal();
                }
            })
        };

        for _ in 0..100 {
            assert!(gate.wait(Duration::from_secs(5)));
        }
        signaler.join().unwrap();
    }
}
