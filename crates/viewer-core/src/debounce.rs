//! Debouncing of viewport changes
//!
//! [`Debouncer`] is the clock-driven state machine; [`DebounceGate`] runs one
//! on a background thread and calls back with each settled value.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Keeps the latest value until it has been quiet for `delay`
///
/// Every [`notify`](Self::notify) replaces the pending value and restarts
/// the timer, so a burst yields only its last value.
#[derive(Debug, Clone)]
pub struct Debouncer<T> {
    delay: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Record a new value, restarting the settle timer from `now`
    pub fn notify(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now + self.delay));
    }

    /// Take the pending value if its timer has expired at `now`
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        let due = self
            .pending
            .as_ref()
            .is_some_and(|(_, deadline)| now >= *deadline);
        if due {
            self.pending.take().map(|(value, _)| value)
        } else {
            None
        }
    }

    /// When the pending value will settle
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, deadline)| *deadline)
    }

    /// Drop the pending value without settling it
    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|(value, _)| value)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

struct GateState<T> {
    debouncer: Debouncer<T>,
    in_callback: bool,
    settled: u64,
    shutdown: bool,
}

struct GateShared<T> {
    state: Mutex<GateState<T>>,
    wake: Condvar,
}

impl<T> GateShared<T> {
    fn lock(&self) -> MutexGuard<'_, GateState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background debounce timer
///
/// `on_settled` runs on the gate's own thread, once per quiet period, with
/// the last value notified before the period began.
pub struct DebounceGate<T: Send + 'static> {
    shared: Arc<GateShared<T>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> DebounceGate<T> {
    /// Start the gate's timer thread
    pub fn spawn<F>(delay: Duration, on_settled: F) -> io::Result<Self>
    where
        F: Fn(T) + Send + 'static,
    {
        let shared = Arc::new(GateShared {
            state: Mutex::new(GateState {
                debouncer: Debouncer::new(delay),
                in_callback: false,
                settled: 0,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let thread_handle = thread::Builder::new()
            .name("pageport-debounce".to_string())
            .spawn(move || run_gate(thread_shared, on_settled))?;

        Ok(Self {
            shared,
            thread_handle: Some(thread_handle),
        })
    }

    /// Record the latest value and restart the settle timer
    ///
    /// Never blocks on the settle callback.
    pub fn notify(&self, value: T) {
        self.shared.lock().debouncer.notify(value, Instant::now());
        self.shared.wake.notify_one();
    }

    /// Drop any pending value without settling it
    pub fn cancel(&self) -> bool {
        let cancelled = self.shared.lock().debouncer.cancel().is_some();
        self.shared.wake.notify_one();
        cancelled
    }

    /// Whether a value is waiting to settle or its callback is running
    pub fn is_pending(&self) -> bool {
        let state = self.shared.lock();
        state.in_callback || state.debouncer.is_pending()
    }

    /// Number of settled events emitted so far
    pub fn settled_count(&self) -> u64 {
        self.shared.lock().settled
    }

    pub fn delay(&self) -> Duration {
        self.shared.lock().debouncer.delay()
    }

    /// Stop the timer thread, discarding any pending value
    pub fn stop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            state.debouncer.cancel();
        }
        self.shared.wake.notify_all();

        if let Some(handle) = self.thread_handle.take() {
            // The callback may be what dropped us
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::warn!("debounce thread exited with a panic");
            }
        }
    }
}

impl<T: Send + 'static> Drop for DebounceGate<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_gate<T, F>(shared: Arc<GateShared<T>>, on_settled: F)
where
    F: Fn(T),
{
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            return;
        }

        let now = Instant::now();
        if let Some(value) = state.debouncer.poll(now) {
            state.settled += 1;
            state.in_callback = true;
            drop(state);

            tracing::trace!("viewport settled");
            if panic::catch_unwind(AssertUnwindSafe(|| on_settled(value))).is_err() {
                tracing::warn!("settle callback panicked");
            }

            state = shared.lock();
            state.in_callback = false;
            continue;
        }

        state = match state.debouncer.deadline() {
            Some(deadline) => {
                shared
                    .wake
                    .wait_timeout(state, deadline.saturating_duration_since(now))
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => shared
                .wake
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_no_trigger_before_delay() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(50));

        debouncer.notify(1, start);
        assert!(debouncer.is_pending());
        assert_eq!(debouncer.poll(start + Duration::from_millis(49)), None);
        assert_eq!(debouncer.poll(start + Duration::from_millis(50)), Some(1));
        assert!(!debouncer.is_pending());
        assert_eq!(debouncer.poll(start + Duration::from_millis(100)), None);
    }

    #[test]
    fn test_burst_keeps_last_value() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(50));

        for step in 0..10u64 {
            let now = start + Duration::from_millis(step * 10);
            debouncer.notify(step, now);
            assert_eq!(debouncer.poll(now), None);
        }

        // Timer restarted by the last notify at 90ms
        assert_eq!(debouncer.poll(start + Duration::from_millis(130)), None);
        assert_eq!(debouncer.deadline(), Some(start + Duration::from_millis(140)));
        assert_eq!(debouncer.poll(start + Duration::from_millis(140)), Some(9));
    }

    #[test]
    fn test_cancel() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(10));

        debouncer.notify("a", start);
        assert_eq!(debouncer.cancel(), Some("a"));
        assert_eq!(debouncer.poll(start + Duration::from_secs(1)), None);
    }

    #[test]
    fn test_gate_emits_once_per_burst() {
        let (tx, rx) = mpsc::channel();
        let gate = DebounceGate::spawn(Duration::from_millis(200), move |value: u32| {
            let _ = tx.send(value);
        })
        .unwrap();

        for value in 0..10 {
            gate.notify(value);
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(9));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(gate.settled_count(), 1);
    }

    #[test]
    fn test_gate_separate_bursts() {
        let (tx, rx) = mpsc::channel();
        let gate = DebounceGate::spawn(Duration::from_millis(20), move |value: u32| {
            let _ = tx.send(value);
        })
        .unwrap();

        gate.notify(1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(1));

        gate.notify(2);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(2));
        assert_eq!(gate.settled_count(), 2);
    }

    #[test]
    fn test_gate_cancel_and_drop() {
        let (tx, rx) = mpsc::channel();
        let gate = DebounceGate::spawn(Duration::from_millis(100), move |value: u32| {
            let _ = tx.send(value);
        })
        .unwrap();

        gate.notify(7);
        assert!(gate.cancel());
        assert!(!gate.cancel());

        gate.notify(8);
        drop(gate);

        // Dropping discards the pending value and disconnects the sender
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)),
            Err(mpsc::RecvTimeoutError::Disconnected)
        );
    }
}
