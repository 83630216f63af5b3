//! Connectivity manager: owns the connection state and the retry counters,
//! reacts to link events, and drives the network stack.
//!
//! Link events arrive over a channel and are handled on a dedicated thread, so
//! the binding to the real network stack can be a callback, a poller, or
//! anything else that can push into a [`LinkEventSink`].

use std::{
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{
    LinkStatus,
    state::{ConnectionState, ConnectivityEvent, LinkAction, LinkEvent, RetryPolicy, transition},
};
use crate::{restart::DeviceControl, tasks};

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Channel end the network stack pushes link events into.
pub type LinkEventSink = Sender<LinkEvent>;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network stack is not started")]
    NotStarted,
    #[error("network driver error: {0}")]
    Driver(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error("connectivity manager is already running")]
    AlreadyRunning,
    #[error("failed to start network stack")]
    Stack(#[from] NetworkError),
    #[error("failed to spawn link event thread")]
    Spawn(#[source] std::io::Error),
}

/// Network stack collaborator.
pub trait NetworkStack: Send + Sync {
    /// Bring the stack up and subscribe `events` to its link notifications.
    fn start(&self, events: LinkEventSink) -> Result<(), NetworkError>;

    /// Ask the stack to associate. Completion is reported through events.
    fn connect(&self) -> Result<(), NetworkError>;

    fn stop(&self) -> Result<(), NetworkError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Connected,
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ConnectivitySnapshot {
    pub state: ConnectionState,
    pub policy: RetryPolicy,
}

struct Inner {
    state: ConnectionState,
    policy: RetryPolicy,
}

pub struct ConnectivityManager {
    stack: Arc<dyn NetworkStack>,
    device: Arc<dyn DeviceControl>,
    inner: Mutex<Inner>,
    state_changed: Condvar,
    state_code: AtomicU8,
    running: AtomicBool,
    events_tx: Sender<LinkEvent>,
    events_rx: Receiver<LinkEvent>,
    event_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ConnectivityManager {
    pub fn new(
        stack: Arc<dyn NetworkStack>,
        device: Arc<dyn DeviceControl>,
        policy: RetryPolicy,
    ) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            stack,
            device,
            inner: Mutex::new(Inner {
                state: ConnectionState::Idle,
                policy,
            }),
            state_changed: Condvar::new(),
            state_code: AtomicU8::new(ConnectionState::Idle.as_u8()),
            running: AtomicBool::new(false),
            events_tx,
            events_rx,
            event_thread: Mutex::new(None),
        }
    }

    /// Start the network stack, subscribe to its events, and issue the
    /// initial connect request.
    pub fn start(self: &Arc<Self>) -> Result<(), ConnectivityError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ConnectivityError::AlreadyRunning);
        }

        let manager = Arc::clone(self);
        let handle = match tasks::spawn_task("connectivity-events", move || manager.event_loop()) {
            Ok(handle) => handle,
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(ConnectivityError::Spawn(err));
            }
        };
        *self
            .event_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        self.set_state(ConnectionState::Connecting);
        if let Err(err) = self.stack.start(self.events_tx.clone()) {
            self.shutdown_event_loop();
            self.set_state(ConnectionState::Idle);
            return Err(err.into());
        }

        info!("Network stack started; connecting");
        if let Err(err) = self.stack.connect() {
            warn!("Initial connect request failed: {err}");
        }
        Ok(())
    }

    /// Stop the event thread, then the network stack. `start` may be called
    /// again.
    pub fn stop(&self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        // A restart in progress on the event thread must finish first.
        self.shutdown_event_loop();
        if let Err(err) = self.stack.stop() {
            warn!("Network stack stop failed: {err}");
        }
        self.set_state(ConnectionState::Idle);
        info!("Connectivity manager stopped");
    }

    /// Sender that injects link events as if the stack had produced them.
    pub fn sink(&self) -> LinkEventSink {
        self.events_tx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state_code.load(Ordering::SeqCst))
    }

    pub fn snapshot(&self) -> ConnectivitySnapshot {
        let inner = self.lock();
        ConnectivitySnapshot {
            state: inner.state,
            policy: inner.policy,
        }
    }

    /// Block the caller until the link is connected or `timeout` elapses.
    pub fn wait_until_connected(&self, timeout: Duration) -> WaitOutcome {
        let guard = self.lock();
        let (guard, _) = self
            .state_changed
            .wait_timeout_while(guard, timeout, |inner| {
                inner.state != ConnectionState::Connected
            })
            .unwrap_or_else(PoisonError::into_inner);
        if guard.state == ConnectionState::Connected {
            WaitOutcome::Connected
        } else {
            WaitOutcome::TimedOut
        }
    }

    /// Escalate a stalled association the same way exhausted retries do.
    pub fn report_stall(&self) {
        self.handle_event(ConnectivityEvent::StallTimeout);
    }

    /// Apply one event to the state machine and run the resulting side effect.
    pub fn handle_event(&self, event: ConnectivityEvent) {
        if !self.running.load(Ordering::SeqCst) {
            debug!(?event, "ignoring connectivity event while stopped");
            return;
        }

        let _span = tracing::info_span!("connectivity.event", event = ?event).entered();
        let (previous, step, policy) = {
            let mut inner = self.lock();
            let previous = inner.state;
            let step = transition(previous, &event, &mut inner.policy);
            inner.state = step.next;
            self.state_code.store(step.next.as_u8(), Ordering::SeqCst);
            (previous, step, inner.policy)
        };

        if previous != step.next {
            debug!("connectivity {previous} -> {}", step.next);
            metrics::gauge!("glasses_connectivity_state").set(step.next.as_u8() as f64);
            self.state_changed.notify_all();
        }
        if let ConnectivityEvent::Link(LinkEvent::AddressAcquired { address }) = &event {
            info!("Network associated, address {address}");
        }

        match step.action {
            LinkAction::None => {}
            LinkAction::Connect => {
                if step.next == ConnectionState::Retrying {
                    metrics::counter!("glasses_connectivity_retries_total").increment(1);
                    info!(
                        "Retrying connection (attempt {}/{})",
                        policy.attempt_count, policy.max_attempts_per_cycle
                    );
                }
                if let Err(err) = self.stack.connect() {
                    warn!("Connect request failed: {err}");
                }
            }
            LinkAction::RestartStack => {
                metrics::counter!("glasses_connectivity_stack_restarts_total").increment(1);
                warn!(
                    "Connection attempts exhausted; restarting network stack (cycle {}/{})",
                    policy.cycle_count, policy.max_cycles
                );
                self.restart_stack();
            }
            LinkAction::RestartDevice => {
                error!(
                    "Network stack restarted {} times without associating; restarting device",
                    policy.cycle_count
                );
                self.device.request_restart("connectivity retries exhausted");
            }
        }
    }

    fn restart_stack(&self) {
        if let Err(err) = self.stack.stop() {
            warn!("Network stack stop failed during restart: {err}");
        }
        if let Err(err) = self.stack.start(self.events_tx.clone()) {
            error!("Network stack failed to restart: {err}");
        }
    }

    fn event_loop(&self) {
        while self.running.load(Ordering::SeqCst) {
            match self.events_rx.recv_timeout(EVENT_POLL_INTERVAL) {
                Ok(event) => self.handle_event(event.into()),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn shutdown_event_loop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self
            .event_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        while self.events_rx.try_recv().is_ok() {}
    }

    fn set_state(&self, state: ConnectionState) {
        let mut inner = self.lock();
        inner.state = state;
        self.state_code.store(state.as_u8(), Ordering::SeqCst);
        drop(inner);
        self.state_changed.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LinkStatus for ConnectivityManager {
    fn state(&self) -> ConnectionState {
        ConnectivityManager::state(self)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, atomic::AtomicU32};

    use super::*;
    use crate::{connectivity::REASON_NO_AP_FOUND, restart::RestartLatch};

    /// Stack that records calls and never emits events on its own.
    #[derive(Default)]
    pub(crate) struct RecordingStack {
        pub(crate) starts: AtomicU32,
        pub(crate) connects: AtomicU32,
        pub(crate) stops: AtomicU32,
        pub(crate) fail_start: AtomicBool,
        pub(crate) calls: Mutex<Vec<&'static str>>,
    }

    impl RecordingStack {
        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl NetworkStack for RecordingStack {
        fn start(&self, _events: LinkEventSink) -> Result<(), NetworkError> {
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(NetworkError::Driver("radio unavailable".into()));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.record("start");
            Ok(())
        }

        fn connect(&self) -> Result<(), NetworkError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) -> Result<(), NetworkError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.record("stop");
            Ok(())
        }
    }

    fn manager(
        max_attempts: u32,
        max_cycles: u32,
    ) -> (Arc<ConnectivityManager>, Arc<RecordingStack>, Arc<RestartLatch>) {
        let stack = Arc::new(RecordingStack::default());
        let latch = Arc::new(RestartLatch::new());
        let manager = Arc::new(ConnectivityManager::new(
            stack.clone(),
            latch.clone(),
            RetryPolicy::new(max_attempts, max_cycles),
        ));
        (manager, stack, latch)
    }

    fn disconnect() -> ConnectivityEvent {
        LinkEvent::Disconnected {
            reason: REASON_NO_AP_FOUND,
        }
        .into()
    }

    #[test]
    fn start_connects_and_rejects_a_second_start() {
        let (manager, stack, _) = manager(3, 3);
        manager.start().unwrap();
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(stack.starts.load(Ordering::SeqCst), 1);
        assert_eq!(stack.connects.load(Ordering::SeqCst), 1);
        assert!(matches!(
            manager.start(),
            Err(ConnectivityError::AlreadyRunning)
        ));

        manager.stop();
        assert_eq!(manager.state(), ConnectionState::Idle);
        manager.start().unwrap();
        assert_eq!(stack.starts.load(Ordering::SeqCst), 2);
        manager.stop();
    }

    #[test]
    fn failed_stack_start_leaves_manager_stopped() {
        let (manager, stack, _) = manager(3, 3);
        stack.fail_start.store(true, Ordering::SeqCst);
        assert!(matches!(manager.start(), Err(ConnectivityError::Stack(_))));
        assert!(!manager.is_running());
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[test]
    fn exhausted_attempts_restart_the_stack_exactly_once() {
        let (manager, stack, latch) = manager(3, 5);
        manager.start().unwrap();
        for _ in 0..3 {
            manager.handle_event(disconnect());
        }
        assert_eq!(stack.stops.load(Ordering::SeqCst), 1);
        assert_eq!(stack.starts.load(Ordering::SeqCst), 2);
        // initial connect plus two retries
        assert_eq!(stack.connects.load(Ordering::SeqCst), 3);
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.policy.cycle_count, 1);
        assert_eq!(snapshot.policy.attempt_count, 0);
        assert!(!latch.is_triggered());
        manager.stop();
    }

    #[test]
    fn exhausted_cycles_request_one_device_restart() {
        let (manager, _stack, latch) = manager(2, 2);
        manager.start().unwrap();
        for _ in 0..12 {
            if manager.state() == ConnectionState::Idle {
                manager.handle_event(LinkEvent::Started.into());
            } else {
                manager.handle_event(disconnect());
            }
        }
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert_eq!(latch.request_count(), 1);
        assert_eq!(manager.snapshot().policy.cycle_count, 2);
        manager.stop();
    }

    #[test]
    fn address_marks_connected_and_resets_counters() {
        let (manager, _stack, _) = manager(4, 4);
        manager.start().unwrap();
        manager.handle_event(disconnect());
        assert_eq!(manager.snapshot().policy.attempt_count, 1);
        manager.handle_event(
            LinkEvent::AddressAcquired {
                address: "10.0.0.7".into(),
            }
            .into(),
        );
        assert!(manager.is_connected());
        assert_eq!(manager.snapshot().policy.attempt_count, 0);
        manager.stop();
    }

    #[test]
    fn wait_until_connected_wakes_on_address() {
        let (manager, _stack, _) = manager(3, 3);
        manager.start().unwrap();
        let sink = manager.sink();
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let _ = sink.send(LinkEvent::AddressAcquired {
                address: "10.0.0.9".into(),
            });
        });
        assert_eq!(
            manager.wait_until_connected(Duration::from_secs(5)),
            WaitOutcome::Connected
        );
        sender.join().unwrap();
        manager.stop();
    }

    #[test]
    fn wait_until_connected_times_out() {
        let (manager, _stack, _) = manager(3, 3);
        manager.start().unwrap();
        assert_eq!(
            manager.wait_until_connected(Duration::from_millis(30)),
            WaitOutcome::TimedOut
        );
        manager.stop();
    }

    #[test]
    fn stop_leaves_the_stack_stopped_even_mid_restart() {
        let (manager, stack, _) = manager(1, 1_000);
        manager.start().unwrap();
        let sink = manager.sink();
        for _ in 0..200 {
            let _ = sink.send(LinkEvent::Started);
            let _ = sink.send(LinkEvent::Disconnected {
                reason: REASON_NO_AP_FOUND,
            });
        }
        thread::sleep(Duration::from_millis(5));
        manager.stop();

        assert!(stack.stops.load(Ordering::SeqCst) >= 1);
        assert_eq!(stack.calls.lock().unwrap().last(), Some(&"stop"));
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[test]
    fn events_are_ignored_while_stopped() {
        let (manager, stack, _) = manager(1, 1);
        manager.handle_event(disconnect());
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(stack.stops.load(Ordering::SeqCst), 0);
    }
}
