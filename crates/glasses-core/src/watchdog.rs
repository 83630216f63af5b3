use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use tracing::{error, info};

use crate::{
    connectivity::{ConnectivityManager, LinkStatus},
    tasks,
};

pub const WATCHDOG_TICK: Duration = Duration::from_millis(1_000);
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Process-wide "network failed" flag shown by the indicator.
#[derive(Debug, Default)]
pub struct FailureFlag(AtomicBool);

impl FailureFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Receiver of stall escalations.
pub trait StallReporter: Send + Sync {
    fn report_stall(&self);
}

impl StallReporter for ConnectivityManager {
    fn report_stall(&self) {
        ConnectivityManager::report_stall(self);
    }
}

pub struct WatchdogMonitor {
    link: Arc<dyn LinkStatus>,
    escalation: Arc<dyn StallReporter>,
    failure: Arc<FailureFlag>,
    stall_timeout: Duration,
    down_since: Instant,
}

impl WatchdogMonitor {
    pub fn new(
        link: Arc<dyn LinkStatus>,
        escalation: Arc<dyn StallReporter>,
        failure: Arc<FailureFlag>,
        stall_timeout: Duration,
    ) -> Self {
        Self {
            link,
            escalation,
            failure,
            stall_timeout,
            down_since: Instant::now(),
        }
    }

    /// Check the link once. Returns `true` when a stall was escalated.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.link.is_connected() {
            self.down_since = now;
            self.failure.clear();
            return false;
        }

        let down_for = now.saturating_duration_since(self.down_since);
        if down_for < self.stall_timeout {
            return false;
        }

        error!(
            "Watchdog: link not connected for {:?} (state {}); escalating",
            down_for,
            self.link.state()
        );
        metrics::counter!("glasses_watchdog_stalls_total").increment(1);
        self.failure.set();
        self.escalation.report_stall();
        self.down_since = now;
        true
    }
}

pub fn spawn_watchdog(
    mut monitor: WatchdogMonitor,
    shutdown: Arc<AtomicBool>,
    period: Duration,
) -> io::Result<JoinHandle<()>> {
    tasks::spawn_task("connectivity-watchdog", move || {
        info!(
            "Connectivity watchdog started (stall timeout {:?})",
            monitor.stall_timeout
        );
        while tasks::sleep_unless(&shutdown, period) {
            monitor.tick(Instant::now());
        }
    })
}
