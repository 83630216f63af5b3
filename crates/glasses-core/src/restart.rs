//! Device-level restart requests.
//!
//! A device restart is the only state-losing recovery action. Components ask
//! for one through [`DeviceControl`]; the supervisor owning the process-wide
//! state observes the [`RestartLatch`] and performs it.

use std::sync::{
    Mutex,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use tracing::error;

/// Sink for fatal restart requests.
pub trait DeviceControl: Send + Sync {
    fn request_restart(&self, reason: &str);
}

/// Latch recording the first restart request and how many arrived in total.
#[derive(Default)]
pub struct RestartLatch {
    triggered: AtomicBool,
    requests: AtomicU32,
    reason: Mutex<Option<String>>,
}

impl RestartLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a restart request. Only the first reason is kept.
    pub fn arm(&self, reason: &str) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if let Ok(mut guard) = self.reason.lock() {
                *guard = Some(reason.to_string());
            }
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn request_count(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        match self.reason.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        }
    }
}

impl DeviceControl for RestartLatch {
    fn request_restart(&self, reason: &str) {
        error!("Device restart requested: {reason}");
        self.arm(reason);
    }
}
