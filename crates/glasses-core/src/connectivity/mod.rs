//! Network association lifecycle: the transition table and the manager that
//! drives the network stack with it.

mod manager;
mod state;

pub use manager::{
    ConnectivityError, ConnectivityManager, ConnectivitySnapshot, LinkEventSink, NetworkError,
    NetworkStack, WaitOutcome,
};
pub use state::{
    ConnectionState, ConnectivityEvent, LinkAction, LinkEvent, REASON_BEACON_TIMEOUT,
    REASON_NO_AP_FOUND, RetryPolicy, Transition, transition,
};

/// Read-only view of the link used by tasks that must not drive it.
pub trait LinkStatus: Send + Sync {
    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}
