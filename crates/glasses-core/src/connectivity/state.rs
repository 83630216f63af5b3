//! Connectivity states, events, and the transition table that links them.
//!
//! The table is a pure function of `(state, event, retry counters)`; it knows
//! nothing about how the network stack delivers its callbacks. The manager
//! feeds it events and executes the returned [`LinkAction`].

use std::fmt;

use serde::Serialize;

/// Disconnect reason reported when no access point answered.
pub const REASON_NO_AP_FOUND: u16 = 201;
/// Disconnect reason reported when an established link went quiet.
pub const REASON_BEACON_TIMEOUT: u16 = 200;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Retrying,
    Failed,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Retrying => "retrying",
            ConnectionState::Failed => "failed",
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Idle => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Retrying => 3,
            ConnectionState::Failed => 4,
        }
    }

    pub(crate) fn from_u8(code: u8) -> Self {
        match code {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Retrying,
            4 => ConnectionState::Failed,
            _ => ConnectionState::Idle,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Link lifecycle notifications emitted by the network stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Started,
    Disconnected { reason: u16 },
    AddressAcquired { address: String },
}

/// Everything the transition table reacts to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Link(LinkEvent),
    /// Raised by the watchdog when association has not completed in time.
    StallTimeout,
}

impl From<LinkEvent> for ConnectivityEvent {
    fn from(event: LinkEvent) -> Self {
        ConnectivityEvent::Link(event)
    }
}

/// Side effect requested by a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkAction {
    None,
    Connect,
    RestartStack,
    RestartDevice,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub next: ConnectionState,
    pub action: LinkAction,
}

impl Transition {
    fn to(next: ConnectionState, action: LinkAction) -> Self {
        Self { next, action }
    }
}

/// Retry counters and their limits.
///
/// `attempt_count` counts failed association attempts in the current cycle and
/// never exceeds `max_attempts_per_cycle`; reaching the limit closes the cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    pub attempt_count: u32,
    pub max_attempts_per_cycle: u32,
    pub cycle_count: u32,
    pub max_cycles: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts_per_cycle: u32, max_cycles: u32) -> Self {
        Self {
            attempt_count: 0,
            max_attempts_per_cycle: max_attempts_per_cycle.max(1),
            cycle_count: 0,
            max_cycles: max_cycles.max(1),
        }
    }

    pub fn reset(&mut self) {
        self.attempt_count = 0;
        self.cycle_count = 0;
    }

    /// Close the current cycle and report whether the cycle ceiling is reached.
    fn close_cycle(&mut self) -> bool {
        self.attempt_count = 0;
        self.cycle_count = self.cycle_count.saturating_add(1);
        self.cycle_count >= self.max_cycles
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, 3)
    }
}

/// Compute the next state and side effect for `event`, updating `policy`.
pub fn transition(
    state: ConnectionState,
    event: &ConnectivityEvent,
    policy: &mut RetryPolicy,
) -> Transition {
    use ConnectionState::*;

    // A fatal escalation has already been requested; nothing can undo it
    // short of the device restart itself.
    if state == Failed {
        return Transition::to(Failed, LinkAction::None);
    }

    match event {
        ConnectivityEvent::Link(LinkEvent::Started) => match state {
            Idle | Retrying => Transition::to(Connecting, LinkAction::Connect),
            _ => Transition::to(state, LinkAction::None),
        },
        ConnectivityEvent::Link(LinkEvent::AddressAcquired { .. }) => {
            policy.reset();
            Transition::to(Connected, LinkAction::None)
        }
        ConnectivityEvent::Link(LinkEvent::Disconnected { .. }) => {
            if state == Idle {
                // Late report from a stack that is already being restarted.
                return Transition::to(Idle, LinkAction::None);
            }
            policy.attempt_count = policy.attempt_count.saturating_add(1);
            if policy.attempt_count < policy.max_attempts_per_cycle {
                Transition::to(Retrying, LinkAction::Connect)
            } else {
                escalate(policy)
            }
        }
        ConnectivityEvent::StallTimeout => match state {
            Connected => Transition::to(Connected, LinkAction::None),
            _ => escalate(policy),
        },
    }
}

fn escalate(policy: &mut RetryPolicy) -> Transition {
    if policy.close_cycle() {
        Transition::to(ConnectionState::Failed, LinkAction::RestartDevice)
    } else {
        Transition::to(ConnectionState::Idle, LinkAction::RestartStack)
    }
}
