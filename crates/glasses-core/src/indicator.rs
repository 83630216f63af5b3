//! Status LED and display announcements derived from connectivity.
//!
//! The indicator only reads shared state. It samples the connection state and
//! the failure flag once per tick and drives the light from a tick counter, so
//! it never blocks on the network or the camera.

use std::{
    io,
    sync::{Arc, atomic::AtomicBool},
    thread::JoinHandle,
    time::Duration,
};

use tracing::info;

use crate::{
    connectivity::{ConnectionState, LinkStatus},
    display::{Display, StatusLight},
    tasks,
    watchdog::FailureFlag,
};

pub const INDICATOR_TICK: Duration = Duration::from_millis(100);

const SLOW_BLINK_TICKS: u64 = 5;
const FAST_BLINK_TICKS: u64 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndicatorState {
    pub connection: ConnectionState,
    pub failed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedPattern {
    Solid,
    SlowBlink,
    FastBlink,
}

impl IndicatorState {
    pub fn pattern(self) -> LedPattern {
        if self.failed || self.connection == ConnectionState::Failed {
            LedPattern::SlowBlink
        } else if self.connection == ConnectionState::Connected {
            LedPattern::Solid
        } else {
            LedPattern::FastBlink
        }
    }
}

impl LedPattern {
    /// Display text announced when the pattern takes effect.
    pub fn announcement(self) -> &'static str {
        match self {
            LedPattern::Solid => "Connected",
            LedPattern::SlowBlink => "Network failed",
            LedPattern::FastBlink => "Connecting...",
        }
    }

    /// Light level `tick` ticks after the pattern took effect.
    pub fn level(self, tick: u64) -> bool {
        match self {
            LedPattern::Solid => true,
            LedPattern::SlowBlink => (tick / SLOW_BLINK_TICKS) % 2 == 0,
            LedPattern::FastBlink => (tick / FAST_BLINK_TICKS) % 2 == 0,
        }
    }
}

pub struct StatusIndicator {
    link: Arc<dyn LinkStatus>,
    failure: Arc<FailureFlag>,
    light: Arc<dyn StatusLight>,
    display: Arc<dyn Display>,
    current: Option<LedPattern>,
    phase: u64,
}

impl StatusIndicator {
    pub fn new(
        link: Arc<dyn LinkStatus>,
        failure: Arc<FailureFlag>,
        light: Arc<dyn StatusLight>,
        display: Arc<dyn Display>,
    ) -> Self {
        Self {
            link,
            failure,
            light,
            display,
            current: None,
            phase: 0,
        }
    }

    pub fn sample(&self) -> IndicatorState {
        IndicatorState {
            connection: self.link.state(),
            failed: self.failure.is_set(),
        }
    }

    /// Advance one tick and return the pattern being shown.
    pub fn tick(&mut self) -> LedPattern {
        let pattern = self.sample().pattern();
        if self.current != Some(pattern) {
            info!("Indicator: {}", pattern.announcement());
            self.display.show_text(pattern.announcement());
            self.current = Some(pattern);
            self.phase = 0;
        }
        self.light.set_level(pattern.level(self.phase));
        self.phase = self.phase.wrapping_add(1);
        pattern
    }
}

pub fn spawn_indicator(
    mut indicator: StatusIndicator,
    shutdown: Arc<AtomicBool>,
    period: Duration,
) -> io::Result<JoinHandle<()>> {
    tasks::spawn_task("status-indicator", move || {
        loop {
            indicator.tick();
            if !tasks::sleep_unless(&shutdown, period) {
                break;
            }
        }
        indicator.light.set_level(false);
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU8, Ordering};

    use super::*;
    use crate::display::tests::{RecordingDisplay, RecordingLight};

    struct FakeLink(AtomicU8);

    impl FakeLink {
        fn set(&self, state: ConnectionState) {
            self.0.store(state as u8, Ordering::SeqCst);
        }
    }

    impl LinkStatus for FakeLink {
        fn state(&self) -> ConnectionState {
            match self.0.load(Ordering::SeqCst) {
                1 => ConnectionState::Connecting,
                2 => ConnectionState::Connected,
                3 => ConnectionState::Retrying,
                4 => ConnectionState::Failed,
                _ => ConnectionState::Idle,
            }
        }
    }

    fn indicator() -> (
        StatusIndicator,
        Arc<FakeLink>,
        Arc<FailureFlag>,
        Arc<RecordingLight>,
        Arc<RecordingDisplay>,
    ) {
        let link = Arc::new(FakeLink(AtomicU8::new(0)));
        let failure = Arc::new(FailureFlag::new());
        let light = Arc::new(RecordingLight::default());
        let display = Arc::new(RecordingDisplay::default());
        let indicator =
            StatusIndicator::new(link.clone(), failure.clone(), light.clone(), display.clone());
        (indicator, link, failure, light, display)
    }

    #[test]
    fn pattern_follows_connection_and_failure() {
        let state = |connection, failed| IndicatorState { connection, failed };
        assert_eq!(state(ConnectionState::Connected, false).pattern(), LedPattern::Solid);
        assert_eq!(state(ConnectionState::Connecting, false).pattern(), LedPattern::FastBlink);
        assert_eq!(state(ConnectionState::Retrying, false).pattern(), LedPattern::FastBlink);
        assert_eq!(state(ConnectionState::Idle, false).pattern(), LedPattern::FastBlink);
        assert_eq!(state(ConnectionState::Failed, false).pattern(), LedPattern::SlowBlink);
        assert_eq!(state(ConnectionState::Connecting, true).pattern(), LedPattern::SlowBlink);
    }

    #[test]
    fn blink_rates_differ() {
        let fast: Vec<bool> = (0..4).map(|t| LedPattern::FastBlink.level(t)).collect();
        assert_eq!(fast, vec![true, false, true, false]);
        let slow: Vec<bool> = (0..10).map(|t| LedPattern::SlowBlink.level(t)).collect();
        assert_eq!(slow.iter().filter(|on| **on).count(), 5);
        assert!(slow[..5].iter().all(|on| *on));
    }

    #[test]
    fn announces_only_changes() {
        let (mut indicator, link, failure, light, display) = indicator();
        link.set(ConnectionState::Connecting);
        indicator.tick();
        indicator.tick();
        link.set(ConnectionState::Connected);
        indicator.tick();
        indicator.tick();
        failure.set();
        indicator.tick();

        assert_eq!(
            display.lines(),
            vec!["Connecting...", "Connected", "Network failed"]
        );
        assert_eq!(light.levels(), vec![true, false, true, true, true]);
    }

    #[test]
    fn stops_and_turns_the_light_off() {
        let (indicator, link, _failure, light, _display) = indicator();
        link.set(ConnectionState::Connected);
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = spawn_indicator(indicator, shutdown.clone(), Duration::from_millis(5)).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap();
        assert_eq!(light.levels().last(), Some(&false));
    }
}
