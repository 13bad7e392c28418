//! Worker state machine (spec §4.3, component C3).
//!
//! The state machine is the only place retries and reconnects are decided;
//! drivers and polling groups only ever report outcomes up through
//! [`StateMachine::on_event`]. Kept free of I/O so the transition table
//! itself is unit testable.

use pulse_common::DeviceSettings;
use std::time::Duration;

/// Mirrors `pulse_common::DeviceState` one-for-one; kept as its own type so
/// the transition table can live next to it without a circular re-export.
pub use pulse_common::DeviceState as State;

/// Inputs the worker feeds into the state machine (spec §4.3 transition
/// table's "Event" column).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start,
    ConnectOk,
    ConnectFail,
    ReadTimeoutExceeded,
    KeepAliveFail,
    BackoffElapsed,
    ConnectFailThresholdReached,
    Pause,
    Resume,
    Stop,
    Stopped,
    UnhandledException,
}

/// Side effect the caller (the worker) must carry out after a transition.
/// The state machine only decides *what* happens, never performs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    None,
    BuildAndConnect,
    PublishDeviceOnline,
    ScheduleBackoff,
    CloseSocket,
    ResetBackoff,
    BumpBackoff,
    DisconnectAndJoin,
    LogAndScheduleRestart,
}

/// Exponential backoff per spec §4.3: `initial = retry_interval_ms,
/// multiplier = backoff_multiplier, cap = max_backoff_time_ms`.
#[derive(Debug, Clone)]
pub struct Backoff {
    current_ms: u32,
    multiplier: f64,
    cap_ms: u32,
    initial_ms: u32,
    pub attempts: u32,
}

impl Backoff {
    pub fn from_settings(settings: &DeviceSettings) -> Self {
        Self {
            current_ms: settings.retry_interval_ms.max(1),
            multiplier: settings.backoff_multiplier.max(1.0),
            cap_ms: settings.max_backoff_time_ms.max(settings.retry_interval_ms.max(1)),
            initial_ms: settings.retry_interval_ms.max(1),
            attempts: 0,
        }
    }

    pub fn reset(&mut self) {
        self.current_ms = self.initial_ms;
        self.attempts = 0;
    }

    /// Returns the delay to wait before the *next* attempt, then advances
    /// the internal counter (capped at `cap_ms`). Does not touch `attempts`
    /// — that is owned by [`StateMachine::on_event`] via `record_failure`,
    /// so the transition table stays self-consistent without depending on
    /// callers invoking this in any particular order relative to `on_event`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = Duration::from_millis(self.current_ms as u64);
        let scaled = (self.current_ms as f64 * self.multiplier) as u32;
        self.current_ms = scaled.min(self.cap_ms);
        delay
    }

    /// Records one more consecutive connect failure, returning the new
    /// count. The only mutator of `attempts`.
    pub fn record_failure(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }
}

/// Pure transition table (spec §4.3). `reconnect_threshold` comes from
/// `DeviceSettings.max_retry_count` and governs Reconnecting → DeviceOffline.
pub struct StateMachine {
    state: State,
    prior_before_pause: Option<State>,
    pub backoff: Backoff,
    reconnect_threshold: u32,
}

impl StateMachine {
    pub fn new(settings: &DeviceSettings) -> Self {
        Self {
            state: State::Stopped,
            prior_before_pause: None,
            backoff: Backoff::from_settings(settings),
            reconnect_threshold: settings.max_retry_count.max(1),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Applies one event, returning the action the worker must perform.
    /// Unknown (state, event) pairs are no-ops — spec only defines the
    /// transitions in the table; everything else leaves state untouched.
    pub fn on_event(&mut self, event: Event) -> Action {
        use Action as A;
        use State::*;

        if event == Event::Pause && self.state != Stopping && self.state != Stopped {
            self.prior_before_pause = Some(self.state);
            self.state = Paused;
            return A::None;
        }
        if event == Event::Resume && self.state == Paused {
            self.state = self.prior_before_pause.take().unwrap_or(Running);
            return A::None;
        }
        if event == Event::Stop && self.state != Stopped && self.state != Stopping {
            self.state = Stopping;
            return A::DisconnectAndJoin;
        }
        if event == Event::Stopped && self.state == Stopping {
            self.state = Stopped;
            return A::None;
        }
        if event == Event::UnhandledException {
            self.state = Error;
            return A::LogAndScheduleRestart;
        }

        match (self.state, event) {
            (Stopped, Event::Start) => {
                self.state = Starting;
                A::BuildAndConnect
            }
            (Starting, Event::ConnectOk) => {
                self.state = Running;
                self.backoff.reset();
                A::PublishDeviceOnline
            }
            (Starting, Event::ConnectFail) => {
                self.state = Reconnecting;
                self.backoff.record_failure();
                A::ScheduleBackoff
            }
            (Running, Event::ReadTimeoutExceeded) | (Running, Event::KeepAliveFail) => {
                self.state = Reconnecting;
                A::CloseSocket
            }
            (Reconnecting, Event::BackoffElapsed) => A::None,
            (Reconnecting, Event::ConnectOk) => {
                self.state = Running;
                self.backoff.reset();
                A::ResetBackoff
            }
            (Reconnecting, Event::ConnectFail) => {
                let attempts = self.backoff.record_failure();
                if attempts >= self.reconnect_threshold {
                    self.state = DeviceOffline;
                    A::None
                } else {
                    A::BumpBackoff
                }
            }
            (Reconnecting, Event::ConnectFailThresholdReached) => {
                self.state = DeviceOffline;
                A::None
            }
            _ => A::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DeviceSettings {
        DeviceSettings {
            device_id: 1,
            polling_interval_ms: 1000,
            connection_timeout_ms: 3000,
            read_timeout_ms: 1000,
            write_timeout_ms: 1000,
            max_retry_count: 3,
            retry_interval_ms: 100,
            backoff_time_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_time_ms: 2000,
            keep_alive_enabled: true,
            keep_alive_interval_s: 30,
            keep_alive_timeout_s: 5,
            data_validation_enabled: true,
            performance_monitoring_enabled: false,
            diagnostic_mode: false,
            scan_rate_override: None,
        }
    }

    #[test]
    fn starts_then_connects_successfully() {
        let mut sm = StateMachine::new(&settings());
        assert_eq!(sm.on_event(Event::Start), Action::BuildAndConnect);
        assert_eq!(sm.state(), State::Starting);
        assert_eq!(sm.on_event(Event::ConnectOk), Action::PublishDeviceOnline);
        assert_eq!(sm.state(), State::Running);
    }

    #[test]
    fn connect_failure_during_start_enters_reconnecting() {
        let mut sm = StateMachine::new(&settings());
        sm.on_event(Event::Start);
        assert_eq!(sm.on_event(Event::ConnectFail), Action::ScheduleBackoff);
        assert_eq!(sm.state(), State::Reconnecting);
    }

    #[test]
    fn repeated_reconnect_failures_reach_device_offline() {
        let mut sm = StateMachine::new(&settings());
        sm.on_event(Event::Start);
        sm.on_event(Event::ConnectFail);
        // max_retry_count = 3, so two more failures should push us offline.
        sm.on_event(Event::ConnectFail);
        assert_eq!(sm.state(), State::Reconnecting);
        sm.on_event(Event::ConnectFail);
        assert_eq!(sm.state(), State::DeviceOffline);
    }

    #[test]
    fn running_read_timeout_drops_to_reconnecting() {
        let mut sm = StateMachine::new(&settings());
        sm.on_event(Event::Start);
        sm.on_event(Event::ConnectOk);
        assert_eq!(sm.on_event(Event::ReadTimeoutExceeded), Action::CloseSocket);
        assert_eq!(sm.state(), State::Reconnecting);
    }

    #[test]
    fn pause_preserves_prior_state_for_resume() {
        let mut sm = StateMachine::new(&settings());
        sm.on_event(Event::Start);
        sm.on_event(Event::ConnectOk);
        sm.on_event(Event::Pause);
        assert_eq!(sm.state(), State::Paused);
        sm.on_event(Event::Resume);
        assert_eq!(sm.state(), State::Running);
    }

    #[test]
    fn stop_from_any_non_terminal_state_goes_through_stopping() {
        let mut sm = StateMachine::new(&settings());
        sm.on_event(Event::Start);
        assert_eq!(sm.on_event(Event::Stop), Action::DisconnectAndJoin);
        assert_eq!(sm.state(), State::Stopping);
        sm.on_event(Event::Stopped);
        assert_eq!(sm.state(), State::Stopped);
    }

    #[test]
    fn unhandled_exception_always_moves_to_error() {
        let mut sm = StateMachine::new(&settings());
        sm.on_event(Event::Start);
        sm.on_event(Event::ConnectOk);
        assert_eq!(sm.on_event(Event::UnhandledException), Action::LogAndScheduleRestart);
        assert_eq!(sm.state(), State::Error);
    }

    #[test]
    fn backoff_grows_by_multiplier_and_caps() {
        let mut b = Backoff::from_settings(&settings());
        assert_eq!(b.next_delay(), Duration::from_millis(100));
        assert_eq!(b.next_delay(), Duration::from_millis(200));
        assert_eq!(b.next_delay(), Duration::from_millis(400));
        // Keep doubling past the cap of 2000ms.
        for _ in 0..10 {
            b.next_delay();
        }
        assert_eq!(b.next_delay(), Duration::from_millis(2000));
    }

    #[test]
    fn backoff_reset_returns_to_initial() {
        let mut b = Backoff::from_settings(&settings());
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.attempts, 0);
        assert_eq!(b.next_delay(), Duration::from_millis(100));
    }
}
