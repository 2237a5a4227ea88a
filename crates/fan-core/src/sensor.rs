//! Per-sensor fault state machine.

use crate::definition::{Method, SensorDefinition};
use crate::status::SensorStatus;
use crate::timer::Timer;
use std::time::Duration;

/// Which way a pending time-based timer will move the sensor when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// Out-of-range debounce; fires into `NonFunctional`.
    Nonfunctional,
    /// In-range recovery; fires back into `Functional`.
    Functional,
}

/// Timer events a sensor can produce for its fan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorTimer {
    Method(TimerMode),
    Error,
}

#[derive(Debug, Clone)]
pub struct TachSensor {
    name: String,
    has_target: bool,
    target_interface: String,
    factor: f64,
    offset: f64,
    method: Method,
    functional_delay: Duration,
    error_delay: Option<Duration>,

    input: Option<f64>,
    target: u64,
    functional: bool,
    counter: u32,

    timer: Timer,
    timer_mode: TimerMode,
    error_timer: Timer,
}

impl TachSensor {
    pub fn new(def: &SensorDefinition, error_delay: Option<Duration>) -> Self {
        Self {
            name: def.name.clone(),
            has_target: def.has_target,
            target_interface: def.target_interface.clone(),
            factor: def.factor,
            offset: def.offset,
            method: def.method,
            functional_delay: def.functional_delay,
            error_delay,
            input: None,
            target: 0,
            functional: true,
            counter: 0,
            timer: Timer::new(),
            timer_mode: TimerMode::Nonfunctional,
            error_timer: Timer::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn has_target(&self) -> bool {
        self.has_target
    }

    pub fn target_interface(&self) -> &str {
        &self.target_interface
    }

    pub fn functional(&self) -> bool {
        self.functional
    }

    pub fn input(&self) -> Option<f64> {
        self.input
    }

    pub fn set_input(&mut self, value: f64) {
        self.input = Some(value);
    }

    /// The sensor's own target. Sensors without one borrow a sibling's
    /// through the fan.
    pub fn own_target(&self) -> u64 {
        self.target
    }

    pub fn set_target(&mut self, target: u64) {
        self.target = target;
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn timer_running(&self) -> bool {
        self.timer.is_running()
    }

    pub fn timer_mode(&self) -> TimerMode {
        self.timer_mode
    }

    pub fn error_timer_running(&self) -> bool {
        self.error_timer.is_running()
    }

    /// Allowed `(min, max)` input for `target` under the fan's deviation.
    pub fn range(&self, deviation: f64, target: u64) -> (f64, f64) {
        let target = target as f64;
        let min = target * (1.0 - deviation) * self.factor - self.offset;
        let max = target * (1.0 + deviation) * self.factor + self.offset;
        (min, max)
    }

    /// An unknown input counts as out of range.
    pub fn out_of_range(&self, deviation: f64, target: u64) -> bool {
        let (min, max) = self.range(deviation, target);
        match self.input {
            Some(input) => !(min..=max).contains(&input),
            None => true,
        }
    }

    /// Apply one range check. Returns the new functional state when the
    /// check itself completes a transition (count method only); time-based
    /// sensors only move their timers here and transition on expiry.
    pub fn process(&mut self, out_of_range: bool, now_us: u64) -> Option<bool> {
        match self.method {
            Method::Timebased { .. } => {
                match (out_of_range, self.functional) {
                    (true, true) => self.start_timer(TimerMode::Nonfunctional, now_us),
                    (true, false) => {
                        if self.timer_mode == TimerMode::Functional {
                            self.timer.stop();
                        }
                    }
                    (false, true) => self.timer.stop(),
                    (false, false) => self.start_timer(TimerMode::Functional, now_us),
                }
                None
            }
            Method::Count { threshold, .. } => {
                if out_of_range {
                    self.increment_counter();
                    (self.functional && self.counter >= threshold).then_some(false)
                } else {
                    self.decrement_counter();
                    (!self.functional && self.counter == 0).then_some(true)
                }
            }
        }
    }

    /// Start the time-based timer unless one in the same mode is pending.
    pub fn start_timer(&mut self, mode: TimerMode, now_us: u64) {
        if self.timer.is_running() && self.timer_mode == mode {
            return;
        }
        self.timer_mode = mode;
        self.timer.start(now_us, self.delay(mode));
    }

    pub fn stop_timer(&mut self) {
        self.timer.stop();
    }

    fn delay(&self, mode: TimerMode) -> Duration {
        match (mode, self.method) {
            (TimerMode::Nonfunctional, Method::Timebased { timeout }) => timeout,
            (TimerMode::Nonfunctional, Method::Count { .. }) => Duration::ZERO,
            (TimerMode::Functional, _) => self.functional_delay,
        }
    }

    fn increment_counter(&mut self) {
        if let Method::Count { threshold, step } = self.method {
            self.counter = self.counter.saturating_add(step).min(threshold);
        }
    }

    fn decrement_counter(&mut self) {
        if let Method::Count { step, .. } = self.method {
            self.counter = self.counter.saturating_sub(step);
        }
    }

    pub fn reset_counter(&mut self) {
        self.counter = 0;
    }

    /// Set the functional state, arming or clearing the error timer.
    pub fn set_functional(&mut self, functional: bool, now_us: u64) {
        self.functional = functional;
        if functional {
            self.error_timer.stop();
        } else if let Some(delay) = self.error_delay {
            if !self.error_timer.is_running() {
                self.error_timer.start(now_us, delay);
            }
        }
    }

    pub fn stop_timers(&mut self) {
        self.timer.stop();
        self.error_timer.stop();
    }

    /// Earliest pending deadline and which timer owns it.
    pub fn next_deadline(&self) -> Option<(u64, SensorTimer)> {
        let method = self
            .timer
            .deadline()
            .map(|d| (d, SensorTimer::Method(self.timer_mode)));
        let error = self.error_timer.deadline().map(|d| (d, SensorTimer::Error));
        match (method, error) {
            (Some(m), Some(e)) => Some(if e.0 < m.0 { e } else { m }),
            (m, e) => m.or(e),
        }
    }

    /// Consume an expired method timer, reporting its mode.
    pub(crate) fn take_timer(&mut self, now_us: u64) -> Option<TimerMode> {
        self.timer.take_expired(now_us).then_some(self.timer_mode)
    }

    pub(crate) fn take_error_timer(&mut self, now_us: u64) -> bool {
        self.error_timer.take_expired(now_us)
    }

    pub fn status(&self, target: u64) -> SensorStatus {
        SensorStatus {
            name: self.name.clone(),
            functional: self.functional,
            input: self.input,
            target,
            method: self.method.as_str(),
            counter: self.counter,
            timer_running: self.timer.is_running(),
        }
    }
}
