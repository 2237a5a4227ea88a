//! Fan assembly: owns its tach sensors, aggregates their faults into a
//! fan-level functional state, and gates monitoring on presence and power.

use crate::definition::{FanDefinition, Method};
use crate::error::{DefinitionError, ReadError};
use crate::sensor::{SensorTimer, TachSensor, TimerMode};
use crate::status::FanStatus;
use crate::system::Context;
use crate::timer::{RepeatingTimer, Timer};
use log::{debug, info, warn};
use std::time::Duration;

/// Identifies which of a fan's timers is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FanTimer {
    MonitorStart,
    FanMissing,
    Sensor(usize),
    SensorError(usize),
    CountTick,
}

pub struct Fan {
    name: String,
    deviation: f64,
    num_sensor_fails_for_nonfunc: usize,
    sensors: Vec<TachSensor>,

    present: bool,
    functional: bool,
    monitor_ready: bool,

    monitor_delay: Duration,
    monitor_timer: Timer,
    fan_missing_error_delay: Option<Duration>,
    fan_missing_timer: Timer,
    count_timer: Option<RepeatingTimer>,
}

impl Fan {
    pub fn new(def: &FanDefinition) -> Result<Self, DefinitionError> {
        def.validate()?;

        let sensors: Vec<TachSensor> = def
            .sensors
            .iter()
            .map(|s| TachSensor::new(s, def.nonfunc_rotor_error_delay))
            .collect();

        // Only fans with count-method sensors need the periodic tick, and it
        // stays disabled until monitoring starts.
        let count_timer = sensors
            .iter()
            .any(|s| s.method().is_count())
            .then(|| RepeatingTimer::new(def.count_interval));

        Ok(Self {
            name: def.name.clone(),
            deviation: def.deviation,
            num_sensor_fails_for_nonfunc: def.num_sensor_fails_for_nonfunc,
            sensors,
            present: false,
            functional: true,
            monitor_ready: false,
            monitor_delay: def.monitor_start_delay,
            monitor_timer: Timer::new(),
            fan_missing_error_delay: def.fan_missing_error_delay,
            fan_missing_timer: Timer::new(),
            count_timer,
        })
    }

    /// Publish the optimistic starting state and pick up presence.
    pub fn initialize(&mut self, ctx: &mut Context<'_>) {
        self.update_inventory(true, ctx);

        if ctx.power_on {
            self.monitor_timer.start(ctx.now_us, self.monitor_delay);
        }

        match ctx.source.fan_present(&self.name) {
            Ok(present) => {
                self.present = present;
                if !present {
                    info!("On startup, fan {} is missing", self.name);
                    if ctx.power_on {
                        self.arm_fan_missing_timer(ctx.now_us);
                    }
                }
            }
            // Presence detection may not have published yet on first boot.
            Err(e) => debug!("Presence of fan {} unknown at startup: {}", self.name, e),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn present(&self) -> bool {
        self.present
    }

    pub fn functional(&self) -> bool {
        self.functional
    }

    pub fn monitor_ready(&self) -> bool {
        self.monitor_ready
    }

    pub fn sensors(&self) -> &[TachSensor] {
        &self.sensors
    }

    pub fn sensor_index(&self, name: &str) -> Option<usize> {
        self.sensors.iter().position(|s| s.name() == name)
    }

    pub fn count_timer_enabled(&self) -> bool {
        self.count_timer.is_some_and(|t| t.is_enabled())
    }

    pub fn fan_missing_timer_running(&self) -> bool {
        self.fan_missing_timer.is_running()
    }

    pub fn count_nonfunctional_sensors(&self) -> usize {
        self.sensors.iter().filter(|s| !s.functional()).count()
    }

    /// Target for a sensor. Sensors without their own take the first
    /// sibling's that has one.
    pub fn target_for(&self, index: usize) -> u64 {
        let sensor = &self.sensors[index];
        if sensor.has_target() {
            return sensor.own_target();
        }
        self.sensors
            .iter()
            .find(|s| s.has_target())
            .map(|s| s.own_target())
            .unwrap_or(0)
    }

    pub fn on_tach_changed(&mut self, index: usize, value: f64, ctx: &mut Context<'_>) {
        self.sensors[index].set_input(value);
        self.tach_changed(index, ctx);
    }

    pub fn on_target_changed(&mut self, index: usize, target: u64, ctx: &mut Context<'_>) {
        self.sensors[index].set_target(target);
        self.tach_changed(index, ctx);
    }

    fn tach_changed(&mut self, index: usize, ctx: &mut Context<'_>) {
        if !ctx.power_on || !self.monitor_ready || !self.present {
            return;
        }

        if !ctx.trusted(self.sensors[index].name()) {
            return;
        }

        // Count sensors are only checked on the tick so a stuck reading that
        // never raises a change event is still counted.
        if let Method::Timebased { .. } = self.sensors[index].method() {
            self.process(index, ctx);
        }
    }

    fn on_count_tick(&mut self, ctx: &mut Context<'_>) {
        if !ctx.power_on || !self.monitor_ready || !self.present {
            return;
        }
        for index in 0..self.sensors.len() {
            if !self.sensors[index].method().is_count() {
                continue;
            }
            if !ctx.trusted(self.sensors[index].name()) {
                continue;
            }
            self.process(index, ctx);
        }
    }

    fn process(&mut self, index: usize, ctx: &mut Context<'_>) {
        let target = self.target_for(index);
        let out_of_range = self.sensors[index].out_of_range(self.deviation, target);
        if let Some(functional) = self.sensors[index].process(out_of_range, ctx.now_us) {
            self.update_state(index, functional, ctx);
        }
    }

    fn update_state(&mut self, index: usize, functional: bool, ctx: &mut Context<'_>) {
        if !ctx.power_on {
            return;
        }

        let target = self.target_for(index);
        let (min, max) = self.sensors[index].range(self.deviation, target);
        let sensor = &mut self.sensors[index];
        sensor.set_functional(functional, ctx.now_us);
        info!(
            "Setting tach sensor {} functional state to {}. [target = {}, input = {:?}, allowed range = ({} - {})]",
            sensor.name(),
            functional,
            target,
            sensor.input(),
            min,
            max
        );

        self.update_functional_aggregate(ctx);
        ctx.coordinator.fan_status_change(&self.status(), false);
    }

    /// Re-derive the fan-level state from sensor states, notifying the
    /// inventory only when the threshold boundary is crossed.
    pub fn update_functional_aggregate(&mut self, ctx: &mut Context<'_>) {
        // Zero means only sensor-level state is tracked for this fan.
        if self.num_sensor_fails_for_nonfunc == 0 {
            return;
        }

        let nonfunctional = self.count_nonfunctional_sensors();
        let over = nonfunctional >= self.num_sensor_fails_for_nonfunc;

        if !self.functional && !over {
            info!(
                "Setting fan {} to functional, number of nonfunctional sensors = {}",
                self.name, nonfunctional
            );
            self.update_inventory(true, ctx);
        } else if self.functional && over {
            info!(
                "Setting fan {} to nonfunctional, number of nonfunctional sensors = {}",
                self.name, nonfunctional
            );
            self.update_inventory(false, ctx);
        }
    }

    fn update_inventory(&mut self, functional: bool, ctx: &mut Context<'_>) {
        self.functional = functional;
        if let Err(e) = ctx.inventory.notify(&self.name, functional) {
            warn!(
                "Error in inventory notify for fan {} (functional = {}): {}",
                self.name, functional, e
            );
        }
    }

    pub fn on_presence_changed(&mut self, present: bool, ctx: &mut Context<'_>) {
        self.present = present;
        info!("Fan {} presence state change to {}", self.name, present);

        ctx.coordinator.fan_status_change(&self.status(), false);

        if !present {
            // A pulled fan keeps its last states; pending debounce is dropped.
            for sensor in &mut self.sensors {
                sensor.stop_timer();
            }
            if ctx.power_on {
                self.arm_fan_missing_timer(ctx.now_us);
            }
        } else {
            self.fan_missing_timer.stop();
        }
    }

    fn arm_fan_missing_timer(&mut self, now_us: u64) {
        if let Some(delay) = self.fan_missing_error_delay {
            self.fan_missing_timer.start(now_us, delay);
        }
    }

    pub fn on_power_state_changed(&mut self, power_on: bool, ctx: &mut Context<'_>) {
        if power_on {
            self.power_on(ctx);
        } else {
            self.power_off();
        }
    }

    fn power_on(&mut self, ctx: &mut Context<'_>) {
        self.monitor_timer.start(ctx.now_us, self.monitor_delay);

        if !self.present {
            info!("At power on, fan {} is missing", self.name);
            self.arm_fan_missing_timer(ctx.now_us);
            return;
        }

        for index in 0..self.sensors.len() {
            if let Err(e) = self.refresh_sensor(index, ctx) {
                // Left for the monitor-start evaluation to pin down.
                info!(
                    "At power on, tach sensor {} value not published: {}",
                    self.sensors[index].name(),
                    e
                );
                continue;
            }

            let sensor = &mut self.sensors[index];
            if sensor.method().is_count() {
                sensor.reset_counter();
            }
            if !sensor.functional() {
                sensor.set_functional(true, ctx.now_us);
                ctx.coordinator.fan_status_change(&self.status(), true);
            }
        }

        if self.num_sensor_fails_for_nonfunc != 0
            && !self.functional
            && self.count_nonfunctional_sensors() < self.num_sensor_fails_for_nonfunc
        {
            self.update_inventory(true, ctx);
        }
    }

    fn power_off(&mut self) {
        // Functional states are kept as last computed; only timers stop.
        self.monitor_ready = false;
        self.monitor_timer.stop();
        self.fan_missing_timer.stop();
        for sensor in &mut self.sensors {
            sensor.stop_timers();
        }
        if let Some(timer) = self.count_timer.as_mut() {
            timer.set_enabled(false);
        }
    }

    /// Pull the sensor's current input (and target, if it has one) from the
    /// property source.
    fn refresh_sensor(
        &mut self,
        index: usize,
        ctx: &Context<'_>,
    ) -> Result<(), ReadError> {
        let sensor = &mut self.sensors[index];
        let input = ctx.source.tach_input(sensor.name())?;
        let target = if sensor.has_target() {
            Some(ctx.source.tach_target(sensor.name(), sensor.target_interface())?)
        } else {
            None
        };
        sensor.set_input(input);
        if let Some(target) = target {
            sensor.set_target(target);
        }
        Ok(())
    }

    fn start_monitor(&mut self, ctx: &mut Context<'_>) {
        if !ctx.power_on {
            return;
        }
        self.monitor_ready = true;

        if let Some(timer) = self.count_timer.as_mut() {
            timer.reset_remaining(ctx.now_us);
            timer.set_enabled(true);
        }

        if !self.present {
            return;
        }

        for index in 0..self.sensors.len() {
            match self.refresh_sensor(index, ctx) {
                Ok(()) => self.tach_changed(index, ctx),
                Err(e) => {
                    // Sensors are not failed before this point so nothing
                    // acts on a sensor that simply has not appeared yet.
                    info!(
                        "Monitoring starting but {} sensor value not published: {}",
                        self.sensors[index].name(),
                        e
                    );
                    self.sensors[index].set_functional(false, ctx.now_us);
                    self.update_functional_aggregate(ctx);
                    ctx.coordinator.fan_status_change(&self.status(), false);
                }
            }
        }

        self.update_functional_aggregate(ctx);
    }

    fn on_sensor_timer(&mut self, index: usize, mode: TimerMode, ctx: &mut Context<'_>) {
        if !ctx.power_on || !self.monitor_ready || !self.present {
            return;
        }
        let target = self.target_for(index);
        let out_of_range = self.sensors[index].out_of_range(self.deviation, target);
        let functional = self.sensors[index].functional();
        match mode {
            TimerMode::Nonfunctional if out_of_range && functional => {
                self.update_state(index, false, ctx)
            }
            TimerMode::Functional if !out_of_range && !functional => {
                self.update_state(index, true, ctx)
            }
            _ => debug!(
                "Stale {:?} timer for sensor {} ignored",
                mode,
                self.sensors[index].name()
            ),
        }
    }

    fn on_sensor_error_timer(&mut self, index: usize, ctx: &mut Context<'_>) {
        if self.present && ctx.power_on && !self.sensors[index].functional() {
            let status = self.status();
            let target = self.target_for(index);
            let sensor = self.sensors[index].status(target);
            ctx.coordinator.sensor_error_timer_expired(&status, &sensor);
        }
    }

    fn on_fan_missing_timer(&mut self, ctx: &mut Context<'_>) {
        if !self.present && ctx.power_on {
            ctx.coordinator
                .fan_missing_error_timer_expired(&self.status());
        }
    }

    /// Earliest pending timer of this fan.
    pub fn next_deadline(&self) -> Option<(u64, FanTimer)> {
        let fan_timers = [
            self.monitor_timer
                .deadline()
                .map(|d| (d, FanTimer::MonitorStart)),
            self.fan_missing_timer
                .deadline()
                .map(|d| (d, FanTimer::FanMissing)),
            self.count_timer
                .and_then(|t| t.deadline())
                .map(|d| (d, FanTimer::CountTick)),
        ];
        let sensor_timers = self.sensors.iter().enumerate().filter_map(|(i, s)| {
            s.next_deadline().map(|(d, which)| match which {
                SensorTimer::Method(_) => (d, FanTimer::Sensor(i)),
                SensorTimer::Error => (d, FanTimer::SensorError(i)),
            })
        });
        fan_timers.into_iter().flatten().chain(sensor_timers).min()
    }

    /// Fire one timer if it is due. Returns whether anything fired.
    pub fn fire(&mut self, timer: FanTimer, ctx: &mut Context<'_>) -> bool {
        let now = ctx.now_us;
        match timer {
            FanTimer::MonitorStart => {
                if !self.monitor_timer.take_expired(now) {
                    return false;
                }
                self.start_monitor(ctx);
            }
            FanTimer::FanMissing => {
                if !self.fan_missing_timer.take_expired(now) {
                    return false;
                }
                self.on_fan_missing_timer(ctx);
            }
            FanTimer::CountTick => {
                let fired = self
                    .count_timer
                    .as_mut()
                    .is_some_and(|t| t.take_expired(now));
                if !fired {
                    return false;
                }
                self.on_count_tick(ctx);
            }
            FanTimer::Sensor(index) => {
                let Some(mode) = self.sensors.get_mut(index).and_then(|s| s.take_timer(now))
                else {
                    return false;
                };
                self.on_sensor_timer(index, mode, ctx);
            }
            FanTimer::SensorError(index) => {
                let fired = self
                    .sensors
                    .get_mut(index)
                    .is_some_and(|s| s.take_error_timer(now));
                if !fired {
                    return false;
                }
                self.on_sensor_error_timer(index, ctx);
            }
        }
        true
    }

    pub fn status(&self) -> FanStatus {
        FanStatus {
            name: self.name.clone(),
            present: self.present,
            functional: self.functional,
            monitor_ready: self.monitor_ready,
            nonfunctional_sensors: self.count_nonfunctional_sensors(),
            sensors: self
                .sensors
                .iter()
                .enumerate()
                .map(|(i, s)| s.status(self.target_for(i)))
                .collect(),
        }
    }
}
