//! Chassis-level owner of every monitored fan.
//!
//! `Monitor` is the plain mutating entry point an external dispatcher calls
//! for each delivered event. It holds the chassis power state and the
//! collaborators, lends them to a fan for the length of one callback, and
//! runs due timers in deadline order.

use crate::definition::FanDefinition;
use crate::error::DefinitionError;
use crate::fan::{Fan, FanTimer};
use crate::status::FanStatus;
use crate::system::{Context, Coordinator, Inventory, PropertySource};
use crate::trust::TrustEvaluator;
use log::{debug, info};
use std::collections::HashMap;

pub struct Monitor<S, I, C, T>
where
    S: PropertySource,
    I: Inventory,
    C: Coordinator,
    T: TrustEvaluator,
{
    fans: Vec<Fan>,
    fan_index: HashMap<String, usize>,
    sensor_index: HashMap<String, (usize, usize)>,
    power_on: bool,
    source: S,
    inventory: I,
    coordinator: C,
    trust: T,
}

macro_rules! with_fan {
    ($monitor:expr, $index:expr, $now:expr, |$fan:ident, $ctx:ident| $body:expr) => {{
        let Monitor {
            fans,
            power_on,
            source,
            inventory,
            coordinator,
            trust,
            ..
        } = $monitor;
        let mut $ctx = Context {
            now_us: $now,
            power_on: *power_on,
            source: &*source,
            trust: &*trust,
            inventory,
            coordinator,
        };
        let $fan = &mut fans[$index];
        $body
    }};
}

impl<S, I, C, T> Monitor<S, I, C, T>
where
    S: PropertySource,
    I: Inventory,
    C: Coordinator,
    T: TrustEvaluator,
{
    /// Build every fan from its definition and publish the starting state.
    pub fn new(
        definitions: &[FanDefinition],
        power_on: bool,
        source: S,
        inventory: I,
        coordinator: C,
        trust: T,
        now_us: u64,
    ) -> Result<Self, DefinitionError> {
        let mut fans = Vec::with_capacity(definitions.len());
        let mut fan_index = HashMap::new();
        let mut sensor_index = HashMap::new();

        for (fi, def) in definitions.iter().enumerate() {
            let fan = Fan::new(def)?;
            if fan_index.insert(def.name.clone(), fi).is_some() {
                return Err(DefinitionError::DuplicateFan(def.name.clone()));
            }
            for (si, sensor) in def.sensors.iter().enumerate() {
                if sensor_index.insert(sensor.name.clone(), (fi, si)).is_some() {
                    return Err(DefinitionError::DuplicateSensor(sensor.name.clone()));
                }
            }
            fans.push(fan);
        }

        let mut monitor = Self {
            fans,
            fan_index,
            sensor_index,
            power_on,
            source,
            inventory,
            coordinator,
            trust,
        };
        for index in 0..monitor.fans.len() {
            with_fan!(&mut monitor, index, now_us, |fan, ctx| fan.initialize(&mut ctx));
        }
        info!(
            "Monitoring {} fans, power {}",
            monitor.fans.len(),
            if power_on { "on" } else { "off" }
        );
        Ok(monitor)
    }

    pub fn power_on(&self) -> bool {
        self.power_on
    }

    pub fn fans(&self) -> &[Fan] {
        &self.fans
    }

    pub fn fan(&self, name: &str) -> Option<&Fan> {
        self.fan_index.get(name).map(|&i| &self.fans[i])
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn inventory(&self) -> &I {
        &self.inventory
    }

    pub fn coordinator(&self) -> &C {
        &self.coordinator
    }

    pub fn trust_mut(&mut self) -> &mut T {
        &mut self.trust
    }

    pub fn status(&self) -> Vec<FanStatus> {
        self.fans.iter().map(Fan::status).collect()
    }

    pub fn on_tach_changed(&mut self, sensor: &str, value: f64, now_us: u64) {
        let Some(&(fi, si)) = self.sensor_index.get(sensor) else {
            debug!("Ignoring tach change for unmonitored sensor {}", sensor);
            return;
        };
        with_fan!(self, fi, now_us, |fan, ctx| fan.on_tach_changed(si, value, &mut ctx));
    }

    pub fn on_target_changed(&mut self, sensor: &str, target: u64, now_us: u64) {
        let Some(&(fi, si)) = self.sensor_index.get(sensor) else {
            debug!("Ignoring target change for unmonitored sensor {}", sensor);
            return;
        };
        with_fan!(self, fi, now_us, |fan, ctx| fan.on_target_changed(si, target, &mut ctx));
    }

    pub fn on_presence_changed(&mut self, fan: &str, present: bool, now_us: u64) {
        let Some(&fi) = self.fan_index.get(fan) else {
            debug!("Ignoring presence change for unmonitored fan {}", fan);
            return;
        };
        with_fan!(self, fi, now_us, |fan, ctx| fan.on_presence_changed(present, &mut ctx));
    }

    pub fn on_power_state_changed(&mut self, power_on: bool, now_us: u64) {
        if power_on == self.power_on {
            debug!("Power state already {}", power_on);
            return;
        }
        self.power_on = power_on;
        info!("Power state changed to {}", if power_on { "on" } else { "off" });
        for index in 0..self.fans.len() {
            with_fan!(self, index, now_us, |fan, ctx| fan
                .on_power_state_changed(power_on, &mut ctx));
        }
    }

    /// Re-run the fan-level aggregate for one fan.
    pub fn update_functional_aggregate(&mut self, fan: &str, now_us: u64) {
        if let Some(&fi) = self.fan_index.get(fan) {
            with_fan!(self, fi, now_us, |fan, ctx| fan
                .update_functional_aggregate(&mut ctx));
        }
    }

    fn next_timer(&self) -> Option<(u64, usize, FanTimer)> {
        self.fans
            .iter()
            .enumerate()
            .filter_map(|(i, fan)| fan.next_deadline().map(|(d, t)| (d, i, t)))
            .min()
    }

    /// Earliest deadline across every fan, for the event loop to sleep on.
    pub fn next_deadline(&self) -> Option<u64> {
        self.next_timer().map(|(deadline, _, _)| deadline)
    }

    /// Fire every timer due at `now_us`, earliest first. Timers re-armed by a
    /// callback are picked up in the same pass if they are already due.
    pub fn run_expired(&mut self, now_us: u64) -> usize {
        let mut fired = 0;
        while let Some((deadline, fi, timer)) = self.next_timer() {
            if deadline > now_us {
                break;
            }
            let ran = with_fan!(self, fi, now_us, |fan, ctx| fan.fire(timer, &mut ctx));
            if !ran {
                break;
            }
            fired += 1;
        }
        fired
    }
}
