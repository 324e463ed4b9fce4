//! ---
//! ct_section: "04-runtime"
//! ct_subsection: "module"
//! ct_type: "source"
//! ct_scope: "code"
//! ct_description: "Simulated three-rail bench driving the daemon in simulation mode."
//! ct_version: "v0.1.0"
//! ct_owner: "tbd"
//! ---
use std::f64::consts::PI;
use std::time::Duration;

use anyhow::{Context, Result};
use croc_common::config::{AppConfig, RailRole};
use croc_power::SimulatedBus;
use rand::prelude::*;
use rand_distr::Normal;

/// Length of the synthetic solar day.
const DAY: Duration = Duration::from_secs(600);

/// Populates a [`SimulatedBus`] from the roster and moves its rails over time:
/// a solar panel following a compressed day, a load with noise, and a battery
/// absorbing the difference.
pub struct SimulatedBench {
    bus: SimulatedBus,
    rails: Vec<(u8, Option<RailRole>)>,
    rng: StdRng,
    noise: Normal<f64>,
    elapsed: Duration,
}

impl SimulatedBench {
    pub fn from_config(config: &AppConfig, seed: u64) -> Result<Self> {
        let bus = SimulatedBus::new();
        let mut rails = Vec::with_capacity(config.devices.len());
        for settings in config.devices.values() {
            bus.add_device(settings.address, settings.shunt_ohms);
            rails.push((settings.address, settings.role));
        }
        let noise = Normal::new(0.0, 0.02).context("invalid bench noise distribution")?;
        let mut bench = Self {
            bus,
            rails,
            rng: StdRng::seed_from_u64(seed),
            noise,
            elapsed: Duration::ZERO,
        };
        bench.apply();
        Ok(bench)
    }

    pub fn bus(&self) -> SimulatedBus {
        self.bus.clone()
    }

    /// Advance simulated time, integrating the accumulators over `dt`.
    pub fn step(&mut self, dt: Duration) {
        self.bus.advance(dt);
        self.elapsed += dt;
        self.apply();
    }

    fn jitter(&mut self, scale: f64) -> f64 {
        1.0 + self.noise.sample(&mut self.rng) * scale
    }

    fn apply(&mut self) {
        let phase = self.elapsed.as_secs_f64() / DAY.as_secs_f64();
        let sun = (2.0 * PI * phase).sin().max(0.0);
        let solar_v = if sun > 0.0 { 16.0 + 4.0 * sun } else { 0.4 };
        let solar_a = 2.5 * sun * self.jitter(1.0);
        let load_v = 5.0 * self.jitter(0.1);
        let load_a = (0.35 * self.jitter(2.0)).max(0.0);
        let battery_v = 3.7 + 0.4 * sun;
        let battery_a = if battery_v > 0.0 {
            (solar_v * solar_a - load_v * load_a) / battery_v
        } else {
            0.0
        };

        for index in 0..self.rails.len() {
            let (address, role) = self.rails[index];
            let (volts, amps) = match role {
                Some(RailRole::Solar) => (solar_v, solar_a),
                Some(RailRole::Battery) => (battery_v, battery_a),
                Some(RailRole::Load) => (load_v, load_a),
                None => (3.3 * self.jitter(0.1), 0.05 * self.jitter(1.0)),
            };
            self.bus.set_rail(address, volts, amps);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use croc_power::registers::Register;

    #[test]
    fn bench_registers_every_roster_device() {
        let bench = SimulatedBench::from_config(&AppConfig::reference(), 7).unwrap();
        let bus = bench.bus();
        for address in [0x40, 0x44, 0x41] {
            assert_eq!(bus.register(address, Register::DeviceId), Some(0x2281));
            assert!(bus.rail(address).is_some());
        }
    }

    #[test]
    fn battery_absorbs_solar_surplus() {
        let mut bench = SimulatedBench::from_config(&AppConfig::reference(), 7).unwrap();
        bench.step(DAY / 4);
        let bus = bench.bus();
        let power = |address| {
            let rail = bus.rail(address).unwrap();
            rail.bus_voltage_v * rail.current_a
        };
        let balance = power(0x40) - power(0x44) - power(0x41);
        assert!(balance.abs() < 1e-9);
        assert!(power(0x44) > 0.0);
    }
}
