//! ---
//! ct_section: "02-power-sensing"
//! ct_subsection: "tests"
//! ct_type: "source"
//! ct_scope: "code"
//! ct_description: "End-to-end sweeps against the simulated bench."
//! ct_version: "v0.1.0"
//! ct_owner: "tbd"
//! ---
use std::time::Duration;

use croc_common::config::{AppConfig, RailRole};
use croc_common::time::ManualClock;
use croc_power::registers::Register;
use croc_power::{
    roster_from_config, DeviceConfig, Ina228Driver, Operation, PowerError, PowerMonitor,
    RecordingDelay, SimulatedBus,
};

fn bench() -> SimulatedBus {
    populate(SimulatedBus::new())
}

fn populate(bus: SimulatedBus) -> SimulatedBus {
    bus.add_device(0x40, 0.015);
    bus.add_device(0x44, 0.0177186);
    bus.add_device(0x41, 0.015);
    bus
}

fn configured(bus: &SimulatedBus) -> PowerMonitor<SimulatedBus, RecordingDelay, ManualClock> {
    let mut monitor = PowerMonitor::new(bus.clone(), RecordingDelay::default(), ManualClock::default());
    let report = monitor
        .configure(DeviceConfig::reference_roster().unwrap())
        .unwrap();
    assert!(report.all_active());
    monitor
}

#[test]
fn reference_scenario_decodes_bus_voltages() {
    let bus = bench();
    let mut monitor = configured(&bus);
    bus.set_register(0x40, Register::BusVoltage, 0x03_2000);
    bus.set_register(0x44, Register::BusVoltage, 0x01_9800);
    bus.set_register(0x41, Register::BusVoltage, 0x02_8400);

    let sweep = monitor.sweep();
    assert!(sweep.is_complete());
    let volts: Vec<_> = sweep.measurements.iter().map(|m| m.bus_voltage_v).collect();
    let expected = [2.5, 1.275, 2.0125];
    for (actual, expected) in volts.iter().zip(expected) {
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }
    let addresses: Vec<_> = sweep.measurements.iter().map(|m| m.address).collect();
    assert_eq!(addresses, [0x40, 0x44, 0x41]);
}

#[test]
fn one_silent_device_does_not_abort_the_sweep() {
    let bus = bench();
    let mut monitor = configured(&bus);
    bus.set_rail(0x40, 14.0, 2.0);
    bus.set_rail(0x44, 13.0, 1.0);
    bus.set_rail(0x41, 5.0, 3.0);
    bus.disconnect(0x44);

    let sweep = monitor.sweep();
    let validity: Vec<_> = sweep.measurements.iter().map(|m| m.valid).collect();
    assert_eq!(validity, [true, false, true]);

    let battery = &sweep.measurements[1];
    let fault = battery.fault.as_ref().unwrap();
    assert_eq!(fault.operation, Some(Operation::ReadBusVoltage));
    assert!(fault.message.contains("0x44"));
    assert_eq!(battery.power_w, 0.0);

    let balance = sweep.balance.unwrap();
    assert!(!balance.valid);
    assert_eq!(balance.missing, [RailRole::Battery]);

    bus.reconnect(0x44);
    assert!(monitor.sweep().balance.unwrap().valid);
}

#[test]
fn calibration_register_round_trips() {
    let bus = bench();
    let mut driver = Ina228Driver::new(bus);
    for value in [0x0000u16, 0x0001, 1875, 2215, 0x7FFF, 0x8000, 0xFFFF] {
        driver.write_calibration(0x41, value).unwrap();
        assert_eq!(driver.read_calibration(0x41).unwrap(), value);
    }
}

#[test]
fn slow_device_times_out_without_blocking_others() {
    let clock = ManualClock::default();
    let bus = populate(SimulatedBus::with_clock(clock.clone()));
    let mut monitor = PowerMonitor::new(bus.clone(), RecordingDelay::default(), clock.clone())
        .with_read_budget(Some(Duration::from_millis(5)));
    monitor
        .configure(DeviceConfig::reference_roster().unwrap())
        .unwrap();
    bus.set_latency(0x40, Duration::from_millis(30));

    let sweep = monitor.sweep();
    assert!(!sweep.measurements[0].valid);
    assert!(sweep.measurements[1].valid);
    assert!(sweep.measurements[2].valid);
    let message = &sweep.measurements[0].fault.as_ref().unwrap().message;
    assert!(message.contains("budget"));
    assert_eq!(sweep.duration(), Duration::from_millis(30));
}

#[test]
fn configured_roster_balances_rails() {
    let config: AppConfig = r#"
        mode = "simulation"

        [sampling]
        settle_delay = 12

        [devices.solar]
        address = 0x40
        shunt_ohms = 0.015
        max_current_a = 5.0
        role = "solar"

        [devices.battery]
        address = 0x44
        shunt_ohms = 0.0177186
        max_current_a = 5.0
        role = "battery"

        [devices.load]
        address = 0x41
        shunt_ohms = 0.015
        max_current_a = 5.0
        role = "load"
    "#
    .parse()
    .unwrap();

    let bus = bench();
    let delay = RecordingDelay::default();
    let mut monitor = PowerMonitor::new(bus.clone(), delay.clone(), ManualClock::default())
        .with_sampling(&config.sampling);
    monitor
        .configure(roster_from_config(&config))
        .unwrap();
    assert_eq!(delay.total(), Duration::from_millis(36));

    bus.set_rail(0x40, 14.0, 2.0);
    bus.set_rail(0x44, 13.0, 1.0);
    bus.set_rail(0x41, 5.0, 3.0);
    let sweep = monitor.sweep();
    let balance = sweep.balance.as_ref().unwrap();
    assert!(balance.valid);
    assert!(balance.watts.abs() < 0.01, "balance {}", balance.watts);

    let solar = sweep.by_role(RailRole::Solar).unwrap();
    assert!((solar.power_w - solar.power_calc_w).abs() < 0.01);
    assert!(solar.is_plausible());
}

#[test]
fn miscalibrated_device_is_dropped_from_sweeps_only() {
    let config: AppConfig = r#"
        mode = "simulation"

        [devices.solar]
        address = 0x40
        shunt_ohms = 0.015
        max_current_a = 5.0
        role = "solar"

        [devices.bad]
        address = 0x44
        shunt_ohms = 1.0
        max_current_a = 5.0

        [devices.load]
        address = 0x41
        shunt_ohms = 0.015
        max_current_a = 5.0
        role = "load"
    "#
    .parse()
    .unwrap();

    let roster = roster_from_config(&config);
    assert!(matches!(
        roster[1].device,
        Err(PowerError::CalibrationFailed { .. })
    ));

    let bus = bench();
    let mut monitor = PowerMonitor::new(bus.clone(), RecordingDelay::default(), ManualClock::default());
    let report = monitor.configure(roster).unwrap();
    assert_eq!(report.active_count(), 2);
    assert_eq!(report.inactive().map(|s| s.address).collect::<Vec<_>>(), [0x44]);

    bus.set_rail(0x40, 14.0, 2.0);
    bus.set_rail(0x41, 5.0, 3.0);
    let sweep = monitor.sweep();
    let validity: Vec<_> = sweep.measurements.iter().map(|m| m.valid).collect();
    assert_eq!(validity, [true, false, true]);
    assert_eq!(bus.transactions(0x44), 0);
    assert!((sweep.measurements[0].bus_voltage_v - 14.0).abs() < 0.01);
}
