//! The narrow inward boundary every BMS implementation satisfies, plus a
//! deterministic in-process simulator that stands in for a real transport
//! driver in this implementation (no physical transport is targeted here).
//! Grounded on `battery.py`'s abstract method surface
//! (`test_connection`/`get_settings`/`refresh_data`/`use_callback`, the four
//! default-stub callbacks) generalized per the spec Design Note
//! "inheritance → capability interface", and on the trait-object driver
//! field pattern in `other_examples/...rhernaus-phaeton__src-driver.rs`.

use crate::model::{PackState, TriState};

/// Settings read once after a successful connection.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub hardware_version: String,
    pub cell_count: usize,
    pub capacity_ah: f64,
    pub max_battery_charge_current: Option<f64>,
    pub max_battery_discharge_current: Option<f64>,
    pub min_battery_voltage: Option<f64>,
    pub max_battery_voltage: Option<f64>,
}

/// Every BMS implementation satisfies this trait; the engine holds a
/// `Box<dyn Driver>` and never assumes a concrete transport.
pub trait Driver: Send {
    fn test_connection(&mut self) -> bool;

    fn get_settings(&mut self) -> Option<DriverSettings>;

    /// Refreshes live telemetry into `state`. Returns `false` on a transport
    /// failure (the orchestrator treats this as a `TransportError`).
    fn refresh_data(&mut self, state: &mut PackState) -> bool;

    /// Optional hook for push-mode BMSes that deliver data via callback
    /// rather than polling; the default (pull-mode) driver does not need it.
    fn use_callback(&mut self) -> bool {
        false
    }

    /// Four default-stub callbacks, matching the source's always-`False`
    /// overridable hooks. A concrete driver overrides the ones its hardware
    /// actually supports.
    fn force_charging_off(&mut self) -> bool {
        false
    }

    fn force_discharging_off(&mut self) -> bool {
        false
    }

    fn turn_balancing_off(&mut self) -> bool {
        false
    }

    fn reset_soc(&mut self, _percent: f64) -> bool {
        false
    }
}

// Static thresholds the simulator derives `Protection` from. A real driver
// would read these off the hardware's own alarm registers; this one just
// exercises the field end-to-end.
const SIM_VOLTAGE_HIGH_WARN: f64 = 3.45;
const SIM_VOLTAGE_HIGH_ALARM: f64 = 3.60;
const SIM_VOLTAGE_LOW_WARN: f64 = 2.90;
const SIM_VOLTAGE_LOW_ALARM: f64 = 2.70;
const SIM_TEMP_HIGH_CHARGE_WARN: f64 = 45.0;
const SIM_TEMP_HIGH_CHARGE_ALARM: f64 = 55.0;

/// Deterministic simulated pack used by the binary and integration tests.
/// Produces plausible telemetry that drifts with injected current, standing
/// in for a real transport driver.
pub struct SimulatedBattery {
    cell_count: usize,
    capacity_ah: f64,
    cell_voltage: f64,
    current: f64,
    temp: f64,
    connected: bool,
}

impl SimulatedBattery {
    pub fn new(cell_count: usize, capacity_ah: f64) -> Self {
        Self {
            cell_count,
            capacity_ah,
            cell_voltage: 3.30,
            current: 5.0,
            temp: 25.0,
            connected: true,
        }
    }

    /// Test/demo hook: inject a pack-wide current for the next refresh.
    pub fn set_current(&mut self, current: f64) {
        self.current = current;
    }

    pub fn set_cell_voltage(&mut self, voltage: f64) {
        self.cell_voltage = voltage;
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl Driver for SimulatedBattery {
    fn test_connection(&mut self) -> bool {
        self.connected
    }

    fn get_settings(&mut self) -> Option<DriverSettings> {
        if !self.connected {
            return None;
        }
        Some(DriverSettings {
            hardware_version: "simulated-v1".to_string(),
            cell_count: self.cell_count,
            capacity_ah: self.capacity_ah,
            max_battery_charge_current: None,
            max_battery_discharge_current: None,
            min_battery_voltage: None,
            max_battery_voltage: None,
        })
    }

    fn refresh_data(&mut self, state: &mut PackState) -> bool {
        if !self.connected {
            return false;
        }
        for cell in &mut state.cells {
            cell.voltage = Some(self.cell_voltage);
            cell.balancing = Some(false);
        }
        state.voltage = Some(self.cell_voltage * self.cell_count as f64);
        state.current = Some(self.current);
        state.temp1 = Some(self.temp);
        state.capacity = Some(self.capacity_ah);
        state.charge_fet = Some(true);
        state.discharge_fet = Some(true);
        state.balance_fet = Some(true);

        state.protection.voltage_high = if self.cell_voltage >= SIM_VOLTAGE_HIGH_ALARM {
            TriState::Alarm
        } else if self.cell_voltage >= SIM_VOLTAGE_HIGH_WARN {
            TriState::Warning
        } else {
            TriState::Ok
        };
        state.protection.voltage_low = if self.cell_voltage <= SIM_VOLTAGE_LOW_ALARM {
            TriState::Alarm
        } else if self.cell_voltage <= SIM_VOLTAGE_LOW_WARN {
            TriState::Warning
        } else {
            TriState::Ok
        };
        state.protection.temp_high_charge = if self.temp >= SIM_TEMP_HIGH_CHARGE_ALARM {
            TriState::Alarm
        } else if self.temp >= SIM_TEMP_HIGH_CHARGE_WARN {
            TriState::Warning
        } else {
            TriState::Ok
        };

        true
    }
}
