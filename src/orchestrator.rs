//! The per-tick sequence: refresh → validate → SoC → voltage → current →
//! publish. Grounded on `battery.py`'s `validate_data` bounds and the call
//! order its subclasses' main loop uses, plus `battery_model.rs`'s
//! `tick_once`/background-task shape for how the Rust side schedules it.

use crate::aggregators::{cell_voltage_imbalance, median_temp, min_cell_voltage, VoltageOverrides};
use crate::clock::MonotonicClock;
use crate::config::EngineConfig;
use crate::coulomb;
use crate::current_limiter;
use crate::driver::Driver;
use crate::error::EngineError;
use crate::model::{PackState, Publication};
use crate::voltage_controller;

pub struct Engine {
    pub state: PackState,
    pub config: EngineConfig,
    driver: Box<dyn Driver>,
    clock: Box<dyn MonotonicClock>,
    settled: bool,
}

impl Engine {
    pub fn new(config: EngineConfig, driver: Box<dyn Driver>, clock: Box<dyn MonotonicClock>) -> Self {
        let state = PackState::new(config.cell_count);
        Self {
            state,
            config,
            driver,
            clock,
            settled: false,
        }
    }

    /// Connects and reads static settings. Fatal (as a `TransportError`) if
    /// the driver never comes up; callers typically retry at the poll
    /// interval rather than treating this as fatal at startup.
    pub fn connect(&mut self) -> Result<(), EngineError> {
        if !self.driver.test_connection() {
            return Err(EngineError::Transport("driver connection failed".into()));
        }
        let settings = self
            .driver
            .get_settings()
            .ok_or_else(|| EngineError::Transport("driver returned no settings".into()))?;
        self.state.capacity = Some(settings.capacity_ah);
        self.state.hardware_version = Some(settings.hardware_version);
        self.state.max_battery_charge_current = settings.max_battery_charge_current;
        self.state.max_battery_discharge_current = settings.max_battery_discharge_current;
        self.state.min_battery_voltage = settings.min_battery_voltage;
        self.state.max_battery_voltage = settings.max_battery_voltage;
        self.settled = true;
        Ok(())
    }

    fn validate(&self) -> Result<(), EngineError> {
        if let Some(capacity) = self.state.capacity {
            if !(0.0..=1000.0).contains(&capacity) {
                return Err(EngineError::Validation(format!(
                    "capacity outside of thresholds (0..1000): {capacity}"
                )));
            }
        }
        if let Some(current) = self.state.current {
            if current.abs() > 1000.0 {
                return Err(EngineError::Validation(format!(
                    "current outside of thresholds (-1000..1000): {current}"
                )));
            }
        }
        if let Some(voltage) = self.state.voltage {
            if !(0.0..=100.0).contains(&voltage) {
                return Err(EngineError::Validation(format!(
                    "voltage outside of thresholds (0..100): {voltage}"
                )));
            }
        }
        if let Some(soc) = self.state.soc {
            if !(0.0..=100.0).contains(&soc) {
                return Err(EngineError::Validation(format!(
                    "soc outside of thresholds (0..100): {soc}"
                )));
            }
        }
        Ok(())
    }

    /// Runs one tick and returns the outward-facing snapshot. Never returns
    /// `Err` to the caller: every failure mode resolves to "publish safe
    /// defaults and keep ticking", per the error handling design.
    pub fn tick(&mut self) -> Publication {
        if !self.settled {
            if let Err(err) = self.connect() {
                tracing::warn!(%err, "driver not yet connected");
                self.state.init_values();
                self.state.block_because_disconnect = true;
                current_limiter::manage_charge_current(
                    &mut self.state,
                    &self.config,
                    self.clock.now_secs(),
                    &VoltageOverrides::default(),
                );
                return Publication::from(&self.state);
            }
        }

        if !self.driver.refresh_data(&mut self.state) {
            tracing::warn!("transport error refreshing telemetry, latching disconnect");
            self.state.init_values();
            self.state.block_because_disconnect = true;
            self.settled = false;
            current_limiter::manage_charge_current(
                &mut self.state,
                &self.config,
                self.clock.now_secs(),
                &VoltageOverrides::default(),
            );
            return Publication::from(&self.state);
        }

        if let Err(err) = self.validate() {
            tracing::warn!(%err, "discarding tick, holding previous limits");
            return Publication::from(&self.state);
        }

        let now = self.clock.now_secs();
        let overrides = VoltageOverrides::default();

        let min_v = min_cell_voltage(&self.state, &overrides);
        let pack_sum: f64 = self
            .state
            .cells
            .iter()
            .filter_map(|c| c.voltage)
            .sum();
        coulomb::update(&mut self.state, &self.config, now, min_v, pack_sum);

        voltage_controller::manage_charge_voltage(&mut self.state, &self.config, now, &overrides);

        // Only clear the disconnect latch once the current limiter has had a
        // tick where it could see it set to `true` (handled above on the
        // disconnected ticks themselves); a successful refresh means it's
        // genuinely no longer disconnected by the time the limiter runs.
        self.state.block_because_disconnect = false;
        current_limiter::manage_charge_current(&mut self.state, &self.config, now, &overrides);

        let imbalance = cell_voltage_imbalance(&self.state, &overrides).unwrap_or(0.0);
        tracing::debug!(
            mode = %self.state.charge_mode,
            cvl = ?self.state.control_voltage,
            ccl = ?self.state.control_charge_current,
            dcl = ?self.state.control_discharge_current,
            soc = ?self.state.soc_calc,
            imbalance,
            battery_temp = ?median_temp(&self.state),
            "tick complete"
        );

        Publication::from(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::driver::{DriverSettings, SimulatedBattery};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct ClockHandle(Arc<FakeClock>);
    impl MonotonicClock for ClockHandle {
        fn now_secs(&self) -> i64 {
            self.0.now_secs()
        }
    }

    fn test_engine() -> (Engine, Arc<FakeClock>) {
        let mut config = EngineConfig::default();
        config.cell_count = 4;
        config.capacity_ah = 100.0;
        let driver = Box::new(SimulatedBattery::new(4, 100.0));
        let clock = Arc::new(FakeClock::new(0));
        let engine = Engine::new(config, driver, Box::new(ClockHandle(clock.clone())));
        (engine, clock)
    }

    #[test]
    fn first_tick_connects_and_publishes() {
        let (mut engine, _clock) = test_engine();
        let publication = engine.tick();
        assert!(publication.control_charge_current.is_some());
        assert!(!publication.cell_voltages.is_empty());
    }

    /// A driver whose connection and refresh behavior is controlled from
    /// outside the engine, for exercising the disconnect/reconnect path.
    struct FlakyDriver {
        shared: Arc<AtomicBool>, // true = connected
    }

    impl Driver for FlakyDriver {
        fn test_connection(&mut self) -> bool {
            self.shared.load(Ordering::SeqCst)
        }

        fn get_settings(&mut self) -> Option<DriverSettings> {
            if !self.shared.load(Ordering::SeqCst) {
                return None;
            }
            Some(DriverSettings {
                hardware_version: "flaky-v1".to_string(),
                cell_count: 4,
                capacity_ah: 100.0,
                max_battery_charge_current: None,
                max_battery_discharge_current: None,
                min_battery_voltage: None,
                max_battery_voltage: None,
            })
        }

        fn refresh_data(&mut self, state: &mut PackState) -> bool {
            if !self.shared.load(Ordering::SeqCst) {
                return false;
            }
            for cell in &mut state.cells {
                cell.voltage = Some(3.30);
            }
            state.current = Some(1.0);
            state.capacity = Some(100.0);
            state.charge_fet = Some(true);
            state.discharge_fet = Some(true);
            true
        }
    }

    #[test]
    fn disconnect_latches_zero_limits_then_recovers() {
        let mut config = EngineConfig::default();
        config.cell_count = 4;
        config.capacity_ah = 100.0;
        let connected = Arc::new(AtomicBool::new(true));
        let driver = Box::new(FlakyDriver {
            shared: connected.clone(),
        });
        let clock = Arc::new(FakeClock::new(0));
        let mut engine = Engine::new(config, driver, Box::new(ClockHandle(clock.clone())));

        engine.tick();
        assert!(engine.state.control_allow_charge);

        connected.store(false, Ordering::SeqCst);
        let publication = engine.tick();
        assert_eq!(publication.control_charge_current, Some(0.0));
        assert_eq!(publication.control_discharge_current, Some(0.0));
        assert!(!publication.control_allow_charge);
        assert!(!publication.control_allow_discharge);
        assert!(engine.state.block_because_disconnect);

        connected.store(true, Ordering::SeqCst);
        clock.advance(1);
        engine.tick();
        assert!(engine.state.control_allow_charge);
    }
}
