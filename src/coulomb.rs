//! Coulomb counter and end-point (100 %/0 %) snap recalibration. Grounded on
//! `battery.py::soc_calculation`; preserves Open Questions 1 and 3 verbatim
//! (see `DESIGN.md`).

use crate::config::EngineConfig;
use crate::model::PackState;

fn calc_linear_relationship(value: f64, reported: f64, measured: f64) -> f64 {
    if reported == 0.0 {
        return value;
    }
    value * (measured / reported)
}

/// Forces the coulomb accumulator to assume the pack just reached 100 %.
/// Called when the voltage controller enters Float Transition, under the
/// same assumption the source states directly in a comment: "Assume battery
/// SOC is 100% at this stage".
pub fn trigger_soc_reset(state: &mut PackState) {
    if let Some(capacity) = state.capacity {
        state.soc_calc_capacity_remain = Some(capacity);
        state.soc_calc = Some(100.0);
    }
}

/// Runs one tick of coulomb integration plus endpoint-snap checks.
/// `now` is the monotonic second count from `MonotonicClock::now_secs`;
/// `min_cell_voltage`/`pack_voltage_sum` are the already-computed aggregates
/// from `crate::aggregators` for this tick.
pub fn update(
    state: &mut PackState,
    config: &EngineConfig,
    now: i64,
    min_cell_voltage: Option<f64>,
    pack_voltage_sum: f64,
) {
    if !config.soc_calculation {
        state.soc_calc = state.soc;
        return;
    }

    let capacity = state.capacity.unwrap_or(config.capacity_ah);
    let current = state.current.unwrap_or(0.0);

    if let Some(mut remain) = state.soc_calc_capacity_remain {
        let current_corrected = (calc_linear_relationship(
            current,
            config.soc_calc_current_reported_by_bms,
            config.soc_calc_current_measured_by_user,
        ) * 100.0)
            .round()
            / 100.0;

        let last = state.soc_calc_capacity_remain_lasttime.unwrap_or(now);
        let dt_secs = (now - last) as f64;
        remain += current_corrected * dt_secs / 3600.0;
        remain = remain.clamp(0.0, capacity);
        state.soc_calc_capacity_remain_lasttime = Some(now);

        let max_battery_voltage = state
            .max_battery_voltage
            .unwrap_or(config.max_cell_voltage * state.cell_count as f64);

        // Full-endpoint check: only while sitting near the top rail.
        if let Some(min_v) = min_cell_voltage {
            if min_v > config.max_cell_voltage * 0.99 {
                let holding = current < config.soc_reset_current
                    && max_battery_voltage - config.voltage_drop <= pack_voltage_sum
                    && state.soc_calc_reset_starttime.is_some();
                if holding {
                    let start = state.soc_calc_reset_starttime.unwrap();
                    if now - start > config.soc_reset_time && remain != capacity {
                        tracing::info!("SOC set to 100%");
                        remain = capacity;
                    }
                } else {
                    // Open Question 3: reset the dwell clock on every failing
                    // tick, not only on a qualitative state change.
                    state.soc_calc_reset_starttime = Some(now);
                }
            }

            // Empty-endpoint check: only while sitting near the bottom rail.
            if min_v < config.min_cell_voltage * 1.01 {
                let holding = current < config.soc_reset_current
                    && min_v - (config.voltage_drop / state.cell_count as f64)
                        <= config.min_cell_voltage
                    && state.soc_calc_reset_starttime.is_some();
                if holding {
                    let start = state.soc_calc_reset_starttime.unwrap();
                    if now - start > config.soc_reset_time && remain != 0.0 {
                        tracing::info!("SOC set to 0%");
                        remain = 0.0;
                    }
                } else {
                    state.soc_calc_reset_starttime = Some(now);
                }
            }
        }

        state.soc_calc_capacity_remain = Some(remain);
    } else {
        // Initialization: no coulomb accumulator yet.
        let remain = if state.soc_calc.is_none() {
            if let Some(reported) = state.soc {
                tracing::info!(soc = reported, "SOC initialized from BMS");
                capacity * reported / 100.0
            } else {
                tracing::info!("SOC initialized and set to 100%");
                capacity
            }
        } else {
            // Open Question 1: guards on the BMS-reported `soc`, not the
            // persisted `soc_calc`, even though `soc_calc` is what's used.
            let soc_calc = state.soc_calc.unwrap();
            if state.soc.unwrap_or(0.0) > 0.0 {
                capacity * soc_calc / 100.0
            } else {
                0.0
            }
        };
        state.soc_calc_capacity_remain = Some(remain);
        state.soc_calc_capacity_remain_lasttime = Some(now);
    }

    let remain = state.soc_calc_capacity_remain.unwrap_or(0.0);
    let pct = ((remain / capacity) * 100.0).clamp(0.0, 100.0);
    state.soc_calc = Some((pct * 100.0).round() / 100.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PackState;

    fn base_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.cell_count = 4;
        config.capacity_ah = 100.0;
        config
    }

    #[test]
    fn seeds_from_bms_reported_soc() {
        let config = base_config();
        let mut state = PackState::new(4);
        state.capacity = Some(100.0);
        state.soc = Some(80.0);
        update(&mut state, &config, 0, None, 0.0);
        assert_eq!(state.soc_calc_capacity_remain, Some(80.0));
        assert_eq!(state.soc_calc, Some(80.0));
    }

    #[test]
    fn coulomb_round_trip_is_neutral() {
        let config = base_config();
        let mut state = PackState::new(4);
        state.capacity = Some(100.0);
        state.soc = Some(50.0);
        state.current = Some(0.0);
        update(&mut state, &config, 0, None, 0.0);

        state.current = Some(10.0);
        update(&mut state, &config, 3600, None, 0.0);
        let after_charge = state.soc_calc_capacity_remain.unwrap();

        state.current = Some(-10.0);
        update(&mut state, &config, 7200, None, 0.0);
        let after_discharge = state.soc_calc_capacity_remain.unwrap();

        assert!((after_discharge - 50.0).abs() < 1e-6);
        assert!(after_charge > after_discharge);
    }

    #[test]
    fn full_snap_requires_sustained_dwell() {
        let mut config = base_config();
        config.soc_reset_time = 10;
        config.max_cell_voltage = 3.45;
        let mut state = PackState::new(4);
        state.capacity = Some(100.0);
        state.soc_calc_capacity_remain = Some(92.0);
        state.soc_calc_capacity_remain_lasttime = Some(0);
        state.max_battery_voltage = Some(13.80);
        state.current = Some(1.0);

        // First qualifying tick only arms the dwell timer.
        update(&mut state, &config, 1, Some(3.43), 13.82);
        assert!((state.soc_calc_capacity_remain.unwrap() - 92.0).abs() < 0.01);

        // After the dwell elapses while still qualifying, it snaps to full.
        update(&mut state, &config, 12, Some(3.43), 13.82);
        assert_eq!(state.soc_calc_capacity_remain, Some(100.0));
    }

    #[test]
    fn disabled_soc_calculation_mirrors_reported_soc() {
        let mut config = base_config();
        config.soc_calculation = false;
        let mut state = PackState::new(4);
        state.soc = Some(42.0);
        update(&mut state, &config, 0, None, 0.0);
        assert_eq!(state.soc_calc, Some(42.0));
    }
}
