//! Bulk/Absorption/Float/Float-Transition/SoC-Reset state machine plus the
//! per-cell overvoltage penalty regulator. Grounded on
//! `battery.py::prepare_voltage_management`, `manage_charge_voltage_linear`,
//! `set_cvl_linear` and `manage_charge_voltage_step`.

use crate::aggregators::{any_cell_balancing, max_cell_voltage, min_cell_voltage, VoltageOverrides};
use crate::config::EngineConfig;
use crate::coulomb::trigger_soc_reset;
use crate::model::PackState;

const FLOAT_RAMP_V_PER_SEC: f64 = 0.001;
const MEASUREMENT_TOLERANCE_VARIATION: f64 = 0.5;

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Computes `(min_battery_voltage, max_battery_voltage, soc_reset_battery_voltage)`
/// and arms/disarms the periodic SoC-reset excursion. Grounded on
/// `prepare_voltage_management`.
fn prepare(state: &mut PackState, config: &EngineConfig, now: i64) -> (f64, f64, f64) {
    let days_ago = match state.soc_reset_last_reached {
        None => 0.0,
        Some(last) => (now - last) as f64 / 60.0 / 60.0 / 24.0,
    };

    if config.soc_reset_after_days > 0
        && !state.soc_reset_requested
        && state.allow_max_voltage
        && (state.soc_reset_last_reached.is_none()
            || (config.soc_reset_after_days as f64) < days_ago)
    {
        state.soc_reset_requested = true;
    }

    let soc_reset_battery_voltage = round2(config.soc_reset_voltage * state.cell_count as f64);
    let max_battery_voltage = if state.soc_reset_requested {
        soc_reset_battery_voltage
    } else {
        round2(config.max_cell_voltage * state.cell_count as f64)
    };
    let min_battery_voltage = round2(config.min_cell_voltage * state.cell_count as f64);

    state.max_battery_voltage = Some(max_battery_voltage);
    state.min_battery_voltage = Some(min_battery_voltage);

    (min_battery_voltage, max_battery_voltage, soc_reset_battery_voltage)
}

/// Commits a new CVL only once every `linear_recalculation_every` seconds.
fn set_cvl_linear(state: &mut PackState, config: &EngineConfig, now: i64, control_voltage: f64) -> bool {
    let elapsed = match state.linear_cvl_last_set {
        Some(last) => now - last,
        None => i64::MAX,
    };
    if config.linear_recalculation_every <= elapsed {
        state.control_voltage = Some(control_voltage);
        state.linear_cvl_last_set = Some(now);
        true
    } else {
        false
    }
}

pub fn manage_charge_voltage(
    state: &mut PackState,
    config: &EngineConfig,
    now: i64,
    overrides: &VoltageOverrides,
) {
    if !config.cvcm_enable {
        let max_battery_voltage = round3(config.max_cell_voltage * state.cell_count as f64);
        state.control_voltage = Some(max_battery_voltage);
        state.charge_mode = "Keep always max voltage".to_string();
        return;
    }
    if max_cell_voltage(state, overrides).is_none() || min_cell_voltage(state, overrides).is_none() {
        state.control_voltage = None;
        state.charge_mode = "--".to_string();
        return;
    }
    if config.linear_limitation_enable {
        manage_charge_voltage_linear(state, config, now, overrides);
    } else {
        manage_charge_voltage_step(state, config, now);
    }
}

fn manage_charge_voltage_linear(
    state: &mut PackState,
    config: &EngineConfig,
    now: i64,
    overrides: &VoltageOverrides,
) {
    let (min_battery_voltage, max_battery_voltage, soc_reset_battery_voltage) =
        prepare(state, config, now);

    let active_ceiling = if (max_battery_voltage - soc_reset_battery_voltage).abs() < f64::EPSILON {
        config.soc_reset_voltage
    } else {
        config.max_cell_voltage
    };

    let mut voltage_sum = 0.0;
    let mut penalty_sum = 0.0;
    let mut found_high_cell_voltage = false;
    for cell in &state.cells {
        if let Some(v) = cell.voltage {
            voltage_sum += v;
            if v > active_ceiling {
                found_high_cell_voltage = true;
                penalty_sum += v - active_ceiling;
            }
        }
    }

    let max_v = max_cell_voltage(state, overrides);
    let min_v = min_cell_voltage(state, overrides);
    let voltage_diff = match (max_v, min_v) {
        (Some(a), Some(b)) => a - b,
        _ => 0.0,
    };

    match state.max_voltage_start_time {
        None => {
            if max_battery_voltage <= voltage_sum
                && voltage_diff <= config.cell_voltage_diff_keep_max_voltage_until
                && state.allow_max_voltage
            {
                state.max_voltage_start_time = Some(now);
            } else if (config.soc_level_to_reset_voltage_limit > state.soc_calc.unwrap_or(0.0)
                || voltage_diff >= config.cell_voltage_diff_to_reset_voltage_limit)
                && !state.allow_max_voltage
            {
                state.allow_max_voltage = true;
            }
        }
        Some(mut start) => {
            if voltage_diff > config.cell_voltage_diff_keep_max_voltage_time_restart {
                start = now;
                state.max_voltage_start_time = Some(start);
            }
            let time_diff = now - start;
            if config.max_voltage_time_sec < time_diff {
                state.allow_max_voltage = false;
                state.max_voltage_start_time = None;
                if state.soc_calc.unwrap_or(0.0) <= config.soc_level_to_reset_voltage_limit {
                    tracing::error!(
                        soc_calc = state.soc_calc,
                        limit = config.soc_level_to_reset_voltage_limit,
                        "could not change to float voltage, SoC below reset limit"
                    );
                }
            }
            if voltage_sum < max_battery_voltage - MEASUREMENT_TOLERANCE_VARIATION {
                state.max_voltage_start_time = None;
            }
        }
    }

    let icontroller_ceiling = if state.soc_reset_requested {
        config.soc_reset_voltage
    } else {
        config.max_cell_voltage
    };
    let icontroller_voltage = if config.cvl_icontroller_mode {
        let raw = match state.control_voltage {
            Some(cv) => {
                cv - ((max_v.unwrap_or(icontroller_ceiling)
                    - icontroller_ceiling
                    - config.cell_voltage_diff_keep_max_voltage_until)
                    * config.cvl_icontroller_factor)
            }
            None => max_battery_voltage,
        };
        Some(raw.clamp(min_battery_voltage, max_battery_voltage))
    } else {
        None
    };

    if found_high_cell_voltage && state.allow_max_voltage {
        let cv = round3((voltage_sum - penalty_sum).clamp(min_battery_voltage, max_battery_voltage));
        if let Some(icv) = icontroller_voltage {
            state.control_voltage = Some(icv);
        } else {
            set_cvl_linear(state, config, now, cv);
        }
        state.charge_mode = if state.max_voltage_start_time.is_none() {
            "Bulk dynamic".to_string()
        } else {
            "Absorption dynamic".to_string()
        };
        if (max_battery_voltage - soc_reset_battery_voltage).abs() < f64::EPSILON {
            state.charge_mode.push_str(" & SoC Reset");
        }
    } else if state.allow_max_voltage {
        if let Some(icv) = icontroller_voltage {
            state.control_voltage = Some(icv);
        } else {
            state.control_voltage = Some(round3(max_battery_voltage));
        }
        state.charge_mode = if state.max_voltage_start_time.is_none() {
            "Bulk".to_string()
        } else {
            "Absorption".to_string()
        };
        if (max_battery_voltage - soc_reset_battery_voltage).abs() < f64::EPSILON {
            state.charge_mode.push_str(" & SoC Reset");
        }
    } else {
        let float_voltage = round3(config.float_cell_voltage * state.cell_count as f64);
        let mut charge_mode = String::from("Float");

        if state.soc_reset_requested {
            state.soc_reset_requested = false;
            state.soc_reset_last_reached = Some(now);
        }

        if let Some(cv) = state.control_voltage {
            if !state.charge_mode.starts_with("Float") {
                state.transition_start_time = Some(now);
                state.initial_control_voltage = Some(cv);
                charge_mode = "Float Transition".to_string();
                trigger_soc_reset(state);
            } else if state.charge_mode.starts_with("Float Transition") {
                let elapsed = now - state.transition_start_time.unwrap_or(now);
                let initial = state.initial_control_voltage.unwrap_or(cv);
                let reduction =
                    (FLOAT_RAMP_V_PER_SEC * elapsed as f64).min(initial - float_voltage);
                set_cvl_linear(state, config, now, initial - reduction);
                if state.control_voltage.unwrap_or(cv) <= float_voltage {
                    state.control_voltage = Some(float_voltage);
                    charge_mode = "Float".to_string();
                } else {
                    charge_mode = "Float Transition".to_string();
                }
            }
        } else {
            state.control_voltage = Some(float_voltage);
        }
        state.charge_mode = charge_mode;
    }

    if state.allow_max_voltage
        && any_cell_balancing(state)
        && voltage_diff >= config.cell_voltage_diff_to_reset_voltage_limit
    {
        state.charge_mode.push_str(" + Balancing");
    }
    state.charge_mode.push_str(" (Linear Mode)");
}

fn manage_charge_voltage_step(state: &mut PackState, config: &EngineConfig, now: i64) {
    let (_min_battery_voltage, max_battery_voltage, soc_reset_battery_voltage) =
        prepare(state, config, now);

    let mut voltage_sum = 0.0;
    for cell in &state.cells {
        if let Some(v) = cell.voltage {
            voltage_sum += v;
        }
    }

    match state.max_voltage_start_time {
        None => {
            if max_battery_voltage <= voltage_sum && state.allow_max_voltage {
                state.max_voltage_start_time = Some(now);
            } else if config.soc_level_to_reset_voltage_limit > state.soc_calc.unwrap_or(0.0)
                && !state.allow_max_voltage
            {
                state.allow_max_voltage = true;
            }
        }
        Some(start) => {
            let time_diff = now - start;
            if config.max_voltage_time_sec < time_diff {
                state.allow_max_voltage = false;
                state.max_voltage_start_time = None;
            }
        }
    }

    if state.allow_max_voltage {
        state.control_voltage = Some(max_battery_voltage);
        state.charge_mode = if state.max_voltage_start_time.is_none() {
            "Bulk".to_string()
        } else {
            "Absorption".to_string()
        };
        if (max_battery_voltage - soc_reset_battery_voltage).abs() < f64::EPSILON {
            state.charge_mode.push_str(" & SoC Reset");
        }
    } else {
        if !state.charge_mode.starts_with("Float") {
            trigger_soc_reset(state);
        }
        state.control_voltage = Some(config.float_cell_voltage * state.cell_count as f64);
        state.charge_mode = "Float".to_string();
        if state.soc_reset_requested {
            state.soc_reset_requested = false;
            state.soc_reset_last_reached = Some(now);
        }
    }
    state.charge_mode.push_str(" (Step Mode)");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Cell;

    fn config_for_scenarios() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.cell_count = 4;
        config.max_cell_voltage = 3.45;
        config.float_cell_voltage = 3.375;
        config.min_cell_voltage = 2.9;
        config.max_voltage_time_sec = 900;
        config
    }

    fn set_cells(state: &mut PackState, voltages: &[f64]) {
        state.cells = voltages
            .iter()
            .map(|v| Cell {
                voltage: Some(*v),
                balancing: None,
                temp: None,
            })
            .collect();
    }

    #[test]
    fn cvcm_disabled_keeps_always_max_voltage() {
        let mut config = config_for_scenarios();
        config.cvcm_enable = false;
        let mut state = PackState::new(4);
        set_cells(&mut state, &[3.30, 3.30, 3.30, 3.30]);
        manage_charge_voltage(&mut state, &config, 0, &VoltageOverrides::default());
        assert_eq!(state.charge_mode, "Keep always max voltage");
        assert!((state.control_voltage.unwrap() - 13.80).abs() < 1e-6);
    }

    #[test]
    fn scenario_a_balanced_bulk_charge() {
        let config = config_for_scenarios();
        let mut state = PackState::new(4);
        set_cells(&mut state, &[3.30, 3.30, 3.30, 3.30]);
        state.soc_calc = Some(50.0);
        manage_charge_voltage(&mut state, &config, 0, &VoltageOverrides::default());
        assert!(state.charge_mode.starts_with("Bulk"));
        assert!((state.control_voltage.unwrap() - 13.80).abs() < 1e-6);
    }

    #[test]
    fn scenario_c_penalty_regulation() {
        let config = config_for_scenarios();
        let mut state = PackState::new(4);
        set_cells(&mut state, &[3.50, 3.44, 3.44, 3.44]);
        state.soc_calc = Some(95.0);
        manage_charge_voltage(&mut state, &config, 0, &VoltageOverrides::default());
        assert!(state.charge_mode.starts_with("Bulk dynamic"));
        assert!((state.control_voltage.unwrap() - 13.77).abs() < 1e-3);
    }

    #[test]
    fn scenario_b_absorption_entry() {
        let config = config_for_scenarios();
        let mut state = PackState::new(4);
        set_cells(&mut state, &[3.45, 3.45, 3.45, 3.45]);
        state.soc_calc = Some(99.0);
        manage_charge_voltage(&mut state, &config, 0, &VoltageOverrides::default());
        assert_eq!(state.charge_mode, "Absorption (Linear Mode)");
        assert_eq!(state.max_voltage_start_time, Some(0));
    }

    #[test]
    fn scenario_d_float_transition_ramp() {
        let config = config_for_scenarios();
        let mut state = PackState::new(4);
        set_cells(&mut state, &[3.45, 3.45, 3.45, 3.45]);
        state.soc_calc = Some(99.0);
        state.control_voltage = Some(13.80);
        state.max_voltage_start_time = Some(0);
        state.allow_max_voltage = false;
        state.charge_mode = "Absorption".to_string();

        manage_charge_voltage(&mut state, &config, 10, &VoltageOverrides::default());
        assert_eq!(state.charge_mode, "Float Transition (Linear Mode)");

        manage_charge_voltage(&mut state, &config, 20, &VoltageOverrides::default());
        let expected = 13.80 - 0.001 * 10.0;
        assert!((state.control_voltage.unwrap() - expected).abs() < 1e-3);
    }

    #[test]
    fn penalty_regulation_is_monotonic_in_the_overshooting_cell() {
        let config = config_for_scenarios();
        let min_pack_v = config.min_cell_voltage * 4.0;

        let mut prev_cvl = f64::INFINITY;
        for overshoot in [0.01, 0.03, 0.05, 0.10] {
            let mut state = PackState::new(4);
            set_cells(&mut state, &[3.45 + overshoot, 3.44, 3.44, 3.44]);
            state.soc_calc = Some(95.0);
            state.allow_max_voltage = true;
            manage_charge_voltage(&mut state, &config, 0, &VoltageOverrides::default());
            let cvl = state.control_voltage.unwrap();
            assert!(cvl <= prev_cvl, "CVL should not rise as overshoot grows");
            assert!(cvl >= min_pack_v - 1e-9);
            prev_cvl = cvl;
        }
    }

    #[test]
    fn disconnect_latch_zeroes_are_handled_by_current_limiter_not_here() {
        // Voltage controller has no disconnect concept; left as documentation
        // that the invariant lives in current_limiter.rs.
    }
}
