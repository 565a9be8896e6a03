//! Charge/discharge current limit merge, reason-string bookkeeping and
//! change-throttle. Grounded on `battery.py::manage_charge_current` and the
//! `calcMax{Charge,Discharge}CurrentReferringTo{CellVoltage,Temperature,Soc}`
//! family.

use crate::aggregators::{max_cell_voltage, max_temp, min_cell_voltage, min_temp, VoltageOverrides};
use crate::config::EngineConfig;
use crate::model::PackState;

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

fn calc_charge_current_cell_voltage(
    state: &PackState,
    config: &EngineConfig,
    overrides: &VoltageOverrides,
) -> f64 {
    let Some(v) = max_cell_voltage(state, overrides) else {
        return state
            .max_battery_charge_current
            .unwrap_or(config.max_battery_charge_current);
    };
    let result = if config.linear_limitation_enable {
        config.cell_voltages_while_charging.interpolate_linear(v)
    } else {
        config.cell_voltages_while_charging.interpolate_step(v, false)
    };
    result.unwrap_or_else(|err| {
        tracing::warn!(%err, "calcMaxChargeCurrentReferringToCellVoltage failed, using default");
        state
            .max_battery_charge_current
            .unwrap_or(config.max_battery_charge_current)
    })
}

/// Open Question 2: on failure this returns the *charge* ceiling, not the
/// discharge one — preserved verbatim from the source.
fn calc_discharge_current_cell_voltage(
    state: &PackState,
    config: &EngineConfig,
    overrides: &VoltageOverrides,
) -> f64 {
    let Some(v) = min_cell_voltage(state, overrides) else {
        return state
            .max_battery_charge_current
            .unwrap_or(config.max_battery_charge_current);
    };
    let result = if config.linear_limitation_enable {
        config.cell_voltages_while_discharging.interpolate_linear(v)
    } else {
        config.cell_voltages_while_discharging.interpolate_step(v, true)
    };
    result.unwrap_or_else(|err| {
        tracing::warn!(%err, "calcMaxDischargeCurrentReferringToCellVoltage failed, using default");
        state
            .max_battery_charge_current
            .unwrap_or(config.max_battery_charge_current)
    })
}

fn calc_charge_current_temperature(state: &PackState, config: &EngineConfig) -> f64 {
    let Some(hot) = max_temp(state) else {
        return state
            .max_battery_charge_current
            .unwrap_or(config.max_battery_charge_current);
    };
    let cold = min_temp(state).unwrap_or(hot);
    let eval = |t: f64| -> f64 {
        let curve = &config.temperatures_while_charging;
        let result = if config.linear_limitation_enable {
            curve.interpolate_linear(t)
        } else {
            curve.interpolate_step(t, false)
        };
        result.unwrap_or(config.max_battery_charge_current)
    };
    eval(hot).min(eval(cold))
}

fn calc_discharge_current_temperature(state: &PackState, config: &EngineConfig) -> f64 {
    let Some(hot) = max_temp(state) else {
        return state
            .max_battery_discharge_current
            .unwrap_or(config.max_battery_discharge_current);
    };
    let cold = min_temp(state).unwrap_or(hot);
    let eval = |t: f64| -> f64 {
        let curve = &config.temperatures_while_discharging;
        let result = if config.linear_limitation_enable {
            curve.interpolate_linear(t)
        } else {
            curve.interpolate_step(t, true)
        };
        result.unwrap_or(config.max_battery_discharge_current)
    };
    eval(hot).min(eval(cold))
}

fn calc_charge_current_soc(state: &PackState, config: &EngineConfig) -> f64 {
    let Some(soc) = state.soc_calc else {
        return state
            .max_battery_charge_current
            .unwrap_or(config.max_battery_charge_current);
    };
    let result = if config.linear_limitation_enable {
        config.soc_while_charging.interpolate_linear(soc)
    } else {
        config.soc_while_charging.interpolate_step(soc, true)
    };
    result.unwrap_or_else(|err| {
        tracing::warn!(%err, "calcMaxChargeCurrentReferringToSoc failed, using default");
        state
            .max_battery_charge_current
            .unwrap_or(config.max_battery_charge_current)
    })
}

fn calc_discharge_current_soc(state: &PackState, config: &EngineConfig) -> f64 {
    let Some(soc) = state.soc_calc else {
        return state
            .max_battery_discharge_current
            .unwrap_or(config.max_battery_discharge_current);
    };
    let result = if config.linear_limitation_enable {
        config.soc_while_discharging.interpolate_linear(soc)
    } else {
        config.soc_while_discharging.interpolate_step(soc, true)
    };
    result.unwrap_or_else(|err| {
        tracing::warn!(%err, "calcMaxDischargeCurrentReferringToSoc failed, using default");
        state
            .max_battery_discharge_current
            .unwrap_or(config.max_battery_discharge_current)
    })
}

/// A candidate limit paired with the reason label it would contribute, in
/// the source's "first-match concatenation" idiom: multiple reasons can tie
/// at the same minimum value and all get listed.
struct Candidate {
    value: f64,
    reason: &'static str,
}

fn pick_minimum(candidates: &[Candidate]) -> (f64, String) {
    let min_value = candidates
        .iter()
        .map(|c| c.value)
        .fold(f64::INFINITY, f64::min);
    let reason = candidates
        .iter()
        .filter(|c| (c.value - min_value).abs() < 1e-9)
        .map(|c| c.reason)
        .collect::<Vec<_>>()
        .join(", ");
    (min_value, reason)
}

pub fn manage_charge_current(
    state: &mut PackState,
    config: &EngineConfig,
    now: i64,
    overrides: &VoltageOverrides,
) {
    let mut charge_candidates = vec![Candidate {
        value: config.max_battery_charge_current,
        reason: "Max Battery Charge Current",
    }];
    if let Some(bms_limit) = state.max_battery_charge_current {
        if config.max_battery_charge_current > bms_limit {
            charge_candidates.push(Candidate {
                value: bms_limit,
                reason: "BMS Settings",
            });
        }
    }
    if config.cccm_cv_enable {
        charge_candidates.push(Candidate {
            value: calc_charge_current_cell_voltage(state, config, overrides),
            reason: "Cell Voltage",
        });
    }
    if config.cccm_t_enable {
        charge_candidates.push(Candidate {
            value: calc_charge_current_temperature(state, config),
            reason: "Temp",
        });
    }
    if config.cccm_soc_enable {
        charge_candidates.push(Candidate {
            value: calc_charge_current_soc(state, config),
            reason: "SoC",
        });
    }
    if state.charge_fet == Some(false) || state.block_because_disconnect {
        charge_candidates.push(Candidate {
            value: 0.0,
            reason: "BMS",
        });
    }

    let (ccl, charge_reason) = pick_minimum(&charge_candidates);
    let ccl = round3(ccl);
    let ccl_diff = match state.control_charge_current {
        Some(prev) => (prev - ccl).abs(),
        None => 0.0,
    };
    let ccl_elapsed = match state.linear_ccl_last_set {
        Some(last) => now - last,
        None => i64::MAX,
    };
    let ccl_pct_change = state
        .control_charge_current
        .map(|prev| prev * config.linear_recalculation_on_perc_change / 100.0)
        .unwrap_or(0.0);
    if ccl_elapsed >= config.linear_recalculation_every || ccl == 0.0 || ccl_diff >= ccl_pct_change {
        state.linear_ccl_last_set = Some(now);
        state.control_charge_current = Some(ccl);
        state.charge_limitation = charge_reason;
    }
    state.control_allow_charge = state.control_charge_current != Some(0.0);

    let mut discharge_candidates = vec![Candidate {
        value: config.max_battery_discharge_current,
        reason: "Max Battery Discharge Current",
    }];
    if let Some(bms_limit) = state.max_battery_discharge_current {
        if config.max_battery_discharge_current > bms_limit {
            discharge_candidates.push(Candidate {
                value: bms_limit,
                reason: "BMS Settings",
            });
        }
    }
    if config.dccm_cv_enable {
        discharge_candidates.push(Candidate {
            value: calc_discharge_current_cell_voltage(state, config, overrides),
            reason: "Cell Voltage",
        });
    }
    if config.dccm_t_enable {
        discharge_candidates.push(Candidate {
            value: calc_discharge_current_temperature(state, config),
            reason: "Temp",
        });
    }
    if config.dccm_soc_enable {
        discharge_candidates.push(Candidate {
            value: calc_discharge_current_soc(state, config),
            reason: "SoC",
        });
    }
    if state.discharge_fet == Some(false) || state.block_because_disconnect {
        discharge_candidates.push(Candidate {
            value: 0.0,
            reason: "BMS",
        });
    }

    let (dcl, discharge_reason) = pick_minimum(&discharge_candidates);
    let dcl = round3(dcl);
    let dcl_diff = match state.control_discharge_current {
        Some(prev) => (prev - dcl).abs(),
        None => 0.0,
    };
    let dcl_elapsed = match state.linear_dcl_last_set {
        Some(last) => now - last,
        None => i64::MAX,
    };
    let dcl_pct_change = state
        .control_discharge_current
        .map(|prev| prev * config.linear_recalculation_on_perc_change / 100.0)
        .unwrap_or(0.0);
    if dcl_elapsed >= config.linear_recalculation_every || dcl == 0.0 || dcl_diff >= dcl_pct_change {
        state.linear_dcl_last_set = Some(now);
        state.control_discharge_current = Some(dcl);
        state.discharge_limitation = discharge_reason;
    }
    state.control_allow_discharge = state.control_discharge_current != Some(0.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derating::Curve;
    use crate::model::Cell;

    fn config_with_temp_curve() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.temperatures_while_charging =
            Curve::new(vec![0.0, 15.0, 45.0, 55.0], vec![50.0, 100.0, 50.0, 0.0]);
        config.max_battery_charge_current = 100.0;
        config
    }

    #[test]
    fn scenario_f_overtemperature_derate() {
        let config = config_with_temp_curve();
        let mut state = PackState::new(4);
        state.temp1 = Some(55.0);
        state.charge_fet = Some(true);
        manage_charge_current(&mut state, &config, 0, &VoltageOverrides::default());
        assert_eq!(state.control_charge_current, Some(0.0));
        assert!(state.charge_limitation.contains("Temp"));
        assert!(!state.control_allow_charge);
    }

    #[test]
    fn disconnect_forces_zero_both_ways() {
        let config = EngineConfig::default();
        let mut state = PackState::new(4);
        state.block_because_disconnect = true;
        manage_charge_current(&mut state, &config, 0, &VoltageOverrides::default());
        assert_eq!(state.control_charge_current, Some(0.0));
        assert_eq!(state.control_discharge_current, Some(0.0));
        assert!(!state.control_allow_charge);
        assert!(!state.control_allow_discharge);
    }

    #[test]
    fn throttle_holds_subthreshold_change() {
        let config = EngineConfig::default();
        let mut state = PackState::new(4);
        state.cells = vec![
            Cell {
                voltage: Some(3.30),
                balancing: None,
                temp: None,
            };
            4
        ];
        state.soc_calc = Some(50.0);
        manage_charge_current(&mut state, &config, 0, &VoltageOverrides::default());
        let committed = state.control_charge_current;

        // Tiny voltage wiggle, same second: should not move CCL.
        state.cells[0].voltage = Some(3.301);
        manage_charge_current(&mut state, &config, 1, &VoltageOverrides::default());
        assert_eq!(state.control_charge_current, committed);
    }
}
