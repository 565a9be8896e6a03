//! Derived queries over [`PackState`]. Grounded on `battery.py`'s
//! `get_min_cell`/`get_max_cell`/`get_min_cell_voltage`/`get_max_cell_voltage`/
//! `get_midvoltage`/`get_balancing`/`get_temp` family.

use crate::model::PackState;

/// Per spec Design Note "balancing flag across drivers": some drivers
/// populate an aggregate min/max voltage directly rather than per-cell; a
/// direct-value override always wins over scanning the cell list, mirroring
/// the source's `cell_min_voltage`/`cell_max_voltage` fallback fields.
pub struct VoltageOverrides {
    pub min_cell_voltage: Option<f64>,
    pub max_cell_voltage: Option<f64>,
}

impl Default for VoltageOverrides {
    fn default() -> Self {
        Self {
            min_cell_voltage: None,
            max_cell_voltage: None,
        }
    }
}

pub fn min_cell_voltage(state: &PackState, overrides: &VoltageOverrides) -> Option<f64> {
    if let Some(v) = overrides.min_cell_voltage {
        return Some(v);
    }
    state
        .cells
        .iter()
        .filter_map(|c| c.voltage)
        .fold(None, |acc, v| match acc {
            None => Some(v),
            Some(min) => Some(min.min(v)),
        })
}

pub fn max_cell_voltage(state: &PackState, overrides: &VoltageOverrides) -> Option<f64> {
    if let Some(v) = overrides.max_cell_voltage {
        return Some(v);
    }
    state
        .cells
        .iter()
        .filter_map(|c| c.voltage)
        .fold(None, |acc, v| match acc {
            None => Some(v),
            Some(max) => Some(max.max(v)),
        })
}

pub fn min_cell_index(state: &PackState) -> Option<usize> {
    state
        .cells
        .iter()
        .enumerate()
        .filter_map(|(i, c)| c.voltage.map(|v| (i, v)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

pub fn max_cell_index(state: &PackState) -> Option<usize> {
    state
        .cells
        .iter()
        .enumerate()
        .filter_map(|(i, c)| c.voltage.map(|v| (i, v)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

pub fn cell_voltage_imbalance(state: &PackState, overrides: &VoltageOverrides) -> Option<f64> {
    match (
        max_cell_voltage(state, overrides),
        min_cell_voltage(state, overrides),
    ) {
        (Some(max), Some(min)) => Some(max - min),
        _ => None,
    }
}

pub fn any_cell_balancing(state: &PackState) -> bool {
    state.cells.iter().any(|c| c.balancing == Some(true))
}

/// Half-sum midpoint with odd-cell-count "extra" handling, matching
/// `get_midvoltage`: for an odd cell count, the middle cell's voltage is
/// folded half into each half-sum.
pub fn midpoint_voltage(state: &PackState) -> Option<(f64, f64)> {
    let voltages: Vec<f64> = state.cells.iter().filter_map(|c| c.voltage).collect();
    if voltages.len() < 2 {
        return None;
    }
    let half = voltages.len() / 2;
    let extra = if voltages.len() % 2 == 1 {
        voltages[half] / 2.0
    } else {
        0.0
    };
    let lower_sum: f64 = voltages[..half].iter().sum::<f64>() + extra;
    let upper_sum: f64 = voltages[voltages.len() - half..].iter().sum::<f64>() + extra;
    let midpoint = lower_sum;
    let total: f64 = voltages.iter().sum();
    if total <= 0.0 {
        return Some((midpoint, 0.0));
    }
    let deviation_percent = ((upper_sum - lower_sum) / total) * 100.0;
    Some((midpoint, deviation_percent))
}

/// Median of whatever temperature sensors are populated, used when no
/// specific `TEMP_BATTERY` sensor is configured. Supplemented from
/// `original_source/tinkerbms/battery.py::get_temp`, which the distilled spec
/// did not spell out explicitly.
pub fn median_temp(state: &PackState) -> Option<f64> {
    let mut temps: Vec<f64> = [state.temp1, state.temp2, state.temp3, state.temp4]
        .into_iter()
        .flatten()
        .collect();
    if temps.is_empty() {
        return None;
    }
    temps.sort_by(|a, b| a.total_cmp(b));
    let mid = temps.len() / 2;
    if temps.len() % 2 == 0 {
        Some((temps[mid - 1] + temps[mid]) / 2.0)
    } else {
        Some(temps[mid])
    }
}

pub fn max_temp(state: &PackState) -> Option<f64> {
    [state.temp1, state.temp2, state.temp3, state.temp4]
        .into_iter()
        .flatten()
        .fold(None, |acc, t| match acc {
            None => Some(t),
            Some(max) => Some(if t > max { t } else { max }),
        })
}

pub fn min_temp(state: &PackState) -> Option<f64> {
    [state.temp1, state.temp2, state.temp3, state.temp4]
        .into_iter()
        .flatten()
        .fold(None, |acc, t| match acc {
            None => Some(t),
            Some(min) => Some(if t < min { t } else { min }),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Cell;

    fn state_with_voltages(vs: &[f64]) -> PackState {
        let mut state = PackState::new(vs.len());
        for (cell, v) in state.cells.iter_mut().zip(vs) {
            *cell = Cell {
                voltage: Some(*v),
                balancing: None,
                temp: None,
            };
        }
        state
    }

    #[test]
    fn min_max_scan_cells_when_no_override() {
        let state = state_with_voltages(&[3.30, 3.45, 3.28]);
        let overrides = VoltageOverrides::default();
        assert_eq!(min_cell_voltage(&state, &overrides), Some(3.28));
        assert_eq!(max_cell_voltage(&state, &overrides), Some(3.45));
    }

    #[test]
    fn override_wins_over_cell_scan() {
        let state = state_with_voltages(&[3.30, 3.45, 3.28]);
        let overrides = VoltageOverrides {
            min_cell_voltage: Some(3.00),
            max_cell_voltage: Some(3.60),
        };
        assert_eq!(min_cell_voltage(&state, &overrides), Some(3.00));
        assert_eq!(max_cell_voltage(&state, &overrides), Some(3.60));
    }

    #[test]
    fn midpoint_even_cell_count() {
        let state = state_with_voltages(&[3.30, 3.32, 3.34, 3.36]);
        let (mid, dev) = midpoint_voltage(&state).unwrap();
        assert!((mid - 6.62).abs() < 1e-9);
        assert!(dev > 0.0);
    }

    #[test]
    fn median_temp_odd_count() {
        let mut state = PackState::new(0);
        state.temp1 = Some(20.0);
        state.temp2 = Some(30.0);
        state.temp3 = Some(25.0);
        assert_eq!(median_temp(&state), Some(25.0));
    }
}
