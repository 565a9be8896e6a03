//! Engine configuration. Every field carries a `#[serde(default = "...")]`
//! fallback matching the reference implementation's `config.default.ini`
//! values, following the per-field default-function idiom used by
//! `battery_model.rs`'s `BatteryModelConfig`/`CapacityEstimationConfig`.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::derating::Curve;
use crate::error::EngineError;

fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_min_cell_voltage() -> f64 {
    2.9
}
fn default_max_cell_voltage() -> f64 {
    3.45
}
fn default_float_cell_voltage() -> f64 {
    3.375
}
fn default_soc_reset_voltage() -> f64 {
    3.45
}
fn default_max_voltage_time_sec() -> i64 {
    900
}
fn default_soc_level_to_reset_voltage_limit() -> f64 {
    90.0
}
fn default_soc_reset_after_days() -> i64 {
    0
}
fn default_soc_reset_time() -> i64 {
    900
}
fn default_soc_reset_current() -> f64 {
    5.0
}
fn default_cell_voltage_diff_keep_max_until() -> f64 {
    0.055
}
fn default_cell_voltage_diff_keep_max_restart() -> f64 {
    0.130
}
fn default_cell_voltage_diff_to_reset_limit() -> f64 {
    0.020
}
fn default_voltage_drop() -> f64 {
    0.0
}
fn default_linear_recalculation_every() -> i64 {
    60
}
fn default_linear_recalculation_on_perc_change() -> f64 {
    5.0
}
fn default_cvl_icontroller_factor() -> f64 {
    0.5
}
fn default_max_battery_charge_current() -> f64 {
    100.0
}
fn default_max_battery_discharge_current() -> f64 {
    100.0
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_cell_count() -> usize {
    4
}
fn default_capacity() -> f64 {
    100.0
}
fn default_soc_calc_current_reported() -> f64 {
    0.0
}
fn default_soc_calc_current_measured() -> f64 {
    0.0
}

fn default_cv_curve() -> Curve {
    Curve::new(vec![2.9, 3.2, 3.45], vec![0.0, 100.0, 100.0])
}
fn default_dcv_curve() -> Curve {
    Curve::new(vec![2.9, 3.2, 3.45], vec![0.0, 100.0, 100.0])
}
fn default_temp_charge_curve() -> Curve {
    Curve::new(vec![0.0, 15.0, 45.0, 55.0], vec![50.0, 100.0, 50.0, 0.0])
}
fn default_temp_discharge_curve() -> Curve {
    Curve::new(vec![-20.0, 0.0, 45.0, 60.0], vec![0.0, 100.0, 100.0, 0.0])
}
fn default_soc_charge_curve() -> Curve {
    Curve::new(vec![0.0, 10.0, 100.0], vec![0.0, 100.0, 100.0])
}
fn default_soc_discharge_curve() -> Curve {
    Curve::new(vec![0.0, 10.0, 100.0], vec![100.0, 100.0, 100.0])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_cell_count")]
    pub cell_count: usize,
    #[serde(default = "default_capacity")]
    pub capacity_ah: f64,

    #[serde(default = "default_true")]
    pub soc_calculation: bool,
    #[serde(default = "default_true")]
    pub cvcm_enable: bool,
    #[serde(default = "default_true")]
    pub linear_limitation_enable: bool,
    #[serde(default = "default_false")]
    pub cvl_icontroller_mode: bool,
    #[serde(default = "default_cvl_icontroller_factor")]
    pub cvl_icontroller_factor: f64,

    #[serde(default = "default_min_cell_voltage")]
    pub min_cell_voltage: f64,
    #[serde(default = "default_max_cell_voltage")]
    pub max_cell_voltage: f64,
    #[serde(default = "default_float_cell_voltage")]
    pub float_cell_voltage: f64,
    #[serde(default = "default_soc_reset_voltage")]
    pub soc_reset_voltage: f64,

    #[serde(default = "default_max_voltage_time_sec")]
    pub max_voltage_time_sec: i64,
    #[serde(default = "default_soc_level_to_reset_voltage_limit")]
    pub soc_level_to_reset_voltage_limit: f64,
    #[serde(default = "default_soc_reset_after_days")]
    pub soc_reset_after_days: i64,
    #[serde(default = "default_soc_reset_time")]
    pub soc_reset_time: i64,
    #[serde(default = "default_soc_reset_current")]
    pub soc_reset_current: f64,

    #[serde(default = "default_cell_voltage_diff_keep_max_until")]
    pub cell_voltage_diff_keep_max_voltage_until: f64,
    #[serde(default = "default_cell_voltage_diff_keep_max_restart")]
    pub cell_voltage_diff_keep_max_voltage_time_restart: f64,
    #[serde(default = "default_cell_voltage_diff_to_reset_limit")]
    pub cell_voltage_diff_to_reset_voltage_limit: f64,

    #[serde(default = "default_voltage_drop")]
    pub voltage_drop: f64,

    #[serde(default = "default_linear_recalculation_every")]
    pub linear_recalculation_every: i64,
    #[serde(default = "default_linear_recalculation_on_perc_change")]
    pub linear_recalculation_on_perc_change: f64,

    #[serde(default = "default_true")]
    pub cccm_cv_enable: bool,
    #[serde(default = "default_true")]
    pub cccm_t_enable: bool,
    #[serde(default = "default_true")]
    pub cccm_soc_enable: bool,
    #[serde(default = "default_true")]
    pub dccm_cv_enable: bool,
    #[serde(default = "default_true")]
    pub dccm_t_enable: bool,
    #[serde(default = "default_true")]
    pub dccm_soc_enable: bool,

    #[serde(default = "default_cv_curve")]
    pub cell_voltages_while_charging: Curve,
    #[serde(default = "default_dcv_curve")]
    pub cell_voltages_while_discharging: Curve,
    #[serde(default = "default_temp_charge_curve")]
    pub temperatures_while_charging: Curve,
    #[serde(default = "default_temp_discharge_curve")]
    pub temperatures_while_discharging: Curve,
    #[serde(default = "default_soc_charge_curve")]
    pub soc_while_charging: Curve,
    #[serde(default = "default_soc_discharge_curve")]
    pub soc_while_discharging: Curve,

    #[serde(default = "default_max_battery_charge_current")]
    pub max_battery_charge_current: f64,
    #[serde(default = "default_max_battery_discharge_current")]
    pub max_battery_discharge_current: f64,

    #[serde(default = "default_soc_calc_current_reported")]
    pub soc_calc_current_reported_by_bms: f64,
    #[serde(default = "default_soc_calc_current_measured")]
    pub soc_calc_current_measured_by_user: f64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty table deserializes via field defaults")
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| EngineError::Config(format!("reading {}: {err}", path.display())))?;
        let config: EngineConfig = toml::from_str(&raw)
            .map_err(|err| EngineError::Config(format!("parsing {}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Range checks in the style of `routes/battery.rs::validate_battery_model`.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.cell_count == 0 {
            return Err(EngineError::Config("cell_count must be > 0".into()));
        }
        if self.capacity_ah <= 0.0 || !self.capacity_ah.is_finite() {
            return Err(EngineError::Config("capacity_ah must be > 0".into()));
        }
        if self.min_cell_voltage <= 0.0 || self.min_cell_voltage >= self.max_cell_voltage {
            return Err(EngineError::Config(
                "min_cell_voltage must be > 0 and < max_cell_voltage".into(),
            ));
        }
        if self.float_cell_voltage > self.max_cell_voltage {
            return Err(EngineError::Config(
                "float_cell_voltage must be <= max_cell_voltage".into(),
            ));
        }
        if self.linear_recalculation_every < 0 {
            return Err(EngineError::Config(
                "linear_recalculation_every must be >= 0".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.linear_recalculation_on_perc_change) {
            return Err(EngineError::Config(
                "linear_recalculation_on_perc_change must be 0..100".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = EngineConfig::default();
        config.validate().unwrap();
    }

    #[test]
    fn rejects_inverted_cell_voltage_bounds() {
        let mut config = EngineConfig::default();
        config.min_cell_voltage = 3.5;
        config.max_cell_voltage = 3.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_parses_partial_toml_with_defaults() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "cell_count = 8\ncapacity_ah = 280.0\n").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.cell_count, 8);
        assert_eq!(config.capacity_ah, 280.0);
        assert_eq!(config.max_cell_voltage, default_max_cell_voltage());
    }

    #[test]
    fn load_rejects_missing_file() {
        let missing = Path::new("/nonexistent/battery-control-engine-config.toml");
        assert!(EngineConfig::load(missing).is_err());
    }
}
