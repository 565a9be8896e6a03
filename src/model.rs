use serde::Serialize;

/// Tri-valued hazard state used throughout [`Protection`], matching the
/// source implementation's 0/1/2 protection codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriState {
    #[default]
    Ok,
    Warning,
    Alarm,
}

impl TriState {
    pub fn is_alarm(self) -> bool {
        matches!(self, TriState::Alarm)
    }
}

/// Per-hazard protection flags. Populated by the driver; the engine only
/// consumes these to gate current, it does not compute the thresholds itself.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Protection {
    pub voltage_high: TriState,
    pub voltage_low: TriState,
    pub voltage_cell_low: TriState,
    pub soc_low: TriState,
    pub current_over: TriState,
    pub current_under: TriState,
    pub cell_imbalance: TriState,
    pub internal_failure: TriState,
    pub temp_high_charge: TriState,
    pub temp_low_charge: TriState,
    pub temp_high_discharge: TriState,
    pub temp_low_discharge: TriState,
    pub temp_high_internal: TriState,
    pub temp_low_internal: TriState,
}

/// Per-cell telemetry. Index within `PackState::cells` is stable and used
/// only for diagnostics (`cell_min_no`/`cell_max_no`-style reporting).
#[derive(Debug, Clone, Default, Serialize)]
pub struct Cell {
    pub voltage: Option<f64>,
    pub balancing: Option<bool>,
    pub temp: Option<f64>,
}

/// The engine's entire mutable state, owned exclusively by the orchestrator
/// and mutated only by it on each tick. Field-for-field grounded on the
/// source `Battery.init_values()` (the four restart-persistent fields are
/// called out in [`PackState::init_values`]).
#[derive(Debug, Clone)]
pub struct PackState {
    pub cell_count: usize,
    pub cells: Vec<Cell>,

    pub voltage: Option<f64>,
    pub current: Option<f64>,

    pub temp1: Option<f64>,
    pub temp2: Option<f64>,
    pub temp3: Option<f64>,
    pub temp4: Option<f64>,
    pub temp_mos: Option<f64>,

    pub capacity: Option<f64>,

    pub soc: Option<f64>,
    pub soc_calc: Option<f64>,
    pub soc_calc_capacity_remain: Option<f64>,
    pub soc_calc_capacity_remain_lasttime: Option<i64>,
    /// Dwell-start timestamp shared by both the full- and empty-endpoint
    /// snap checks, matching the source's single `soc_calc_reset_starttime`
    /// field (the two checks are evaluated from mutually exclusive voltage
    /// bands, so one field suffices).
    pub soc_calc_reset_starttime: Option<i64>,

    pub max_voltage_start_time: Option<i64>,
    pub allow_max_voltage: bool,
    pub soc_reset_requested: bool,
    pub soc_reset_last_reached: Option<i64>,

    pub transition_start_time: Option<i64>,
    pub initial_control_voltage: Option<f64>,

    pub control_voltage: Option<f64>,
    pub control_charge_current: Option<f64>,
    pub control_discharge_current: Option<f64>,
    pub control_allow_charge: bool,
    pub control_allow_discharge: bool,

    pub charge_fet: Option<bool>,
    pub discharge_fet: Option<bool>,
    pub balance_fet: Option<bool>,
    pub block_because_disconnect: bool,

    pub linear_cvl_last_set: Option<i64>,
    pub linear_ccl_last_set: Option<i64>,
    pub linear_dcl_last_set: Option<i64>,
    pub linear_ccl_last_value: Option<f64>,
    pub linear_dcl_last_value: Option<f64>,

    pub protection: Protection,
    pub charge_mode: String,
    pub charge_limitation: String,
    pub discharge_limitation: String,

    // Populated once by the driver's `get_settings`.
    pub hardware_version: Option<String>,
    pub min_battery_voltage: Option<f64>,
    pub max_battery_voltage: Option<f64>,
    pub max_battery_charge_current: Option<f64>,
    pub max_battery_discharge_current: Option<f64>,
}

impl PackState {
    pub fn new(cell_count: usize) -> Self {
        let mut state = Self {
            cell_count,
            cells: vec![Cell::default(); cell_count],
            voltage: None,
            current: None,
            temp1: None,
            temp2: None,
            temp3: None,
            temp4: None,
            temp_mos: None,
            capacity: None,
            soc: None,
            soc_calc: None,
            soc_calc_capacity_remain: None,
            soc_calc_capacity_remain_lasttime: None,
            soc_calc_reset_starttime: None,
            max_voltage_start_time: None,
            allow_max_voltage: true,
            soc_reset_requested: false,
            soc_reset_last_reached: None,
            transition_start_time: None,
            initial_control_voltage: None,
            control_voltage: None,
            control_charge_current: None,
            control_discharge_current: None,
            control_allow_charge: false,
            control_allow_discharge: false,
            charge_fet: None,
            discharge_fet: None,
            balance_fet: None,
            block_because_disconnect: false,
            linear_cvl_last_set: None,
            linear_ccl_last_set: None,
            linear_dcl_last_set: None,
            linear_ccl_last_value: None,
            linear_dcl_last_value: None,
            protection: Protection::default(),
            charge_mode: String::from("--"),
            charge_limitation: String::new(),
            discharge_limitation: String::new(),
            hardware_version: None,
            min_battery_voltage: None,
            max_battery_voltage: None,
            max_battery_charge_current: None,
            max_battery_discharge_current: None,
        };
        state.cells = vec![Cell::default(); cell_count];
        state
    }

    /// Resets all telemetry and derived state, except the four fields the
    /// source implementation deliberately preserves across a reconnect so the
    /// inverter does not see a sudden regime change (Open Question-adjacent
    /// but stated directly in source, not ambiguous): `soc_calc`,
    /// `soc_reset_last_reached`, `allow_max_voltage`, `max_voltage_start_time`.
    pub fn init_values(&mut self) {
        let soc_calc = self.soc_calc;
        let soc_reset_last_reached = self.soc_reset_last_reached;
        let allow_max_voltage = self.allow_max_voltage;
        let max_voltage_start_time = self.max_voltage_start_time;

        let cell_count = self.cell_count;
        *self = PackState::new(cell_count);

        self.soc_calc = soc_calc;
        self.soc_reset_last_reached = soc_reset_last_reached;
        self.allow_max_voltage = allow_max_voltage;
        self.max_voltage_start_time = max_voltage_start_time;
    }
}

/// Outward-facing snapshot the core guarantees to produce each tick. This is
/// the publication interface: whatever downstream consumer reads it (here: a
/// structured log line and a `tokio::sync::watch` channel) only ever sees
/// this type, never `PackState` directly.
#[derive(Debug, Clone, Serialize)]
pub struct Publication {
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub soc_calc: Option<f64>,
    pub control_voltage: Option<f64>,
    pub control_charge_current: Option<f64>,
    pub control_discharge_current: Option<f64>,
    pub control_allow_charge: bool,
    pub control_allow_discharge: bool,
    pub charge_mode: String,
    pub charge_limitation: String,
    pub discharge_limitation: String,
    pub protection: Protection,
    pub cell_voltages: Vec<Option<f64>>,
    pub cell_balancing: Vec<Option<bool>>,
    pub temps: Vec<Option<f64>>,
    pub midpoint_voltage: Option<f64>,
    pub midpoint_deviation_percent: Option<f64>,
}

impl From<&PackState> for Publication {
    fn from(state: &PackState) -> Self {
        let midpoint = crate::aggregators::midpoint_voltage(state);
        Self {
            voltage: state.voltage,
            current: state.current,
            soc_calc: state.soc_calc,
            control_voltage: state.control_voltage,
            control_charge_current: state.control_charge_current,
            control_discharge_current: state.control_discharge_current,
            control_allow_charge: state.control_allow_charge,
            control_allow_discharge: state.control_allow_discharge,
            charge_mode: state.charge_mode.clone(),
            charge_limitation: state.charge_limitation.clone(),
            discharge_limitation: state.discharge_limitation.clone(),
            protection: state.protection.clone(),
            cell_voltages: state.cells.iter().map(|c| c.voltage).collect(),
            cell_balancing: state.cells.iter().map(|c| c.balancing).collect(),
            temps: vec![state.temp1, state.temp2, state.temp3, state.temp4],
            midpoint_voltage: midpoint.map(|(mid, _)| mid),
            midpoint_deviation_percent: midpoint.map(|(_, dev)| dev),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publication_carries_midpoint_from_aggregators() {
        let mut state = PackState::new(4);
        for (cell, v) in state.cells.iter_mut().zip([3.30, 3.32, 3.34, 3.36]) {
            cell.voltage = Some(v);
        }
        let publication = Publication::from(&state);
        assert!(publication.midpoint_voltage.is_some());
        assert!(publication.midpoint_deviation_percent.is_some());
    }

    #[test]
    fn publication_midpoint_none_without_cell_data() {
        let state = PackState::new(4);
        let publication = Publication::from(&state);
        assert_eq!(publication.midpoint_voltage, None);
        assert_eq!(publication.midpoint_deviation_percent, None);
    }
}
