//! The two interpolation primitives behind every derating curve in
//! [`crate::current_limiter`]. Grounded on `battery.py`'s
//! `calcMaxChargeCurrentReferringToCellVoltage`/`...Temperature`/`...Soc`
//! family, which all delegate to the same linear- or step-curve shape.

/// A piecewise curve over parallel `x`/`y` arrays, as configured under e.g.
/// `CELL_VOLTAGES_WHILE_CHARGING` / `MAX_CHARGE_CURRENT_CV`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Curve {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl Curve {
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Self {
        Self { x, y }
    }

    fn validate(&self) -> Result<(), crate::error::EngineError> {
        if self.x.len() != self.y.len() || self.x.len() < 2 {
            return Err(crate::error::EngineError::Config(
                "derating curve requires at least two matching x/y points".into(),
            ));
        }
        Ok(())
    }

    /// Linear interpolation. `x` is clamped to the domain covered by the
    /// curve's first and last points; the bracketing segment is found by
    /// scanning in array order (the source does not require `x` to be
    /// monotonic in value, only in evaluation order).
    pub fn interpolate_linear(&self, x: f64) -> Result<f64, crate::error::EngineError> {
        self.validate()?;
        let n = self.x.len();
        let lo = self.x[0];
        let hi = self.x[n - 1];
        let (lo, hi, y_lo, y_hi) = if lo <= hi {
            (lo, hi, self.y[0], self.y[n - 1])
        } else {
            (hi, lo, self.y[n - 1], self.y[0])
        };
        if x <= lo {
            return Ok(if lo == self.x[0] { self.y[0] } else { y_lo });
        }
        if x >= hi {
            return Ok(if hi == self.x[n - 1] { self.y[n - 1] } else { y_hi });
        }
        for i in 0..n - 1 {
            let (x0, x1) = (self.x[i], self.x[i + 1]);
            let in_segment = (x0 <= x && x <= x1) || (x1 <= x && x <= x0);
            if in_segment && x0 != x1 {
                let (y0, y1) = (self.y[i], self.y[i + 1]);
                let t = (x - x0) / (x1 - x0);
                return Ok(y0 + t * (y1 - y0));
            }
        }
        Ok(self.y[n - 1])
    }

    /// Step interpolation: returns the `y` of the first segment whose
    /// threshold is crossed. `ascending` selects `<` (ascending domain, e.g.
    /// a charge-current temperature curve read low to high) vs `>`
    /// (descending domain), matching the source's two step-curve flavors.
    /// Inclusive at the crossed endpoint.
    pub fn interpolate_step(&self, x: f64, ascending: bool) -> Result<f64, crate::error::EngineError> {
        self.validate()?;
        let n = self.x.len();
        for i in 0..n {
            let threshold = self.x[i];
            let crossed = if ascending {
                x <= threshold
            } else {
                x >= threshold
            };
            if crossed {
                return Ok(self.y[i]);
            }
        }
        Ok(self.y[n - 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_interpolates_midpoint() {
        let curve = Curve::new(vec![0.0, 15.0, 45.0, 55.0], vec![50.0, 100.0, 50.0, 0.0]);
        let y = curve.interpolate_linear(50.0).unwrap();
        assert!((y - 25.0).abs() < 1e-9);
    }

    #[test]
    fn linear_clamps_outside_domain() {
        let curve = Curve::new(vec![0.0, 15.0, 45.0, 55.0], vec![50.0, 100.0, 50.0, 0.0]);
        assert_eq!(curve.interpolate_linear(100.0).unwrap(), 0.0);
        assert_eq!(curve.interpolate_linear(-5.0).unwrap(), 50.0);
    }

    #[test]
    fn linear_temperature_derate_scenario_f() {
        let curve = Curve::new(vec![0.0, 15.0, 45.0, 55.0], vec![50.0, 100.0, 50.0, 0.0]);
        let y = curve.interpolate_linear(55.0).unwrap();
        assert_eq!(y, 0.0);
    }

    #[test]
    fn step_ascending_returns_first_crossed() {
        let curve = Curve::new(vec![2.9, 3.0, 3.3], vec![0.0, 10.0, 40.0]);
        assert_eq!(curve.interpolate_step(2.95, true).unwrap(), 10.0);
        assert_eq!(curve.interpolate_step(2.9, true).unwrap(), 0.0);
    }

    #[test]
    fn rejects_mismatched_curve() {
        let curve = Curve::new(vec![0.0, 1.0], vec![1.0]);
        assert!(curve.interpolate_linear(0.5).is_err());
    }
}
