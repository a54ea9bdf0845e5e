use crate::types::{SarError, SarResult};
use ndarray::Array2;

/// Bilinear two-dimensional lookup table
///
/// X is slant range (m) along columns, Y is azimuth time (s since the orbit
/// reference epoch) along rows. Used for Doppler centroids, geo2rdr timing
/// corrections and phase carriers.
#[derive(Debug, Clone, PartialEq)]
pub struct Lut2d {
    x_start: f64,
    y_start: f64,
    x_spacing: f64,
    y_spacing: f64,
    data: Array2<f64>,
    bounds_error: bool,
}

impl Default for Lut2d {
    /// Zero everywhere (zero-Doppler geometry)
    fn default() -> Self {
        Self::constant(0.0)
    }
}

impl Lut2d {
    pub fn new(
        x_start: f64,
        y_start: f64,
        x_spacing: f64,
        y_spacing: f64,
        data: Array2<f64>,
        bounds_error: bool,
    ) -> SarResult<Self> {
        if data.is_empty() {
            return Err(SarError::InvalidParameter("LUT data must not be empty".to_string()));
        }
        if x_spacing == 0.0 || y_spacing == 0.0 {
            return Err(SarError::InvalidParameter(format!(
                "LUT spacing must be non-zero, got ({}, {})",
                x_spacing, y_spacing
            )));
        }
        Ok(Self {
            x_start,
            y_start,
            x_spacing,
            y_spacing,
            data,
            bounds_error,
        })
    }

    /// LUT with the same value everywhere, never out of bounds
    pub fn constant(value: f64) -> Self {
        Self {
            x_start: 0.0,
            y_start: 0.0,
            x_spacing: 1.0,
            y_spacing: 1.0,
            data: Array2::from_elem((1, 1), value),
            bounds_error: false,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.data.len() == 1
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn length(&self) -> usize {
        self.data.nrows()
    }

    pub fn x_end(&self) -> f64 {
        self.x_start + (self.width() as f64 - 1.0) * self.x_spacing
    }

    pub fn y_end(&self) -> f64 {
        self.y_start + (self.length() as f64 - 1.0) * self.y_spacing
    }

    pub fn contains(&self, y: f64, x: f64) -> bool {
        if self.is_constant() {
            return true;
        }
        let fx = (x - self.x_start) / self.x_spacing;
        let fy = (y - self.y_start) / self.y_spacing;
        fx >= 0.0
            && fx <= (self.width() - 1) as f64
            && fy >= 0.0
            && fy <= (self.length() - 1) as f64
    }

    fn fractional_index(&self, y: f64, x: f64) -> SarResult<(f64, f64)> {
        let fx = (x - self.x_start) / self.x_spacing;
        let fy = (y - self.y_start) / self.y_spacing;
        let max_x = (self.width() - 1) as f64;
        let max_y = (self.length() - 1) as f64;
        if self.bounds_error {
            if !(fx >= 0.0 && fx <= max_x) {
                return Err(SarError::OutOfBoundsLookup { what: "LUT slant range", value: x });
            }
            if !(fy >= 0.0 && fy <= max_y) {
                return Err(SarError::OutOfBoundsLookup { what: "LUT azimuth time", value: y });
            }
        }
        Ok((fx.clamp(0.0, max_x), fy.clamp(0.0, max_y)))
    }

    /// Bilinear value at azimuth time `y` and slant range `x`
    pub fn eval(&self, y: f64, x: f64) -> SarResult<f64> {
        if self.is_constant() {
            return Ok(self.data[[0, 0]]);
        }
        let (fx, fy) = self.fractional_index(y, x)?;
        let (c0, r0) = (fx.floor() as usize, fy.floor() as usize);
        let c1 = (c0 + 1).min(self.width() - 1);
        let r1 = (r0 + 1).min(self.length() - 1);
        let (wx, wy) = (fx - c0 as f64, fy - r0 as f64);

        let top = self.data[[r0, c0]] * (1.0 - wx) + self.data[[r0, c1]] * wx;
        let bottom = self.data[[r1, c0]] * (1.0 - wx) + self.data[[r1, c1]] * wx;
        Ok(top * (1.0 - wy) + bottom * wy)
    }

    /// Partial derivative with respect to slant range at (`y`, `x`)
    pub fn eval_dx(&self, y: f64, x: f64) -> SarResult<f64> {
        if self.is_constant() || self.width() < 2 {
            return Ok(0.0);
        }
        let (fx, fy) = self.fractional_index(y, x)?;
        let c0 = (fx.floor() as usize).min(self.width() - 2);
        let r0 = fy.floor() as usize;
        let r1 = (r0 + 1).min(self.length() - 1);
        let wy = fy - r0 as f64;

        let left = self.data[[r0, c0]] * (1.0 - wy) + self.data[[r1, c0]] * wy;
        let right = self.data[[r0, c0 + 1]] * (1.0 - wy) + self.data[[r1, c0 + 1]] * wy;
        Ok((right - left) / self.x_spacing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ramp() -> Lut2d {
        // value = 2 * column + 10 * row
        let data = array![[0.0, 2.0, 4.0], [10.0, 12.0, 14.0]];
        Lut2d::new(800_000.0, 5.0, 100.0, 1.0, data, true).unwrap()
    }

    #[test]
    fn test_bilinear_eval() {
        let lut = ramp();
        assert!((lut.eval(5.0, 800_000.0).unwrap()).abs() < 1e-12);
        assert!((lut.eval(5.5, 800_150.0).unwrap() - 8.0).abs() < 1e-12);
        assert!((lut.eval(6.0, 800_200.0).unwrap() - 14.0).abs() < 1e-12);
        assert!((lut.eval_dx(5.25, 800_050.0).unwrap() - 0.02).abs() < 1e-15);
    }

    #[test]
    fn test_bounds_behaviour() {
        let lut = ramp();
        assert!(matches!(
            lut.eval(7.0, 800_100.0),
            Err(SarError::OutOfBoundsLookup { .. })
        ));

        let clamped = Lut2d::new(800_000.0, 5.0, 100.0, 1.0, array![[1.0, 3.0]], false).unwrap();
        assert_eq!(clamped.eval(100.0, 900_000.0).unwrap(), 3.0);
        assert_eq!(Lut2d::default().eval(-1e9, 1e9).unwrap(), 0.0);
    }

    #[test]
    fn test_rejects_bad_spacing() {
        assert!(Lut2d::new(0.0, 0.0, 0.0, 1.0, array![[1.0]], false).is_err());
    }
}
