//! Phase carrier models removed before and restored after SLC resampling

use crate::io::doppler::Lut2d;
use crate::types::{SarError, SarResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Phase (radians) as a function of azimuth time and slant range
pub trait PhaseCarrier: Send + Sync + std::fmt::Debug {
    fn eval(&self, az_time: f64, slant_range: f64) -> SarResult<f64>;

    /// True when the carrier is identically zero and can be skipped
    fn is_zero(&self) -> bool {
        false
    }
}

/// Identity carrier
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ZeroCarrier;

impl PhaseCarrier for ZeroCarrier {
    fn eval(&self, _az_time: f64, _slant_range: f64) -> SarResult<f64> {
        Ok(0.0)
    }

    fn is_zero(&self) -> bool {
        true
    }
}

/// 2-D polynomial in normalised azimuth time (rows) and slant range (columns)
///
/// value = sum_ij coeffs[i][j] * ((t - azimuth_mean) / azimuth_norm)^i
///                             * ((r - range_mean) / range_norm)^j
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poly2d {
    pub coeffs: Vec<Vec<f64>>,
    #[serde(default)]
    pub azimuth_mean: f64,
    #[serde(default = "unit_norm")]
    pub azimuth_norm: f64,
    #[serde(default)]
    pub range_mean: f64,
    #[serde(default = "unit_norm")]
    pub range_norm: f64,
}

fn unit_norm() -> f64 {
    1.0
}

impl Poly2d {
    pub fn new(coeffs: Vec<Vec<f64>>) -> Self {
        Self {
            coeffs,
            azimuth_mean: 0.0,
            azimuth_norm: 1.0,
            range_mean: 0.0,
            range_norm: 1.0,
        }
    }

    pub fn value(&self, az_time: f64, slant_range: f64) -> f64 {
        let y = (az_time - self.azimuth_mean) / self.azimuth_norm;
        let x = (slant_range - self.range_mean) / self.range_norm;
        // Horner in both directions
        self.coeffs.iter().rev().fold(0.0, |acc_y, row| {
            let row_value = row.iter().rev().fold(0.0, |acc_x, &c| acc_x * x + c);
            acc_y * y + row_value
        })
    }
}

impl PhaseCarrier for Poly2d {
    fn eval(&self, az_time: f64, slant_range: f64) -> SarResult<f64> {
        Ok(self.value(az_time, slant_range))
    }

    fn is_zero(&self) -> bool {
        self.coeffs.iter().flatten().all(|&c| c == 0.0)
    }
}

impl PhaseCarrier for Lut2d {
    fn eval(&self, az_time: f64, slant_range: f64) -> SarResult<f64> {
        Lut2d::eval(self, az_time, slant_range)
    }

    fn is_zero(&self) -> bool {
        self.is_constant() && matches!(Lut2d::eval(self, 0.0, 0.0), Ok(v) if v == 0.0)
    }
}

/// Carrier selection as it appears in run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CarrierConfig {
    Zero,
    Poly2d(Poly2d),
    Lut {
        range_start: f64,
        azimuth_start: f64,
        range_spacing: f64,
        azimuth_spacing: f64,
        /// Rows are azimuth, columns are slant range
        values: Vec<Vec<f64>>,
    },
}

impl Default for CarrierConfig {
    fn default() -> Self {
        CarrierConfig::Zero
    }
}

impl CarrierConfig {
    pub fn build(&self) -> SarResult<Box<dyn PhaseCarrier>> {
        match self {
            CarrierConfig::Zero => Ok(Box::new(ZeroCarrier)),
            CarrierConfig::Poly2d(poly) => Ok(Box::new(poly.clone())),
            CarrierConfig::Lut {
                range_start,
                azimuth_start,
                range_spacing,
                azimuth_spacing,
                values,
            } => {
                let rows = values.len();
                let cols = values.first().map_or(0, |r| r.len());
                if values.iter().any(|r| r.len() != cols) {
                    return Err(SarError::InvalidParameter(
                        "carrier LUT rows must have equal length".to_string(),
                    ));
                }
                let data = Array2::from_shape_vec((rows, cols), values.concat()).map_err(|e| {
                    SarError::InvalidParameter(format!("Invalid carrier LUT shape: {}", e))
                })?;
                let lut = Lut2d::new(
                    *range_start,
                    *azimuth_start,
                    *range_spacing,
                    *azimuth_spacing,
                    data,
                    false,
                )?;
                Ok(Box::new(lut))
            }
        }
    }
}
