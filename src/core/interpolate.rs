//! 2-D resampling kernels for radar-grid data

use crate::types::{SarComplex64, SarError};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

/// Resampling kernel used in INTERP geocoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterpMethod {
    Nearest,
    Bilinear,
    /// Keys cubic convolution (a = -0.5)
    Bicubic,
    /// 6-point Lagrange polynomial per axis
    Biquintic,
}

impl Default for InterpMethod {
    fn default() -> Self {
        InterpMethod::Biquintic
    }
}

impl InterpMethod {
    /// Samples required on each side of the interpolation point
    pub fn margin(self) -> usize {
        match self {
            InterpMethod::Nearest => 0,
            InterpMethod::Bilinear => 1,
            InterpMethod::Bicubic => 2,
            InterpMethod::Biquintic => 3,
        }
    }
}

impl std::fmt::Display for InterpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InterpMethod::Nearest => "NEAREST",
            InterpMethod::Bilinear => "BILINEAR",
            InterpMethod::Bicubic => "BICUBIC",
            InterpMethod::Biquintic => "BIQUINTIC",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for InterpMethod {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NEAREST" | "NEAREST_NEIGHBOR" => Ok(InterpMethod::Nearest),
            "BILINEAR" => Ok(InterpMethod::Bilinear),
            "BICUBIC" => Ok(InterpMethod::Bicubic),
            "BIQUINTIC" => Ok(InterpMethod::Biquintic),
            _ => Err(SarError::InvalidParameter(format!(
                "Invalid interpolation method: {}",
                s
            ))),
        }
    }
}

/// Interpolate `data` at fractional (`line`, `sample`). Returns `None` when
/// the kernel support leaves the array.
pub fn interpolate(
    data: &ArrayView2<SarComplex64>,
    line: f64,
    sample: f64,
    method: InterpMethod,
) -> Option<SarComplex64> {
    if !(line.is_finite() && sample.is_finite()) {
        return None;
    }
    match method {
        InterpMethod::Nearest => nearest_interpolate(data, line, sample),
        InterpMethod::Bilinear => bilinear_interpolate(data, line, sample),
        InterpMethod::Bicubic => separable_interpolate(data, line, sample, 4, keys_weights),
        InterpMethod::Biquintic => separable_interpolate(data, line, sample, 6, lagrange6_weights),
    }
}

fn nearest_interpolate(data: &ArrayView2<SarComplex64>, line: f64, sample: f64) -> Option<SarComplex64> {
    let (rows, cols) = data.dim();
    let r = line.round();
    let c = sample.round();
    if r < 0.0 || c < 0.0 || r >= rows as f64 || c >= cols as f64 {
        return None;
    }
    Some(data[[r as usize, c as usize]])
}

fn bilinear_interpolate(data: &ArrayView2<SarComplex64>, line: f64, sample: f64) -> Option<SarComplex64> {
    let (rows, cols) = data.dim();
    if line < 0.0 || sample < 0.0 || line > (rows - 1) as f64 || sample > (cols - 1) as f64 {
        return None;
    }
    let y1 = line.floor() as usize;
    let x1 = sample.floor() as usize;
    let y2 = (y1 + 1).min(rows - 1);
    let x2 = (x1 + 1).min(cols - 1);
    let dy = line - y1 as f64;
    let dx = sample - x1 as f64;

    Some(
        data[[y1, x1]] * ((1.0 - dx) * (1.0 - dy))
            + data[[y1, x2]] * (dx * (1.0 - dy))
            + data[[y2, x1]] * ((1.0 - dx) * dy)
            + data[[y2, x2]] * (dx * dy),
    )
}

/// Keys cubic convolution weights for nodes -1..=2 at fraction `t`
fn keys_weights(t: f64, w: &mut [f64]) {
    const A: f64 = -0.5;
    let kernel = |x: f64| {
        let x = x.abs();
        if x <= 1.0 {
            (A + 2.0) * x.powi(3) - (A + 3.0) * x * x + 1.0
        } else if x < 2.0 {
            A * x.powi(3) - 5.0 * A * x * x + 8.0 * A * x - 4.0 * A
        } else {
            0.0
        }
    };
    for (k, wk) in w.iter_mut().enumerate() {
        *wk = kernel(t - (k as f64 - 1.0));
    }
}

/// Lagrange weights for nodes -2..=3 at fraction `t`
fn lagrange6_weights(t: f64, w: &mut [f64]) {
    for (k, wk) in w.iter_mut().enumerate() {
        let xk = k as f64 - 2.0;
        let mut prod = 1.0;
        for j in 0..6 {
            if j != k {
                let xj = j as f64 - 2.0;
                prod *= (t - xj) / (xk - xj);
            }
        }
        *wk = prod;
    }
}

fn separable_interpolate(
    data: &ArrayView2<SarComplex64>,
    line: f64,
    sample: f64,
    taps: usize,
    weights: fn(f64, &mut [f64]),
) -> Option<SarComplex64> {
    let (rows, cols) = data.dim();
    let before = (taps / 2 - 1) as isize;
    let r0 = line.floor() as isize - before;
    let c0 = sample.floor() as isize - before;
    if r0 < 0 || c0 < 0 || r0 + taps as isize > rows as isize || c0 + taps as isize > cols as isize {
        return None;
    }

    let mut wr = [0.0; 6];
    let mut wc = [0.0; 6];
    weights(line - line.floor(), &mut wr[..taps]);
    weights(sample - sample.floor(), &mut wc[..taps]);

    let (r0, c0) = (r0 as usize, c0 as usize);
    let mut value = SarComplex64::new(0.0, 0.0);
    for (i, &wi) in wr[..taps].iter().enumerate() {
        let mut row_sum = SarComplex64::new(0.0, 0.0);
        for (j, &wj) in wc[..taps].iter().enumerate() {
            row_sum += data[[r0 + i, c0 + j]] * wj;
        }
        value += row_sum * wi;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn quadratic_field() -> Array2<SarComplex64> {
        Array2::from_shape_fn((12, 14), |(r, c)| {
            let (r, c) = (r as f64, c as f64);
            SarComplex64::new(0.5 * r * r + 2.0 * c, r * c - 3.0)
        })
    }

    #[test]
    fn test_polynomial_reproduction() {
        let field = quadratic_field();
        let view = field.view();
        let (line, sample) = (5.3, 6.7);
        let expected = SarComplex64::new(0.5 * line * line + 2.0 * sample, line * sample - 3.0);

        for method in [InterpMethod::Bicubic, InterpMethod::Biquintic] {
            let v = interpolate(&view, line, sample, method).unwrap();
            assert!((v - expected).norm() < 1e-9, "{} error {}", method, (v - expected).norm());
        }

        // Bilinear is exact for the bilinear part only
        let v = interpolate(&view, 5.0, 6.7, InterpMethod::Bilinear).unwrap();
        assert!((v - SarComplex64::new(12.5 + 13.4, 5.0 * 6.7 - 3.0)).norm() < 1e-12);
    }

    #[test]
    fn test_nearest_and_bounds() {
        let field = quadratic_field();
        let view = field.view();
        assert_eq!(interpolate(&view, 2.4, 3.6, InterpMethod::Nearest), Some(field[[2, 4]]));
        assert!(interpolate(&view, 0.5, 5.0, InterpMethod::Biquintic).is_none());
        assert!(interpolate(&view, 5.0, 12.5, InterpMethod::Bicubic).is_none());
        assert!(interpolate(&view, 11.0, 13.0, InterpMethod::Bilinear).is_some());
        assert!(interpolate(&view, f64::NAN, 3.0, InterpMethod::Bilinear).is_none());
    }

    #[test]
    fn test_weights_sum_to_one() {
        let mut w = [0.0; 6];
        lagrange6_weights(0.37, &mut w);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        let mut w = [0.0; 4];
        keys_weights(0.81, &mut w);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_parse_methods() {
        assert_eq!("biquintic".parse::<InterpMethod>().unwrap(), InterpMethod::Biquintic);
        assert!("sinc".parse::<InterpMethod>().is_err());
    }
}
