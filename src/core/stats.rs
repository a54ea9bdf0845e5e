//! Per-band raster statistics

use crate::io::raster::{RasterSource, Sample};
use crate::types::SarResult;

/// Running statistics of the finite samples of one band
///
/// Complex samples are measured by magnitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Sample standard deviation (n - 1)
    pub std_dev: f64,
    pub n_valid: usize,
    sum: f64,
    sum_sq: f64,
}

impl Default for RasterStats {
    fn default() -> Self {
        Self {
            min: f64::NAN,
            max: f64::NAN,
            mean: f64::NAN,
            std_dev: f64::NAN,
            n_valid: 0,
            sum: 0.0,
            sum_sq: 0.0,
        }
    }
}

impl RasterStats {
    pub fn push<T: Sample>(&mut self, value: T) {
        let v = value.to_c64();
        let x = if T::IS_COMPLEX { v.norm() } else { v.re };
        if !x.is_finite() {
            return;
        }
        if self.n_valid == 0 {
            self.min = x;
            self.max = x;
        } else {
            self.min = self.min.min(x);
            self.max = self.max.max(x);
        }
        self.n_valid += 1;
        self.sum += x;
        self.sum_sq += x * x;
        self.update_moments();
    }

    pub fn merge(&mut self, other: &RasterStats) {
        if other.n_valid == 0 {
            return;
        }
        if self.n_valid == 0 {
            *self = *other;
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.n_valid += other.n_valid;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.update_moments();
    }

    fn update_moments(&mut self) {
        let n = self.n_valid as f64;
        self.mean = self.sum / n;
        self.std_dev = if self.n_valid > 1 {
            ((self.sum_sq - n * self.mean * self.mean) / (n - 1.0)).max(0.0).sqrt()
        } else {
            0.0
        };
    }
}

/// Statistics of every band of `raster`, read in strips of `strip_lines` rows
pub fn compute_raster_stats<T: Sample>(
    raster: &dyn RasterSource<T>,
    strip_lines: usize,
) -> SarResult<Vec<RasterStats>> {
    let strip = strip_lines.max(1);
    let mut all = Vec::with_capacity(raster.num_bands());
    for band in 0..raster.num_bands() {
        let mut stats = RasterStats::default();
        let mut y = 0;
        while y < raster.length() {
            let height = strip.min(raster.length() - y);
            let block = raster.read_block(band, 0, y, raster.width(), height)?;
            block.iter().for_each(|&v| stats.push(v));
            y += height;
        }
        all.push(stats);
    }
    Ok(all)
}

/// Log band statistics at info level
pub fn log_stats(label: &str, stats: &[RasterStats]) {
    for (band, s) in stats.iter().enumerate() {
        log::info!(
            "📊 {} band {}: min={:.6e} max={:.6e} mean={:.6e} std={:.6e} valid={}",
            label,
            band + 1,
            s.min,
            s.max,
            s.mean,
            s.std_dev,
            s.n_valid
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::raster::MemoryRaster;
    use crate::types::SarComplex;
    use ndarray::array;

    #[test]
    fn test_real_stats_ignore_nan() {
        let raster = MemoryRaster::from_array(array![[1.0_f32, 2.0, f32::NAN], [3.0, 4.0, f32::NAN]]);
        let stats = compute_raster_stats(&raster, 1).unwrap();
        let s = stats[0];
        assert_eq!(s.n_valid, 4);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 4.0);
        assert!((s.mean - 2.5).abs() < 1e-12);
        assert!((s.std_dev - (5.0_f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_complex_stats_use_magnitude() {
        let raster = MemoryRaster::from_array(array![[SarComplex::new(3.0, 4.0), SarComplex::new(0.0, -1.0)]]);
        let s = compute_raster_stats(&raster, 8).unwrap()[0];
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 5.0);
        assert!((s.mean - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_merge_matches_single_pass() {
        let mut a = RasterStats::default();
        let mut b = RasterStats::default();
        let mut all = RasterStats::default();
        for (i, v) in [0.5_f64, 1.5, -2.0, 7.0, 3.25].iter().enumerate() {
            if i % 2 == 0 {
                a.push(*v);
            } else {
                b.push(*v);
            }
            all.push(*v);
        }
        a.merge(&b);
        assert_eq!(a.n_valid, all.n_valid);
        assert!((a.mean - all.mean).abs() < 1e-12);
        assert!((a.std_dev - all.std_dev).abs() < 1e-12);
        assert_eq!((a.min, a.max), (-2.0, 7.0));

        let empty = RasterStats::default();
        assert_eq!(empty.n_valid, 0);
        assert!(empty.mean.is_nan());
    }
}
