use crate::core::projection::Projection;
use crate::io::raster::RasterSource;
use crate::types::{GeoTransform, SarError, SarResult};
use ndarray::Array2;

/// Lines read at a time when scanning a DEM window without holding it
const SCAN_STRIP_LINES: usize = 256;

/// Source of terrain heights (metres above the ellipsoid)
pub trait DemProvider: Send + Sync {
    /// Interpolated height at longitude/latitude in radians
    fn elevation(&self, lon: f64, lat: f64) -> f64;

    /// Representative height used to seed rdr2geo
    fn ref_height(&self) -> f64;
}

/// Flat terrain at a fixed height
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantDem {
    pub height: f64,
}

impl ConstantDem {
    pub fn new(height: f64) -> Self {
        Self { height }
    }
}

impl DemProvider for ConstantDem {
    fn elevation(&self, _lon: f64, _lat: f64) -> f64 {
        self.height
    }

    fn ref_height(&self) -> f64 {
        self.height
    }
}

/// Bilinear DEM interpolator over an in-memory window of a DEM raster
///
/// Pixel values are taken at cell centres. Queries outside the window or on
/// no-data samples fall back to the reference height.
#[derive(Debug, Clone)]
pub struct DemInterpolator {
    dem: Array2<f32>,
    transform: GeoTransform,
    projection: Projection,
    nodata: Option<f32>,
    ref_height: f64,
}

impl DemInterpolator {
    pub fn new(dem: Array2<f32>, transform: GeoTransform, epsg: u32) -> SarResult<Self> {
        if dem.is_empty() {
            return Err(SarError::InvalidParameter("DEM window is empty".to_string()));
        }
        if transform.pixel_width == 0.0 || transform.pixel_height == 0.0 {
            return Err(SarError::InvalidParameter(
                "DEM geotransform has zero pixel size".to_string(),
            ));
        }
        let projection = Projection::from_epsg(epsg)?;
        let mut interp = Self {
            dem,
            transform,
            projection,
            nodata: None,
            ref_height: 0.0,
        };
        interp.ref_height = interp.mean_height();
        Ok(interp)
    }

    pub fn with_nodata(mut self, nodata: f32) -> Self {
        self.nodata = Some(nodata);
        self.ref_height = self.mean_height();
        self
    }

    /// Replace the height used to seed rdr2geo and to fill holes, so that
    /// every window of one run shares the same value
    pub fn with_ref_height(mut self, ref_height: f64) -> Self {
        self.ref_height = ref_height;
        self
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.dem
    }

    fn is_valid(&self, v: f32) -> bool {
        v.is_finite() && self.nodata.map_or(true, |nd| v != nd)
    }

    fn mean_height(&self) -> f64 {
        let (sum, count) = self
            .dem
            .iter()
            .filter(|&&v| self.is_valid(v))
            .fold((0.0_f64, 0_usize), |(s, c), &v| (s + v as f64, c + 1));
        if count > 0 {
            sum / count as f64
        } else {
            0.0
        }
    }

    /// Pixel window (x0, x1, y0, y1) of `raster` covering the box
    /// [`min_x`, `max_x`] x [`min_y`, `max_y`] padded by `margin` pixels
    fn pixel_window<S: RasterSource<f32> + ?Sized>(
        raster: &S,
        min_x: f64,
        max_x: f64,
        min_y: f64,
        max_y: f64,
        margin: usize,
    ) -> SarResult<(usize, usize, usize, usize)> {
        let transform = raster.geo_transform().ok_or_else(|| {
            SarError::InvalidParameter("DEM raster has no geotransform".to_string())
        })?;

        let col_a = (min_x - transform.top_left_x) / transform.pixel_width;
        let col_b = (max_x - transform.top_left_x) / transform.pixel_width;
        let row_a = (min_y - transform.top_left_y) / transform.pixel_height;
        let row_b = (max_y - transform.top_left_y) / transform.pixel_height;

        let clamp = |v: f64, len: usize| -> usize { v.max(0.0).min(len as f64) as usize };
        let width = raster.width();
        let length = raster.length();
        let x0 = clamp(col_a.min(col_b).floor() - margin as f64, width);
        let x1 = clamp(col_a.max(col_b).ceil() + margin as f64, width);
        let y0 = clamp(row_a.min(row_b).floor() - margin as f64, length);
        let y1 = clamp(row_a.max(row_b).ceil() + margin as f64, length);

        if x1 <= x0 || y1 <= y0 {
            return Err(SarError::Processing(format!(
                "DEM does not cover requested area x [{:.6}, {:.6}] y [{:.6}, {:.6}]",
                min_x, max_x, min_y, max_y
            )));
        }
        Ok((x0, x1, y0, y1))
    }

    /// Load the part of `raster` covering the projected-coordinate box
    /// [`min_x`, `max_x`] x [`min_y`, `max_y`] (DEM projection units), padded
    /// by `margin` pixels on every side
    pub fn load_window<S: RasterSource<f32> + ?Sized>(
        raster: &S,
        min_x: f64,
        max_x: f64,
        min_y: f64,
        max_y: f64,
        margin: usize,
    ) -> SarResult<Self> {
        let (x0, x1, y0, y1) = Self::pixel_window(raster, min_x, max_x, min_y, max_y, margin)?;
        let transform = raster.geo_transform().ok_or_else(|| {
            SarError::InvalidParameter("DEM raster has no geotransform".to_string())
        })?;
        let epsg = raster.epsg().unwrap_or(4326);

        log::debug!("Loading DEM window {}x{} at ({}, {})", x1 - x0, y1 - y0, x0, y0);
        let dem = raster.read_block(0, x0, y0, x1 - x0, y1 - y0)?;
        let window_transform = GeoTransform {
            top_left_x: transform.top_left_x + x0 as f64 * transform.pixel_width,
            top_left_y: transform.top_left_y + y0 as f64 * transform.pixel_height,
            ..transform
        };
        Self::new(dem, window_transform, epsg)
    }

    /// Mean valid height of the window [`load_window`](Self::load_window)
    /// would load for the same box, read in strips so the window is never
    /// held in memory at once
    pub fn window_mean_height<S: RasterSource<f32> + ?Sized>(
        raster: &S,
        min_x: f64,
        max_x: f64,
        min_y: f64,
        max_y: f64,
        margin: usize,
    ) -> SarResult<f64> {
        let (x0, x1, y0, y1) = Self::pixel_window(raster, min_x, max_x, min_y, max_y, margin)?;
        let (mut sum, mut count) = (0.0_f64, 0_usize);
        let mut line = y0;
        while line < y1 {
            let n = SCAN_STRIP_LINES.min(y1 - line);
            let strip = raster.read_block(0, x0, line, x1 - x0, n)?;
            (sum, count) = strip
                .iter()
                .filter(|v| v.is_finite())
                .fold((sum, count), |(s, c), &v| (s + v as f64, c + 1));
            line += n;
        }
        Ok(if count > 0 { sum / count as f64 } else { 0.0 })
    }

    /// Load the whole DEM raster
    pub fn load_full<S: RasterSource<f32> + ?Sized>(raster: &S) -> SarResult<Self> {
        let transform = raster.geo_transform().ok_or_else(|| {
            SarError::InvalidParameter("DEM raster has no geotransform".to_string())
        })?;
        let dem = raster.read_block(0, 0, 0, raster.width(), raster.length())?;
        Self::new(dem, transform, raster.epsg().unwrap_or(4326))
    }

    /// Get elevation at projected coordinates using bilinear interpolation
    pub fn elevation_at_xy(&self, x: f64, y: f64) -> Option<f64> {
        let col = (x - self.transform.top_left_x) / self.transform.pixel_width - 0.5;
        let row = (y - self.transform.top_left_y) / self.transform.pixel_height - 0.5;
        let (rows, cols) = self.dem.dim();

        if !(col >= 0.0 && row >= 0.0 && col <= (cols - 1) as f64 && row <= (rows - 1) as f64) {
            return None;
        }

        let x1 = col.floor() as usize;
        let y1 = row.floor() as usize;
        let x2 = (x1 + 1).min(cols - 1);
        let y2 = (y1 + 1).min(rows - 1);
        let dx = col - x1 as f64;
        let dy = row - y1 as f64;

        let v11 = self.dem[[y1, x1]];
        let v12 = self.dem[[y2, x1]];
        let v21 = self.dem[[y1, x2]];
        let v22 = self.dem[[y2, x2]];
        if ![v11, v12, v21, v22].iter().all(|&v| self.is_valid(v)) {
            return None;
        }

        Some(
            v11 as f64 * (1.0 - dx) * (1.0 - dy)
                + v21 as f64 * dx * (1.0 - dy)
                + v12 as f64 * (1.0 - dx) * dy
                + v22 as f64 * dx * dy,
        )
    }
}

impl DemProvider for DemInterpolator {
    fn elevation(&self, lon: f64, lat: f64) -> f64 {
        let [x, y] = self.projection.forward(lon, lat);
        self.elevation_at_xy(x, y).unwrap_or(self.ref_height)
    }

    fn ref_height(&self) -> f64 {
        self.ref_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::raster::MemoryRaster;

    fn sloped_dem() -> MemoryRaster<f32> {
        // height = 10 * column + 100 * row, 0.01 degree posting
        let dem = Array2::from_shape_fn((20, 30), |(r, c)| (10 * c + 100 * r) as f32);
        MemoryRaster::from_array(dem).with_geo_transform(GeoTransform::new(-116.0, 0.01, 35.0, -0.01), 4326)
    }

    #[test]
    fn test_bilinear_elevation() {
        let interp = DemInterpolator::load_full(&sloped_dem()).unwrap();
        // Centre of pixel (row 2, col 3)
        let h = interp.elevation_at_xy(-116.0 + 0.035, 35.0 - 0.025).unwrap();
        assert!((h - 230.0).abs() < 1e-6);
        // Half way between columns 3 and 4
        let h = interp.elevation((-116.0_f64 + 0.04).to_radians(), (35.0_f64 - 0.025).to_radians());
        assert!((h - 235.0).abs() < 1e-3);
    }

    #[test]
    fn test_outside_falls_back_to_reference() {
        let interp = DemInterpolator::load_full(&sloped_dem()).unwrap();
        let h = interp.elevation((-120.0_f64).to_radians(), (35.0_f64).to_radians());
        assert!((h - interp.ref_height()).abs() < 1e-12);
        assert!(interp.elevation_at_xy(-117.0, 34.9).is_none());
    }

    #[test]
    fn test_window_load() {
        let raster = sloped_dem();
        let full = DemInterpolator::load_full(&raster).unwrap();
        let window = DemInterpolator::load_window(&raster, -115.9, -115.85, 34.88, 34.92, 2).unwrap();
        assert!(window.data().len() < full.data().len());
        let (x, y) = (-115.875, 34.905);
        let a = full.elevation_at_xy(x, y).unwrap();
        let b = window.elevation_at_xy(x, y).unwrap();
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn test_nodata_is_skipped() {
        let mut dem = Array2::from_elem((4, 4), 50.0_f32);
        dem[[1, 1]] = -32768.0;
        let interp = DemInterpolator::new(dem, GeoTransform::new(0.0, 1.0, 4.0, -1.0), 4326)
            .unwrap()
            .with_nodata(-32768.0);
        assert!((interp.ref_height() - 50.0).abs() < 1e-9);
        assert!(interp.elevation_at_xy(1.5, 2.5).is_none());
        assert!((interp.elevation_at_xy(3.0, 1.0).unwrap() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_mean_matches_loaded_window() {
        let raster = sloped_dem();
        let window = DemInterpolator::load_window(&raster, -115.95, -115.75, 34.86, 34.97, 2).unwrap();
        let mean = DemInterpolator::window_mean_height(&raster, -115.95, -115.75, 34.86, 34.97, 2).unwrap();
        assert_eq!(mean, window.ref_height());

        // Strips longer than the scan size are summed in the same order
        let tall = Array2::from_shape_fn((600, 3), |(r, c)| (r as f32) * 0.37 + c as f32);
        let raster = MemoryRaster::from_array(tall).with_geo_transform(GeoTransform::new(0.0, 1.0, 600.0, -1.0), 4326);
        let full = DemInterpolator::load_full(&raster).unwrap();
        let mean = DemInterpolator::window_mean_height(&raster, 0.0, 3.0, 0.0, 600.0, 0).unwrap();
        assert_eq!(mean, full.ref_height());
    }

    #[test]
    fn test_shared_reference_height() {
        let raster = sloped_dem();
        let a = DemInterpolator::load_window(&raster, -115.99, -115.9, 34.9, 34.99, 1).unwrap();
        let b = DemInterpolator::load_window(&raster, -115.8, -115.72, 34.82, 34.88, 1).unwrap();
        assert!((a.ref_height() - b.ref_height()).abs() > 1.0);

        let (a, b) = (a.with_ref_height(321.0), b.with_ref_height(321.0));
        assert_eq!(a.ref_height(), b.ref_height());
        // Holes fall back to the shared height
        let h = b.elevation((-120.0_f64).to_radians(), (35.0_f64).to_radians());
        assert_eq!(h, 321.0);
    }
}
