//! Block-level raster access used by the geocoding engine
//!
//! Readers are shared read-only across worker threads; writers are driven
//! serially when finished blocks are flushed.

use crate::types::{GeoTransform, SarComplex, SarComplex64, SarError, SarResult};
use ndarray::{s, Array2, ArrayView2};

/// Read-only raster accessor
pub trait RasterSource<T>: Send + Sync {
    fn width(&self) -> usize;
    fn length(&self) -> usize;
    fn num_bands(&self) -> usize;

    /// Read `height` rows and `width` columns of `band` (0-based) starting at
    /// column `x_off`, row `y_off`
    fn read_block(
        &self,
        band: usize,
        x_off: usize,
        y_off: usize,
        width: usize,
        height: usize,
    ) -> SarResult<Array2<T>>;

    fn geo_transform(&self) -> Option<GeoTransform> {
        None
    }

    fn epsg(&self) -> Option<u32> {
        None
    }
}

/// Raster writer
pub trait RasterSink<T>: Send {
    fn width(&self) -> usize;
    fn length(&self) -> usize;
    fn num_bands(&self) -> usize;

    /// Write `data` into `band` (0-based) with its first element at
    /// column `x_off`, row `y_off`
    fn write_block(
        &mut self,
        band: usize,
        x_off: usize,
        y_off: usize,
        data: ArrayView2<T>,
    ) -> SarResult<()>;

    fn set_geo_transform(&mut self, _geo_transform: GeoTransform) -> SarResult<()> {
        Ok(())
    }

    fn set_epsg(&mut self, _epsg: u32) -> SarResult<()> {
        Ok(())
    }
}

fn check_window(
    raster: (usize, usize, usize),
    band: usize,
    x_off: usize,
    y_off: usize,
    width: usize,
    height: usize,
) -> SarResult<()> {
    let (raster_width, raster_length, bands) = raster;
    if band >= bands {
        return Err(SarError::InvalidParameter(format!(
            "band {} out of range ({} bands)",
            band, bands
        )));
    }
    if x_off + width > raster_width || y_off + height > raster_length {
        return Err(SarError::InvalidParameter(format!(
            "window {}x{} at ({}, {}) exceeds raster size {}x{}",
            width, height, x_off, y_off, raster_width, raster_length
        )));
    }
    Ok(())
}

/// In-memory multi-band raster
#[derive(Debug, Clone)]
pub struct MemoryRaster<T> {
    bands: Vec<Array2<T>>,
    geo_transform: Option<GeoTransform>,
    epsg: Option<u32>,
}

impl<T: Clone> MemoryRaster<T> {
    /// Raster from equally shaped bands
    pub fn new(bands: Vec<Array2<T>>) -> SarResult<Self> {
        let first = bands
            .first()
            .ok_or_else(|| SarError::InvalidParameter("raster needs at least one band".to_string()))?;
        if bands.iter().any(|b| b.dim() != first.dim()) {
            return Err(SarError::InvalidParameter(
                "all raster bands must share the same shape".to_string(),
            ));
        }
        Ok(Self {
            bands,
            geo_transform: None,
            epsg: None,
        })
    }

    pub fn from_array(band: Array2<T>) -> Self {
        Self {
            bands: vec![band],
            geo_transform: None,
            epsg: None,
        }
    }

    pub fn filled(width: usize, length: usize, num_bands: usize, value: T) -> Self {
        Self {
            bands: (0..num_bands.max(1))
                .map(|_| Array2::from_elem((length, width), value.clone()))
                .collect(),
            geo_transform: None,
            epsg: None,
        }
    }

    pub fn with_geo_transform(mut self, geo_transform: GeoTransform, epsg: u32) -> Self {
        self.geo_transform = Some(geo_transform);
        self.epsg = Some(epsg);
        self
    }

    pub fn band(&self, band: usize) -> &Array2<T> {
        &self.bands[band]
    }

    pub fn into_bands(self) -> Vec<Array2<T>> {
        self.bands
    }

    pub fn width(&self) -> usize {
        self.bands[0].ncols()
    }

    pub fn length(&self) -> usize {
        self.bands[0].nrows()
    }

    pub fn num_bands(&self) -> usize {
        self.bands.len()
    }

    fn dims(&self) -> (usize, usize, usize) {
        (self.width(), self.length(), self.num_bands())
    }
}

impl<T: Clone + Send + Sync> RasterSource<T> for MemoryRaster<T> {
    fn width(&self) -> usize {
        MemoryRaster::width(self)
    }

    fn length(&self) -> usize {
        MemoryRaster::length(self)
    }

    fn num_bands(&self) -> usize {
        MemoryRaster::num_bands(self)
    }

    fn read_block(
        &self,
        band: usize,
        x_off: usize,
        y_off: usize,
        width: usize,
        height: usize,
    ) -> SarResult<Array2<T>> {
        check_window(self.dims(), band, x_off, y_off, width, height)?;
        Ok(self.bands[band]
            .slice(s![y_off..y_off + height, x_off..x_off + width])
            .to_owned())
    }

    fn geo_transform(&self) -> Option<GeoTransform> {
        self.geo_transform
    }

    fn epsg(&self) -> Option<u32> {
        self.epsg
    }
}

impl<T: Clone + Send + Sync> RasterSink<T> for MemoryRaster<T> {
    fn width(&self) -> usize {
        MemoryRaster::width(self)
    }

    fn length(&self) -> usize {
        MemoryRaster::length(self)
    }

    fn num_bands(&self) -> usize {
        MemoryRaster::num_bands(self)
    }

    fn write_block(
        &mut self,
        band: usize,
        x_off: usize,
        y_off: usize,
        data: ArrayView2<T>,
    ) -> SarResult<()> {
        let (height, width) = data.dim();
        check_window(self.dims(), band, x_off, y_off, width, height)?;
        self.bands[band]
            .slice_mut(s![y_off..y_off + height, x_off..x_off + width])
            .assign(&data);
        Ok(())
    }

    fn set_geo_transform(&mut self, geo_transform: GeoTransform) -> SarResult<()> {
        self.geo_transform = Some(geo_transform);
        Ok(())
    }

    fn set_epsg(&mut self, epsg: u32) -> SarResult<()> {
        self.epsg = Some(epsg);
        Ok(())
    }
}

/// Pixel types the geocoder reads and writes
///
/// Processing is carried out in `Complex<f64>`; real types use the real part.
pub trait Sample: Copy + Send + Sync + 'static {
    const IS_COMPLEX: bool;

    fn to_c64(self) -> SarComplex64;
    fn from_c64(value: SarComplex64) -> Self;
}

impl Sample for f32 {
    const IS_COMPLEX: bool = false;

    fn to_c64(self) -> SarComplex64 {
        SarComplex64::new(self as f64, 0.0)
    }

    fn from_c64(value: SarComplex64) -> Self {
        value.re as f32
    }
}

impl Sample for f64 {
    const IS_COMPLEX: bool = false;

    fn to_c64(self) -> SarComplex64 {
        SarComplex64::new(self, 0.0)
    }

    fn from_c64(value: SarComplex64) -> Self {
        value.re
    }
}

impl Sample for SarComplex {
    const IS_COMPLEX: bool = true;

    fn to_c64(self) -> SarComplex64 {
        SarComplex64::new(self.re as f64, self.im as f64)
    }

    fn from_c64(value: SarComplex64) -> Self {
        SarComplex::new(value.re as f32, value.im as f32)
    }
}

impl Sample for SarComplex64 {
    const IS_COMPLEX: bool = true;

    fn to_c64(self) -> SarComplex64 {
        self
    }

    fn from_c64(value: SarComplex64) -> Self {
        value
    }
}

#[cfg(feature = "gdal")]
pub use self::gdal_raster::GdalRaster;

#[cfg(feature = "gdal")]
mod gdal_raster {
    use super::*;
    use gdal::raster::{Buffer, GdalType};
    use gdal::{Dataset, DriverManager};
    use std::marker::PhantomData;
    use std::path::Path;
    use std::sync::Mutex;

    /// GDAL-backed raster (real-valued sample types)
    pub struct GdalRaster<T> {
        dataset: Mutex<Dataset>,
        width: usize,
        length: usize,
        bands: usize,
        _sample: PhantomData<T>,
    }

    impl<T: GdalType + Copy> GdalRaster<T> {
        pub fn open<P: AsRef<Path>>(path: P) -> SarResult<Self> {
            log::info!("Opening raster: {}", path.as_ref().display());
            let dataset = Dataset::open(path.as_ref())?;
            let (width, length) = dataset.raster_size();
            let bands = dataset.raster_count() as usize;
            Ok(Self {
                dataset: Mutex::new(dataset),
                width,
                length,
                bands,
                _sample: PhantomData,
            })
        }

        /// Create a GeoTIFF for output
        pub fn create<P: AsRef<Path>>(
            path: P,
            width: usize,
            length: usize,
            bands: usize,
        ) -> SarResult<Self> {
            log::info!("Creating GeoTIFF: {}", path.as_ref().display());
            let driver = DriverManager::get_driver_by_name("GTiff")?;
            let dataset = driver.create_with_band_type::<T, _>(
                path.as_ref(),
                width as isize,
                length as isize,
                bands as isize,
            )?;
            Ok(Self {
                dataset: Mutex::new(dataset),
                width,
                length,
                bands,
                _sample: PhantomData,
            })
        }

        fn lock(&self) -> SarResult<std::sync::MutexGuard<'_, Dataset>> {
            self.dataset
                .lock()
                .map_err(|_| SarError::Processing("GDAL dataset lock poisoned".to_string()))
        }
    }

    impl<T: GdalType + Copy + Send + Sync> RasterSource<T> for GdalRaster<T> {
        fn width(&self) -> usize {
            self.width
        }

        fn length(&self) -> usize {
            self.length
        }

        fn num_bands(&self) -> usize {
            self.bands
        }

        fn read_block(
            &self,
            band: usize,
            x_off: usize,
            y_off: usize,
            width: usize,
            height: usize,
        ) -> SarResult<Array2<T>> {
            check_window((self.width, self.length, self.bands), band, x_off, y_off, width, height)?;
            let dataset = self.lock()?;
            let rasterband = dataset.rasterband(band as isize + 1)?;
            let buffer = rasterband.read_as::<T>(
                (x_off as isize, y_off as isize),
                (width, height),
                (width, height),
                None,
            )?;
            Array2::from_shape_vec((height, width), buffer.data)
                .map_err(|e| SarError::Processing(format!("Failed to reshape raster block: {}", e)))
        }

        fn geo_transform(&self) -> Option<GeoTransform> {
            let dataset = self.lock().ok()?;
            dataset.geo_transform().ok().map(GeoTransform::from_gdal)
        }
    }

    impl<T: GdalType + Copy + Send + Sync> RasterSink<T> for GdalRaster<T> {
        fn width(&self) -> usize {
            self.width
        }

        fn length(&self) -> usize {
            self.length
        }

        fn num_bands(&self) -> usize {
            self.bands
        }

        fn write_block(
            &mut self,
            band: usize,
            x_off: usize,
            y_off: usize,
            data: ArrayView2<T>,
        ) -> SarResult<()> {
            let (height, width) = data.dim();
            check_window((self.width, self.length, self.bands), band, x_off, y_off, width, height)?;
            let dataset = self.lock()?;
            let mut rasterband = dataset.rasterband(band as isize + 1)?;
            let flat_data: Vec<T> = data.iter().copied().collect();
            let buffer = Buffer::new((width, height), flat_data);
            rasterband.write((x_off as isize, y_off as isize), (width, height), &buffer)?;
            Ok(())
        }

        fn set_geo_transform(&mut self, geo_transform: GeoTransform) -> SarResult<()> {
            let mut dataset = self.lock()?;
            dataset.set_geo_transform(&geo_transform.to_gdal())?;
            Ok(())
        }

        fn set_epsg(&mut self, epsg: u32) -> SarResult<()> {
            let mut dataset = self.lock()?;
            dataset.set_spatial_ref(&gdal::spatial_ref::SpatialRef::from_epsg(epsg)?)?;
            Ok(())
        }
    }
}
